// Action Dispatcher - resolves templates and runs a single workflow action
//
// Every collaborator failure is folded into an ActionResult; the
// dispatcher never propagates an error upward.

use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::assignment::AssignmentSelector;
use crate::services::{ChatNotifier, FunctionRegistry, Mailer, RecordService, TaskSpec};
use crate::services::records::{CaseSpec, NbaSpec};
use crate::webhooks::{sign_payload, DeliveryOutcome, SignatureAlgorithm, WebhookDeliveryService};
use crate::workflows::actions::{ActionResult, ActionType};
use crate::workflows::conditions::lookup_path;
use crate::workflows::nodes::ActionNode;

const TEMPLATE_PATTERN: &str = r"\{\{\s*([^{}]+?)\s*\}\}";

/// Substitute `{{path}}` placeholders in an action config with values
/// looked up from the execution context. A string that is exactly one
/// placeholder takes the looked-up value with its original type (or
/// null when the path misses); placeholders embedded in longer strings
/// render as text, with misses rendered as the literal `null`.
pub fn resolve_templates(value: &Value, context: &Value) -> Value {
    match value {
        Value::String(s) => resolve_string(s, context),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_templates(v, context)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_templates(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, context: &Value) -> Value {
    let pattern = Regex::new(TEMPLATE_PATTERN).unwrap();

    if let Some(caps) = pattern.captures(s) {
        if caps.get(0).map(|m| m.as_str().len()) == Some(s.len()) {
            return lookup_path(context, caps[1].trim()).unwrap_or(Value::Null);
        }
    }

    let replaced = pattern.replace_all(s, |caps: &regex::Captures| {
        match lookup_path(context, caps[1].trim()) {
            Some(Value::String(text)) => text,
            Some(other) => other.to_string(),
            None => "null".to_string(),
        }
    });
    Value::String(replaced.into_owned())
}

fn text(config: &Value, key: &str) -> Option<String> {
    match config.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn uuid_field(config: &Value, key: &str) -> Option<Uuid> {
    text(config, key).and_then(|s| Uuid::parse_str(&s).ok())
}

pub struct ActionDispatcher {
    mailer: Arc<dyn Mailer>,
    chat: ChatNotifier,
    records: Arc<dyn RecordService>,
    webhooks: Arc<WebhookDeliveryService>,
    assignment: AssignmentSelector,
    functions: Arc<FunctionRegistry>,
    client: reqwest::Client,
}

impl ActionDispatcher {
    pub fn new(
        mailer: Arc<dyn Mailer>,
        chat: ChatNotifier,
        records: Arc<dyn RecordService>,
        webhooks: Arc<WebhookDeliveryService>,
        assignment: AssignmentSelector,
        functions: Arc<FunctionRegistry>,
    ) -> Self {
        Self {
            mailer,
            chat,
            records,
            webhooks,
            assignment,
            functions,
            client: reqwest::Client::new(),
        }
    }

    /// Run one action with its config resolved against the execution
    /// context. Approval and delay never reach this point; the engine
    /// suspends the execution before dispatch.
    pub async fn execute(
        &self,
        action: &ActionNode,
        tenant_id: &str,
        context: &Value,
    ) -> ActionResult {
        let started = Instant::now();
        let config = resolve_templates(&action.config, context);

        info!("Dispatching action '{}' ({})", action.name, action.action_type.as_str());

        let result = match action.action_type {
            ActionType::SendEmail => self.send_email(&config).await,
            ActionType::SendSlack => self.send_chat(&config, Channel::Slack).await,
            ActionType::SendTeams => self.send_chat(&config, Channel::Teams).await,
            ActionType::SendWhatsapp => self.send_whatsapp(&config).await,
            ActionType::CreateTask => self.create_task(tenant_id, &config, context).await,
            ActionType::CreateCase => self.create_case(tenant_id, &config).await,
            ActionType::CreateNba => self.create_nba(tenant_id, &config).await,
            ActionType::UpdateField => self.update_field(&config, context).await,
            ActionType::AssignOwner => self.assign_owner(tenant_id, &config, context).await,
            ActionType::Webhook => self.send_webhook(&config, context).await,
            ActionType::RunFunction => self.run_function(&config).await,
            ActionType::Approval | ActionType::Delay => {
                ActionResult::failure("suspension actions are scheduled by the engine")
            }
        };

        result.with_duration(started.elapsed().as_millis() as i64)
    }

    async fn send_email(&self, config: &Value) -> ActionResult {
        let recipients = string_list(config.get("to"));
        if recipients.is_empty() {
            return ActionResult::failure("email action requires at least one recipient");
        }
        let subject = text(config, "subject").unwrap_or_default();
        let body = text(config, "body").unwrap_or_default();

        match self.mailer.send(&recipients, &subject, &body).await {
            Ok(()) => ActionResult::success(Some(json!({ "recipients": recipients.len() }))),
            Err(e) => ActionResult::failure(&e.to_string()),
        }
    }

    async fn send_chat(&self, config: &Value, channel: Channel) -> ActionResult {
        let url = match text(config, "webhook_url") {
            Some(url) => url,
            None => return ActionResult::failure("chat action requires a webhook_url"),
        };
        let message = text(config, "message").unwrap_or_default();

        let sent = match channel {
            Channel::Slack => self.chat.send_slack(&url, &message).await,
            Channel::Teams => self.chat.send_teams(&url, &message).await,
        };
        match sent {
            Ok(()) => ActionResult::success(None),
            Err(e) => ActionResult::failure(&e.to_string()),
        }
    }

    async fn send_whatsapp(&self, config: &Value) -> ActionResult {
        let bridge_url = match text(config, "bridge_url") {
            Some(url) => url,
            None => return ActionResult::failure("whatsapp action requires a bridge_url"),
        };
        let number = match text(config, "number") {
            Some(number) => number,
            None => return ActionResult::failure("whatsapp action requires a number"),
        };
        let message = text(config, "message").unwrap_or_default();

        match self.chat.send_whatsapp(&bridge_url, &number, &message).await {
            Ok(()) => ActionResult::success(None),
            Err(e) => ActionResult::failure(&e.to_string()),
        }
    }

    async fn create_task(&self, tenant_id: &str, config: &Value, context: &Value) -> ActionResult {
        let title = match text(config, "title") {
            Some(title) => title,
            None => return ActionResult::failure("task action requires a title"),
        };
        let due_date = config
            .get("due_in_days")
            .and_then(|v| v.as_i64())
            .map(|days| chrono::Utc::now() + chrono::Duration::days(days));
        let assignee = match text(config, "assignee").as_deref() {
            Some("owner") => lookup_path(context, "owner_id")
                .and_then(|v| v.as_str().and_then(|s| Uuid::parse_str(s).ok())),
            Some(raw) => Uuid::parse_str(raw).ok(),
            None => None,
        };

        let task = TaskSpec {
            title,
            description: text(config, "description"),
            due_date,
            assignee,
            related_to: config.get("related_to").cloned(),
        };
        match self.records.create_task(tenant_id, task).await {
            Ok(id) => ActionResult::success(Some(json!({ "task_id": id }))),
            Err(e) => ActionResult::failure(&e.to_string()),
        }
    }

    async fn create_case(&self, tenant_id: &str, config: &Value) -> ActionResult {
        let subject = match text(config, "subject") {
            Some(subject) => subject,
            None => return ActionResult::failure("case action requires a subject"),
        };
        let case = CaseSpec {
            subject,
            description: text(config, "description"),
            priority: text(config, "priority").unwrap_or_else(|| "medium".to_string()),
            account_id: uuid_field(config, "account_id"),
        };
        match self.records.create_case(tenant_id, case).await {
            Ok(id) => ActionResult::success(Some(json!({ "case_id": id }))),
            Err(e) => ActionResult::failure(&e.to_string()),
        }
    }

    async fn create_nba(&self, tenant_id: &str, config: &Value) -> ActionResult {
        let title = match text(config, "title") {
            Some(title) => title,
            None => return ActionResult::failure("next best action requires a title"),
        };
        let nba = NbaSpec {
            title,
            description: text(config, "description"),
            score: config.get("score").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
            related_to: config.get("related_to").cloned(),
        };
        match self.records.create_next_best_action(tenant_id, nba).await {
            Ok(id) => ActionResult::success(Some(json!({ "nba_id": id }))),
            Err(e) => ActionResult::failure(&e.to_string()),
        }
    }

    async fn update_field(&self, config: &Value, context: &Value) -> ActionResult {
        let entity_type = match text(config, "entity_type") {
            Some(entity) => entity,
            None => return ActionResult::failure("field update requires an entity_type"),
        };
        let field = match text(config, "field") {
            Some(field) => field,
            None => return ActionResult::failure("field update requires a field"),
        };
        let record_id = uuid_field(config, "record_id")
            .or_else(|| lookup_path(context, "id")
                .and_then(|v| v.as_str().and_then(|s| Uuid::parse_str(s).ok())));
        let record_id = match record_id {
            Some(id) => id,
            None => return ActionResult::failure("field update requires a record_id"),
        };
        let value = config.get("value").cloned().unwrap_or(Value::Null);

        match self
            .records
            .update_field(&entity_type, record_id, &field, &value)
            .await
        {
            Ok(()) => ActionResult::success(Some(json!({ "record_id": record_id, "field": field }))),
            Err(e) => ActionResult::failure(&e.to_string()),
        }
    }

    async fn assign_owner(&self, tenant_id: &str, config: &Value, context: &Value) -> ActionResult {
        let entity_type = match text(config, "entity_type") {
            Some(entity) => entity,
            None => return ActionResult::failure("owner assignment requires an entity_type"),
        };

        let assignee = match self
            .assignment
            .evaluate_rules(tenant_id, &entity_type, context)
            .await
        {
            Ok(assignee) => assignee,
            Err(e) => return ActionResult::failure(&e.to_string()),
        };
        let assignee = match assignee {
            Some(assignee) => assignee,
            None => return ActionResult::success(Some(json!({ "assignee": Value::Null }))),
        };

        let record_id = uuid_field(config, "record_id")
            .or_else(|| lookup_path(context, "id")
                .and_then(|v| v.as_str().and_then(|s| Uuid::parse_str(s).ok())));
        if let Some(record_id) = record_id {
            if let Err(e) = self
                .records
                .update_field(&entity_type, record_id, "owner_id", &json!(assignee))
                .await
            {
                return ActionResult::failure(&e.to_string());
            }
        }
        ActionResult::success(Some(json!({ "assignee": assignee })))
    }

    async fn send_webhook(&self, config: &Value, context: &Value) -> ActionResult {
        let payload = config
            .get("payload")
            .cloned()
            .unwrap_or_else(|| context.clone());
        let event_type = text(config, "event").unwrap_or_else(|| "workflow.action".to_string());

        if let Some(endpoint_id) = uuid_field(config, "endpoint_id") {
            return match self
                .webhooks
                .deliver_with_retry(endpoint_id, &payload, &event_type)
                .await
            {
                Ok(DeliveryOutcome::Delivered { record_id }) => {
                    ActionResult::success(Some(json!({ "delivery_id": record_id })))
                }
                Ok(DeliveryOutcome::Failed { error, .. }) => ActionResult::failure(&error),
                Ok(DeliveryOutcome::RateLimited) => {
                    ActionResult::failure("webhook delivery was rate limited")
                }
                Ok(DeliveryOutcome::Inactive) => {
                    ActionResult::failure("webhook endpoint is inactive")
                }
                Err(e) => ActionResult::failure(&e.to_string()),
            };
        }

        // one-off delivery to a URL given inline, without a stored endpoint
        if let Some(url) = text(config, "url") {
            let mut request = self.client.post(&url).json(&payload);
            if let Some(secret) = text(config, "secret") {
                match sign_payload(&secret, &payload, SignatureAlgorithm::Sha256) {
                    Ok(signature) => request = request.header("X-Webhook-Signature", signature),
                    Err(e) => return ActionResult::failure(&e.to_string()),
                }
            }
            return match request.send().await {
                Ok(response) if response.status().is_success() => {
                    ActionResult::success(Some(json!({ "status": response.status().as_u16() })))
                }
                Ok(response) => ActionResult::failure(&format!(
                    "webhook target returned {}",
                    response.status()
                )),
                Err(e) => ActionResult::failure(&e.to_string()),
            };
        }

        ActionResult::failure("webhook action requires an endpoint_id or url")
    }

    async fn run_function(&self, config: &Value) -> ActionResult {
        let name = match text(config, "name") {
            Some(name) => name,
            None => return ActionResult::failure("function action requires a name"),
        };
        let args = config.get("args").cloned().unwrap_or_else(|| json!({}));

        match self.functions.call(&name, args).await {
            Ok(output) => ActionResult::success(Some(output)),
            Err(e) => ActionResult::failure(&e),
        }
    }
}

enum Channel {
    Slack,
    Teams,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MemoryRecords, RecordingMailer};
    use crate::workflows::store::MemoryStore;

    fn dispatcher_with(
        mailer: Arc<RecordingMailer>,
        records: Arc<MemoryRecords>,
        functions: FunctionRegistry,
    ) -> ActionDispatcher {
        let store: Arc<dyn crate::workflows::store::WorkflowStore> = Arc::new(MemoryStore::new());
        ActionDispatcher::new(
            mailer,
            ChatNotifier::new(),
            records,
            Arc::new(WebhookDeliveryService::new(store.clone())),
            AssignmentSelector::new(store),
            Arc::new(functions),
        )
    }

    fn action(action_type: ActionType, config: Value) -> ActionNode {
        ActionNode {
            id: Uuid::new_v4(),
            name: "test action".to_string(),
            action_type,
            config,
            order: 0,
            branch: None,
            branch_value: None,
        }
    }

    #[test]
    fn test_whole_placeholder_keeps_type() {
        let context = json!({ "deal": { "amount": 50000 } });
        let config = json!({ "value": "{{deal.amount}}" });

        let resolved = resolve_templates(&config, &context);
        assert_eq!(resolved["value"], json!(50000));
    }

    #[test]
    fn test_whole_placeholder_missing_path_is_null() {
        let resolved = resolve_templates(&json!({ "value": "{{lead.missing}}" }), &json!({}));
        assert_eq!(resolved["value"], Value::Null);
    }

    #[test]
    fn test_embedded_placeholder_renders_text() {
        let context = json!({ "lead": { "name": "Ada", "score": 91 } });
        let config = json!({ "body": "Hi {{lead.name}}, score {{lead.score}}, ref {{lead.gone}}" });

        let resolved = resolve_templates(&config, &context);
        assert_eq!(resolved["body"], json!("Hi Ada, score 91, ref null"));
    }

    #[tokio::test]
    async fn test_send_email_reports_recipients() {
        let mailer = Arc::new(RecordingMailer::default());
        let dispatcher = dispatcher_with(
            mailer.clone(),
            Arc::new(MemoryRecords::default()),
            FunctionRegistry::new(),
        );
        let node = action(
            ActionType::SendEmail,
            json!({ "to": ["{{lead.email}}"], "subject": "Welcome", "body": "Hi {{lead.name}}" }),
        );
        let context = json!({ "lead": { "email": "ada@example.com", "name": "Ada" } });

        let result = dispatcher.execute(&node, "acme", &context).await;
        assert!(result.success);
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent[0].0, vec!["ada@example.com".to_string()]);
        assert_eq!(sent[0].2, "Hi Ada");
    }

    #[tokio::test]
    async fn test_mailer_failure_becomes_action_failure() {
        let mailer = Arc::new(RecordingMailer::default());
        mailer.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let dispatcher = dispatcher_with(
            mailer,
            Arc::new(MemoryRecords::default()),
            FunctionRegistry::new(),
        );
        let node = action(ActionType::SendEmail, json!({ "to": "x@example.com" }));

        let result = dispatcher.execute(&node, "acme", &json!({})).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_update_field_rejects_unlisted_field() {
        let records = Arc::new(MemoryRecords::default());
        let dispatcher = dispatcher_with(
            Arc::new(RecordingMailer::default()),
            records.clone(),
            FunctionRegistry::new(),
        );
        let record_id = Uuid::new_v4();
        let node = action(
            ActionType::UpdateField,
            json!({
                "entity_type": "lead",
                "record_id": record_id,
                "field": "password",
                "value": "x"
            }),
        );

        let result = dispatcher.execute(&node, "acme", &json!({})).await;
        assert!(!result.success);
        assert!(records.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_function_round_trip() {
        let mut functions = FunctionRegistry::new();
        functions.register("score", |args| async move {
            Ok(json!({ "score": args["base"].as_i64().unwrap_or(0) + 10 }))
        });
        let dispatcher = dispatcher_with(
            Arc::new(RecordingMailer::default()),
            Arc::new(MemoryRecords::default()),
            functions,
        );
        let node = action(
            ActionType::RunFunction,
            json!({ "name": "score", "args": { "base": "{{lead.score}}" } }),
        );

        let result = dispatcher
            .execute(&node, "acme", &json!({ "lead": { "score": 32 } }))
            .await;
        assert!(result.success);
        assert_eq!(result.output.unwrap()["score"], 42);
    }

    #[tokio::test]
    async fn test_unknown_function_fails() {
        let dispatcher = dispatcher_with(
            Arc::new(RecordingMailer::default()),
            Arc::new(MemoryRecords::default()),
            FunctionRegistry::new(),
        );
        let node = action(ActionType::RunFunction, json!({ "name": "never_registered" }));

        let result = dispatcher.execute(&node, "acme", &json!({})).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_create_task_resolves_owner_assignee() {
        let records = Arc::new(MemoryRecords::default());
        let dispatcher = dispatcher_with(
            Arc::new(RecordingMailer::default()),
            records.clone(),
            FunctionRegistry::new(),
        );
        let owner = Uuid::new_v4();
        let node = action(
            ActionType::CreateTask,
            json!({ "title": "Follow up", "assignee": "owner", "due_in_days": 3 }),
        );

        let result = dispatcher
            .execute(&node, "acme", &json!({ "owner_id": owner.to_string() }))
            .await;
        assert!(result.success);
        let tasks = records.tasks.lock().unwrap();
        assert_eq!(tasks[0].assignee, Some(owner));
        assert!(tasks[0].due_date.is_some());
    }
}
