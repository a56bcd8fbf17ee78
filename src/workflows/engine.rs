// Workflow Engine - execution state machine and scope walker
//
// State machine: pending -> running -> completed | failed, with
// waiting_for_approval as the persisted suspension state for approval
// and delay actions, skipped when trigger conditions reject the event,
// and cancelled reachable from any non-terminal state. A failed action
// halts the execution; already-performed side effects are not undone.

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::workflows::actions::{ActionResult, ActionType};
use crate::workflows::conditions::evaluate_all;
use crate::workflows::executor::ActionDispatcher;
use crate::workflows::nodes::{
    ActionNode, ApprovalRequest, ApprovalStatus, BranchNode, Execution, ExecutionStatus,
    ScheduledResumption, WorkflowDefinition,
};
use crate::workflows::store::{StoreError, WorkflowStore};
use crate::workflows::triggers::DomainEvent;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid execution state: {0}")]
    InvalidState(String),
}

/// Outcome of walking one scope of a workflow.
enum StepOutcome {
    Completed,
    Suspended,
    Failed(String),
    Cancelled,
}

pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    dispatcher: Arc<ActionDispatcher>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn WorkflowStore>, dispatcher: Arc<ActionDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Start one execution per active workflow listening on the event.
    pub async fn process_event(&self, event: &DomainEvent) -> Result<Vec<Execution>, EngineError> {
        let workflows = self
            .store
            .workflows_for_event(&event.tenant_id, &event.event_type)
            .await?;

        let mut executions = Vec::with_capacity(workflows.len());
        for workflow in &workflows {
            executions.push(self.start(workflow, event.payload.clone()).await?);
        }
        Ok(executions)
    }

    /// Create and run an execution for one workflow. Trigger conditions
    /// gate the run: a rejected event yields a skipped execution, which
    /// is terminal and distinct from failed.
    pub async fn start(
        &self,
        workflow: &WorkflowDefinition,
        payload: Value,
    ) -> Result<Execution, EngineError> {
        let mut execution = Execution::new(workflow.id, &workflow.tenant_id, payload);
        execution.context = seed_context(&execution.trigger_payload);
        self.store.insert_execution(execution.clone()).await?;

        if let Some(trigger) = &workflow.trigger {
            if !evaluate_all(&trigger.conditions, &execution.trigger_payload) {
                info!(
                    "Workflow '{}' skipped: trigger conditions rejected the event",
                    workflow.name
                );
                execution.status = ExecutionStatus::Skipped;
                execution.completed_at = Some(Utc::now());
                self.store.update_execution(&execution).await?;
                return Ok(execution);
            }
        }

        self.run(workflow, execution, None).await
    }

    /// Continue an execution suspended at an approval or delay. The walk
    /// retraces branch decisions from the persisted context and picks up
    /// after the suspension action itself.
    pub async fn resume(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::NotFound("execution"))?;
        if execution.status != ExecutionStatus::WaitingForApproval {
            return Err(EngineError::InvalidState(format!(
                "execution {} is {}, not waiting",
                execution_id,
                execution.status.as_str()
            )));
        }
        let workflow = self
            .store
            .get_workflow(execution.workflow_id)
            .await?
            .ok_or(EngineError::NotFound("workflow"))?;

        let skip_until = execution.current_step;
        self.run(&workflow, execution, skip_until).await
    }

    /// Record an approval decision. Approved resumes the execution;
    /// rejected cancels it.
    pub async fn handle_approval_decision(
        &self,
        approval_id: Uuid,
        approved: bool,
        decided_by: &str,
    ) -> Result<Execution, EngineError> {
        let approval = self
            .store
            .get_approval(approval_id)
            .await?
            .ok_or(EngineError::NotFound("approval request"))?;
        if approval.status != ApprovalStatus::Pending {
            return Err(EngineError::InvalidState(format!(
                "approval {} has already been decided",
                approval_id
            )));
        }

        let status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        self.store.decide_approval(approval_id, status, decided_by).await?;

        if approved {
            self.resume(approval.execution_id).await
        } else {
            info!(
                "Approval {} rejected by {}, cancelling execution {}",
                approval_id, decided_by, approval.execution_id
            );
            self.cancel(approval.execution_id).await
        }
    }

    /// Cancel a non-terminal execution. The status write is visible to a
    /// concurrent walk, which stops before its next action.
    pub async fn cancel(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let mut execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::NotFound("execution"))?;
        if execution.status.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "execution {} is already {}",
                execution_id,
                execution.status.as_str()
            )));
        }
        execution.status = ExecutionStatus::Cancelled;
        execution.completed_at = Some(Utc::now());
        self.store.update_execution(&execution).await?;
        Ok(execution)
    }

    /// Re-run a finished execution's workflow against its original
    /// payload as a fresh execution. The source execution is untouched.
    pub async fn replay(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let original = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(EngineError::NotFound("execution"))?;
        let workflow = self
            .store
            .get_workflow(original.workflow_id)
            .await?
            .ok_or(EngineError::NotFound("workflow"))?;

        let mut replayed = original.replay();
        replayed.context = seed_context(&replayed.trigger_payload);
        self.store.insert_execution(replayed.clone()).await?;

        info!("Replaying execution {} as {}", execution_id, replayed.id);
        self.run(&workflow, replayed, None).await
    }

    async fn run(
        &self,
        workflow: &WorkflowDefinition,
        mut execution: Execution,
        mut skip_until: Option<Uuid>,
    ) -> Result<Execution, EngineError> {
        execution.status = ExecutionStatus::Running;
        self.store.update_execution(&execution).await?;

        let outcome = self
            .walk_scope(workflow, &mut execution, None, None, &mut skip_until)
            .await?;

        match outcome {
            StepOutcome::Completed => {
                execution.status = ExecutionStatus::Completed;
                execution.completed_at = Some(Utc::now());
                self.store.update_execution(&execution).await?;
                info!("Execution {} completed", execution.id);
            }
            StepOutcome::Failed(message) => {
                error!("Execution {} failed: {}", execution.id, message);
                execution.status = ExecutionStatus::Failed;
                execution.error_message = Some(message);
                execution.completed_at = Some(Utc::now());
                self.store.update_execution(&execution).await?;
            }
            StepOutcome::Cancelled => {
                warn!("Execution {} cancelled mid-run", execution.id);
                execution.status = ExecutionStatus::Cancelled;
                execution.completed_at = Some(Utc::now());
                self.store.update_execution(&execution).await?;
            }
            // suspend() already persisted waiting_for_approval
            StepOutcome::Suspended => {}
        }

        Ok(execution)
    }

    /// Walk one scope in order. Actions dispatch; branch nodes evaluate
    /// their condition and recurse into the matching sub-scope. While
    /// `skip_until` is set the walk only navigates, clearing it when it
    /// passes the action it names.
    fn walk_scope<'a>(
        &'a self,
        workflow: &'a WorkflowDefinition,
        execution: &'a mut Execution,
        branch: Option<Uuid>,
        branch_value: Option<bool>,
        skip_until: &'a mut Option<Uuid>,
    ) -> BoxFuture<'a, Result<StepOutcome, EngineError>> {
        Box::pin(async move {
            enum Item<'b> {
                Action(&'b ActionNode),
                Branch(&'b BranchNode),
            }

            let mut items: Vec<(i32, Item)> = workflow
                .actions
                .iter()
                .filter(|a| a.branch == branch && a.branch_value == branch_value)
                .map(|a| (a.order, Item::Action(a)))
                .chain(
                    workflow
                        .branches
                        .iter()
                        .filter(|b| {
                            b.parent_branch == branch && b.parent_branch_value == branch_value
                        })
                        .map(|b| (b.order, Item::Branch(b))),
                )
                .collect();
            items.sort_by_key(|(order, _)| *order);

            for (_, item) in items {
                match item {
                    Item::Branch(node) => {
                        let taken = node.condition.evaluate(&execution.context);
                        let outcome = self
                            .walk_scope(workflow, execution, Some(node.id), Some(taken), skip_until)
                            .await?;
                        if !matches!(outcome, StepOutcome::Completed) {
                            return Ok(outcome);
                        }
                    }
                    Item::Action(node) => {
                        if let Some(target) = *skip_until {
                            if node.id == target {
                                *skip_until = None;
                            }
                            continue;
                        }

                        if let Some(ExecutionStatus::Cancelled) =
                            self.store.execution_status(execution.id).await?
                        {
                            return Ok(StepOutcome::Cancelled);
                        }

                        if node.action_type.is_suspension() {
                            self.suspend(execution, node, branch, branch_value).await?;
                            return Ok(StepOutcome::Suspended);
                        }

                        let result = self
                            .dispatcher
                            .execute(node, &execution.tenant_id, &execution.context)
                            .await;
                        record_step(execution, node, &result);
                        execution.current_step = Some(node.id);
                        self.store.update_execution(execution).await?;

                        if !result.success {
                            return Ok(StepOutcome::Failed(
                                result
                                    .error
                                    .unwrap_or_else(|| "action failed".to_string()),
                            ));
                        }
                    }
                }
            }

            Ok(StepOutcome::Completed)
        })
    }

    /// Persist the suspension point and file the matching approval
    /// request or scheduled resumption.
    async fn suspend(
        &self,
        execution: &mut Execution,
        action: &ActionNode,
        branch: Option<Uuid>,
        branch_value: Option<bool>,
    ) -> Result<(), EngineError> {
        execution.current_step = Some(action.id);
        execution.current_branch = branch;
        execution.current_branch_value = branch_value;
        execution.status = ExecutionStatus::WaitingForApproval;
        self.store.update_execution(execution).await?;

        match action.action_type {
            ActionType::Approval => {
                let approvers = approver_list(&action.config);
                self.store
                    .insert_approval(ApprovalRequest::new(execution.id, action.id, approvers))
                    .await?;
                info!(
                    "Execution {} waiting for approval at '{}'",
                    execution.id, action.name
                );
            }
            ActionType::Delay => {
                let scheduled_for = Utc::now() + delay_from_config(&action.config);
                self.store
                    .insert_resumption(ScheduledResumption::new(
                        execution.id,
                        action.id,
                        scheduled_for,
                        execution.context.clone(),
                    ))
                    .await?;
                info!(
                    "Execution {} delayed at '{}' until {}",
                    execution.id, action.name, scheduled_for
                );
            }
            _ => {}
        }
        Ok(())
    }
}

/// The execution context starts from the trigger payload, with action
/// outputs accumulated under `steps` keyed by action id.
fn seed_context(payload: &Value) -> Value {
    let mut context = match payload {
        Value::Object(map) => Value::Object(map.clone()),
        other => json!({ "payload": other.clone() }),
    };
    context["steps"] = json!({});
    context
}

fn record_step(execution: &mut Execution, action: &ActionNode, result: &ActionResult) {
    let output = result.output.clone().unwrap_or(Value::Null);
    execution.context["steps"][action.id.to_string()] = output;
}

fn approver_list(config: &Value) -> Vec<String> {
    match config.get("approvers") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn delay_from_config(config: &Value) -> chrono::Duration {
    let minutes = config.get("delay_minutes").and_then(|v| v.as_i64()).unwrap_or(0);
    let hours = config.get("delay_hours").and_then(|v| v.as_i64()).unwrap_or(0);
    let days = config.get("delay_days").and_then(|v| v.as_i64()).unwrap_or(0);
    chrono::Duration::minutes(minutes)
        + chrono::Duration::hours(hours)
        + chrono::Duration::days(days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::AssignmentSelector;
    use crate::services::{ChatNotifier, FunctionRegistry, MemoryRecords, RecordingMailer};
    use crate::webhooks::WebhookDeliveryService;
    use crate::workflows::conditions::Condition;
    use crate::workflows::nodes::TriggerNode;
    use crate::workflows::store::MemoryStore;
    use crate::workflows::triggers::{events, EventSource};
    use serde_json::json;

    struct Harness {
        store: Arc<MemoryStore>,
        records: Arc<MemoryRecords>,
        engine: WorkflowEngine,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let records = Arc::new(MemoryRecords::default());
        let dyn_store: Arc<dyn WorkflowStore> = store.clone();
        let dispatcher = ActionDispatcher::new(
            Arc::new(RecordingMailer::default()),
            ChatNotifier::new(),
            records.clone(),
            Arc::new(WebhookDeliveryService::new(dyn_store.clone())),
            AssignmentSelector::new(dyn_store.clone()),
            Arc::new(FunctionRegistry::new()),
        );
        let engine = WorkflowEngine::new(dyn_store, Arc::new(dispatcher));
        Harness { store, records, engine }
    }

    fn task_action(title: &str, order: i32, branch: Option<Uuid>, branch_value: Option<bool>) -> ActionNode {
        ActionNode {
            id: Uuid::new_v4(),
            name: format!("create {}", title),
            action_type: ActionType::CreateTask,
            config: json!({ "title": title }),
            order,
            branch,
            branch_value,
        }
    }

    fn workflow(trigger_conditions: Vec<Condition>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::new_v4(),
            tenant_id: "acme".to_string(),
            name: "test workflow".to_string(),
            description: None,
            trigger: Some(TriggerNode {
                id: Uuid::new_v4(),
                event_name: events::LEAD_CREATED.to_string(),
                conditions: trigger_conditions,
            }),
            branches: Vec::new(),
            actions: Vec::new(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn task_titles(records: &MemoryRecords) -> Vec<String> {
        records.tasks.lock().unwrap().iter().map(|t| t.title.clone()).collect()
    }

    #[tokio::test]
    async fn test_straight_line_run_completes() {
        let h = harness();
        let mut wf = workflow(Vec::new());
        wf.actions = vec![task_action("first", 0, None, None), task_action("second", 1, None, None)];
        h.store.save_workflow(wf.clone()).await.unwrap();

        let execution = h.engine.start(&wf, json!({ "lead": { "name": "Ada" } })).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.completed_at.is_some());
        assert_eq!(task_titles(&h.records), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_rejected_trigger_conditions_skip() {
        let h = harness();
        let mut wf = workflow(vec![Condition::eq("lead.rating", json!("hot"))]);
        wf.actions = vec![task_action("never", 0, None, None)];
        h.store.save_workflow(wf.clone()).await.unwrap();

        let execution = h.engine.start(&wf, json!({ "lead": { "rating": "cold" } })).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Skipped);
        assert!(task_titles(&h.records).is_empty());
    }

    #[tokio::test]
    async fn test_branch_routes_by_condition() {
        let h = harness();
        let mut wf = workflow(Vec::new());
        let branch = BranchNode {
            id: Uuid::new_v4(),
            condition: Condition::gt("deal.amount", 10000.0),
            parent_branch: None,
            parent_branch_value: None,
            order: 0,
        };
        wf.actions = vec![
            task_action("big deal", 0, Some(branch.id), Some(true)),
            task_action("small deal", 0, Some(branch.id), Some(false)),
            task_action("always", 1, None, None),
        ];
        wf.branches = vec![branch];
        h.store.save_workflow(wf.clone()).await.unwrap();

        let execution = h.engine.start(&wf, json!({ "deal": { "amount": 50000 } })).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(task_titles(&h.records), vec!["big deal", "always"]);
    }

    #[tokio::test]
    async fn test_failed_action_halts_execution() {
        let h = harness();
        let mut wf = workflow(Vec::new());
        wf.actions = vec![
            ActionNode {
                id: Uuid::new_v4(),
                name: "call missing function".to_string(),
                action_type: ActionType::RunFunction,
                config: json!({ "name": "not_registered" }),
                order: 0,
                branch: None,
                branch_value: None,
            },
            task_action("after failure", 1, None, None),
        ];
        h.store.save_workflow(wf.clone()).await.unwrap();

        let execution = h.engine.start(&wf, json!({})).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.error_message.is_some());
        assert!(task_titles(&h.records).is_empty());
    }

    #[tokio::test]
    async fn test_approval_suspends_then_resumes() {
        let h = harness();
        let mut wf = workflow(Vec::new());
        wf.actions = vec![
            task_action("before", 0, None, None),
            ActionNode {
                id: Uuid::new_v4(),
                name: "manager sign-off".to_string(),
                action_type: ActionType::Approval,
                config: json!({ "approvers": ["manager@acme.test"] }),
                order: 1,
                branch: None,
                branch_value: None,
            },
            task_action("after", 2, None, None),
        ];
        h.store.save_workflow(wf.clone()).await.unwrap();

        let execution = h.engine.start(&wf, json!({})).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::WaitingForApproval);
        assert_eq!(task_titles(&h.records), vec!["before"]);

        let approval = h
            .store
            .pending_approval(execution.id, execution.current_step.unwrap())
            .await
            .unwrap()
            .unwrap();
        let resumed = h
            .engine
            .handle_approval_decision(approval.id, true, "manager@acme.test")
            .await
            .unwrap();

        assert_eq!(resumed.status, ExecutionStatus::Completed);
        // "before" must not run a second time on resume
        assert_eq!(task_titles(&h.records), vec!["before", "after"]);
    }

    #[tokio::test]
    async fn test_rejected_approval_cancels() {
        let h = harness();
        let mut wf = workflow(Vec::new());
        wf.actions = vec![
            ActionNode {
                id: Uuid::new_v4(),
                name: "sign-off".to_string(),
                action_type: ActionType::Approval,
                config: json!({ "approvers": ["manager@acme.test"] }),
                order: 0,
                branch: None,
                branch_value: None,
            },
            task_action("after", 1, None, None),
        ];
        h.store.save_workflow(wf.clone()).await.unwrap();

        let execution = h.engine.start(&wf, json!({})).await.unwrap();
        let approval = h
            .store
            .pending_approval(execution.id, execution.current_step.unwrap())
            .await
            .unwrap()
            .unwrap();

        let cancelled = h
            .engine
            .handle_approval_decision(approval.id, false, "manager@acme.test")
            .await
            .unwrap();

        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        assert!(task_titles(&h.records).is_empty());
    }

    #[tokio::test]
    async fn test_delay_files_scheduled_resumption() {
        let h = harness();
        let mut wf = workflow(Vec::new());
        wf.actions = vec![
            ActionNode {
                id: Uuid::new_v4(),
                name: "wait a day".to_string(),
                action_type: ActionType::Delay,
                config: json!({ "delay_days": 1 }),
                order: 0,
                branch: None,
                branch_value: None,
            },
            task_action("after delay", 1, None, None),
        ];
        h.store.save_workflow(wf.clone()).await.unwrap();

        let execution = h.engine.start(&wf, json!({})).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::WaitingForApproval);

        let due = h.store.due_resumptions(Utc::now() + chrono::Duration::days(2)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].execution_id, execution.id);
        assert!(due[0].scheduled_for > Utc::now());

        // nothing due yet right now
        assert!(h.store.due_resumptions(Utc::now()).await.unwrap().is_empty());

        let resumed = h.engine.resume(execution.id).await.unwrap();
        assert_eq!(resumed.status, ExecutionStatus::Completed);
        assert_eq!(task_titles(&h.records), vec!["after delay"]);
    }

    #[tokio::test]
    async fn test_cancel_is_rejected_on_terminal_execution() {
        let h = harness();
        let wf = workflow(Vec::new());
        h.store.save_workflow(wf.clone()).await.unwrap();

        let execution = h.engine.start(&wf, json!({})).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);

        let err = h.engine.cancel(execution.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_replay_leaves_original_untouched() {
        let h = harness();
        let mut wf = workflow(Vec::new());
        wf.actions = vec![task_action("task", 0, None, None)];
        h.store.save_workflow(wf.clone()).await.unwrap();

        let original = h.engine.start(&wf, json!({ "lead": { "name": "Ada" } })).await.unwrap();
        let replayed = h.engine.replay(original.id).await.unwrap();

        assert_ne!(replayed.id, original.id);
        assert!(replayed.is_replay);
        assert_eq!(replayed.original_execution, Some(original.id));
        assert_eq!(replayed.status, ExecutionStatus::Completed);
        assert_eq!(replayed.trigger_payload, original.trigger_payload);

        let stored = h.store.get_execution(original.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert!(!stored.is_replay);

        assert_eq!(task_titles(&h.records).len(), 2);
    }

    #[tokio::test]
    async fn test_process_event_fans_out_to_listening_workflows() {
        let h = harness();
        let mut listening = workflow(Vec::new());
        listening.actions = vec![task_action("from listener", 0, None, None)];
        h.store.save_workflow(listening).await.unwrap();

        let mut other = workflow(Vec::new());
        if let Some(trigger) = other.trigger.as_mut() {
            trigger.event_name = events::DEAL_STAGE_CHANGED.to_string();
        }
        h.store.save_workflow(other).await.unwrap();

        let event = DomainEvent::new(
            events::LEAD_CREATED,
            json!({ "lead": { "name": "Ada" } }),
            "acme",
            EventSource::System,
        );
        let executions = h.engine.process_event(&event).await.unwrap();

        assert_eq!(executions.len(), 1);
        assert_eq!(task_titles(&h.records), vec!["from listener"]);
    }
}
