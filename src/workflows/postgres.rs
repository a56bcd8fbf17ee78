// Postgres Store - sqlx-backed implementation of the workflow store
//
// Nested structures (conditions, graph nodes, headers) live in JSONB
// columns; enum columns are TEXT in their serde snake_case spelling.
// The round-robin cursor and endpoint failure counter are advanced in
// single UPDATE .. RETURNING statements so concurrent callers never
// read a stale value.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::assignment::{AssignmentRule, Candidate};
use crate::webhooks::{WebhookDeliveryRecord, WebhookEndpoint};
use crate::workflows::nodes::{
    ApprovalRequest, ApprovalStatus, Execution, ExecutionStatus, ResumptionStatus,
    ScheduledResumption, WorkflowDefinition,
};
use crate::workflows::store::{StoreError, WorkflowStore};

pub struct PgStore {
    db_pool: PgPool,
}

impl PgStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

fn to_text<T: Serialize>(value: &T) -> Result<String, StoreError> {
    match serde_json::to_value(value)? {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

fn from_text<T: DeserializeOwned>(raw: String) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::String(raw))?)
}

fn row_to_workflow(row: &PgRow) -> Result<WorkflowDefinition, StoreError> {
    let trigger: Option<Value> = row.try_get("trigger")?;
    Ok(WorkflowDefinition {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        trigger: trigger.map(serde_json::from_value).transpose()?,
        branches: serde_json::from_value(row.try_get("branches")?)?,
        actions: serde_json::from_value(row.try_get("actions")?)?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_execution(row: &PgRow) -> Result<Execution, StoreError> {
    Ok(Execution {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        tenant_id: row.try_get("tenant_id")?,
        status: from_text(row.try_get("status")?)?,
        trigger_payload: row.try_get("trigger_payload")?,
        current_step: row.try_get("current_step")?,
        current_branch: row.try_get("current_branch")?,
        current_branch_value: row.try_get("current_branch_value")?,
        context: row.try_get("context")?,
        error_message: row.try_get("error_message")?,
        is_replay: row.try_get("is_replay")?,
        original_execution: row.try_get("original_execution")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn row_to_approval(row: &PgRow) -> Result<ApprovalRequest, StoreError> {
    Ok(ApprovalRequest {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        action_id: row.try_get("action_id")?,
        approvers: serde_json::from_value(row.try_get("approvers")?)?,
        status: from_text(row.try_get("status")?)?,
        created_at: row.try_get("created_at")?,
        decided_at: row.try_get("decided_at")?,
        decided_by: row.try_get("decided_by")?,
    })
}

fn row_to_resumption(row: &PgRow) -> Result<ScheduledResumption, StoreError> {
    Ok(ScheduledResumption {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        action_id: row.try_get("action_id")?,
        scheduled_for: row.try_get("scheduled_for")?,
        status: from_text(row.try_get("status")?)?,
        context: row.try_get("context")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_endpoint(row: &PgRow) -> Result<WebhookEndpoint, StoreError> {
    Ok(WebhookEndpoint {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        method: row.try_get("method")?,
        headers: row.try_get("headers")?,
        secret: row.try_get("secret")?,
        signature_algorithm: from_text(row.try_get("signature_algorithm")?)?,
        signature_header: row.try_get("signature_header")?,
        timeout_seconds: row.try_get::<i64, _>("timeout_seconds")? as u64,
        retry_attempts: row.try_get("retry_attempts")?,
        retry_delay_seconds: row.try_get::<i64, _>("retry_delay_seconds")? as u64,
        rate_limit: row.try_get("rate_limit")?,
        rate_limit_period_seconds: row.try_get("rate_limit_period_seconds")?,
        failure_count: row.try_get("failure_count")?,
        disabled_after_failures: row.try_get("disabled_after_failures")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_rule(row: &PgRow) -> Result<AssignmentRule, StoreError> {
    Ok(AssignmentRule {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        entity_type: row.try_get("entity_type")?,
        strategy: from_text(row.try_get("strategy")?)?,
        criteria: serde_json::from_value(row.try_get("criteria")?)?,
        candidate_ids: serde_json::from_value(row.try_get("candidate_ids")?)?,
        priority: row.try_get("priority")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_candidate(row: &PgRow) -> Result<Candidate, StoreError> {
    Ok(Candidate {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        active: row.try_get("active")?,
        territories: serde_json::from_value(row.try_get("territories")?)?,
    })
}

/// Table and open-state predicate used for load-balanced assignment
/// counts, per entity tag.
fn open_filter(entity_type: &str) -> Option<(&'static str, &'static str)> {
    match entity_type {
        "lead" => Some(("leads", "status NOT IN ('converted', 'lost')")),
        "deal" => Some(("deals", "stage NOT IN ('won', 'lost')")),
        "case" => Some(("cases", "status <> 'closed'")),
        "contact" => Some(("contacts", "TRUE")),
        "account" => Some(("accounts", "TRUE")),
        _ => None,
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn save_workflow(&self, workflow: WorkflowDefinition) -> Result<(), StoreError> {
        let trigger = workflow
            .trigger
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        sqlx::query(
            "INSERT INTO workflows
                 (id, tenant_id, name, description, trigger, branches, actions, is_active, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
             ON CONFLICT (id) DO UPDATE SET
                 name = EXCLUDED.name,
                 description = EXCLUDED.description,
                 trigger = EXCLUDED.trigger,
                 branches = EXCLUDED.branches,
                 actions = EXCLUDED.actions,
                 is_active = EXCLUDED.is_active,
                 updated_at = NOW()",
        )
        .bind(workflow.id)
        .bind(&workflow.tenant_id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(trigger)
        .bind(serde_json::to_value(&workflow.branches)?)
        .bind(serde_json::to_value(&workflow.actions)?)
        .bind(workflow.is_active)
        .bind(workflow.created_at)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, StoreError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;
        row.as_ref().map(row_to_workflow).transpose()
    }

    async fn list_workflows(&self, tenant_id: &str) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM workflows WHERE tenant_id = $1 ORDER BY created_at",
        )
        .bind(tenant_id)
        .fetch_all(&self.db_pool)
        .await?;
        rows.iter().map(row_to_workflow).collect()
    }

    async fn workflows_for_event(
        &self,
        tenant_id: &str,
        event_name: &str,
    ) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM workflows
             WHERE tenant_id = $1 AND is_active = TRUE AND trigger->>'event_name' = $2
             ORDER BY created_at",
        )
        .bind(tenant_id)
        .bind(event_name)
        .fetch_all(&self.db_pool)
        .await?;
        rows.iter().map(row_to_workflow).collect()
    }

    async fn insert_execution(&self, execution: Execution) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO executions
                 (id, workflow_id, tenant_id, status, trigger_payload, current_step,
                  current_branch, current_branch_value, context, error_message,
                  is_replay, original_execution, started_at, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(&execution.tenant_id)
        .bind(to_text(&execution.status)?)
        .bind(&execution.trigger_payload)
        .bind(execution.current_step)
        .bind(execution.current_branch)
        .bind(execution.current_branch_value)
        .bind(&execution.context)
        .bind(&execution.error_message)
        .bind(execution.is_replay)
        .bind(execution.original_execution)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;
        row.as_ref().map(row_to_execution).transpose()
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE executions SET
                 status = $2, current_step = $3, current_branch = $4,
                 current_branch_value = $5, context = $6, error_message = $7,
                 completed_at = $8
             WHERE id = $1",
        )
        .bind(execution.id)
        .bind(to_text(&execution.status)?)
        .bind(execution.current_step)
        .bind(execution.current_branch)
        .bind(execution.current_branch_value)
        .bind(&execution.context)
        .bind(&execution.error_message)
        .bind(execution.completed_at)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn execution_status(&self, id: Uuid) -> Result<Option<ExecutionStatus>, StoreError> {
        let row = sqlx::query("SELECT status FROM executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(|r| from_text(r.try_get("status")?)).transpose()
    }

    async fn list_executions(
        &self,
        tenant_id: &str,
        limit: i64,
    ) -> Result<Vec<Execution>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM executions WHERE tenant_id = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.db_pool)
        .await?;
        rows.iter().map(row_to_execution).collect()
    }

    async fn insert_approval(&self, request: ApprovalRequest) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO approval_requests
                 (id, execution_id, action_id, approvers, status, created_at, decided_at, decided_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(request.id)
        .bind(request.execution_id)
        .bind(request.action_id)
        .bind(serde_json::to_value(&request.approvers)?)
        .bind(to_text(&request.status)?)
        .bind(request.created_at)
        .bind(request.decided_at)
        .bind(&request.decided_by)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn get_approval(&self, id: Uuid) -> Result<Option<ApprovalRequest>, StoreError> {
        let row = sqlx::query("SELECT * FROM approval_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;
        row.as_ref().map(row_to_approval).transpose()
    }

    async fn pending_approval(
        &self,
        execution_id: Uuid,
        action_id: Uuid,
    ) -> Result<Option<ApprovalRequest>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM approval_requests
             WHERE execution_id = $1 AND action_id = $2 AND status = 'pending'
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(execution_id)
        .bind(action_id)
        .fetch_optional(&self.db_pool)
        .await?;
        row.as_ref().map(row_to_approval).transpose()
    }

    async fn decide_approval(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        decided_by: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE approval_requests
             SET status = $2, decided_at = NOW(), decided_by = $3
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(to_text(&status)?)
        .bind(decided_by)
        .execute(&self.db_pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("pending approval request"));
        }
        Ok(())
    }

    async fn insert_resumption(&self, resumption: ScheduledResumption) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO scheduled_resumptions
                 (id, execution_id, action_id, scheduled_for, status, context, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(resumption.id)
        .bind(resumption.execution_id)
        .bind(resumption.action_id)
        .bind(resumption.scheduled_for)
        .bind(to_text(&resumption.status)?)
        .bind(&resumption.context)
        .bind(resumption.created_at)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn due_resumptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledResumption>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM scheduled_resumptions
             WHERE status = 'pending' AND scheduled_for <= $1
             ORDER BY scheduled_for",
        )
        .bind(now)
        .fetch_all(&self.db_pool)
        .await?;
        rows.iter().map(row_to_resumption).collect()
    }

    async fn mark_resumption(&self, id: Uuid, status: ResumptionStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE scheduled_resumptions SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(to_text(&status)?)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn save_endpoint(&self, endpoint: WebhookEndpoint) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO webhook_endpoints
                 (id, tenant_id, name, url, method, headers, secret, signature_algorithm,
                  signature_header, timeout_seconds, retry_attempts, retry_delay_seconds,
                  rate_limit, rate_limit_period_seconds, failure_count,
                  disabled_after_failures, active, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
             ON CONFLICT (id) DO UPDATE SET
                 name = EXCLUDED.name,
                 url = EXCLUDED.url,
                 method = EXCLUDED.method,
                 headers = EXCLUDED.headers,
                 secret = EXCLUDED.secret,
                 signature_algorithm = EXCLUDED.signature_algorithm,
                 signature_header = EXCLUDED.signature_header,
                 timeout_seconds = EXCLUDED.timeout_seconds,
                 retry_attempts = EXCLUDED.retry_attempts,
                 retry_delay_seconds = EXCLUDED.retry_delay_seconds,
                 rate_limit = EXCLUDED.rate_limit,
                 rate_limit_period_seconds = EXCLUDED.rate_limit_period_seconds,
                 active = EXCLUDED.active",
        )
        .bind(endpoint.id)
        .bind(&endpoint.tenant_id)
        .bind(&endpoint.name)
        .bind(&endpoint.url)
        .bind(&endpoint.method)
        .bind(&endpoint.headers)
        .bind(&endpoint.secret)
        .bind(to_text(&endpoint.signature_algorithm)?)
        .bind(&endpoint.signature_header)
        .bind(endpoint.timeout_seconds as i64)
        .bind(endpoint.retry_attempts)
        .bind(endpoint.retry_delay_seconds as i64)
        .bind(endpoint.rate_limit)
        .bind(endpoint.rate_limit_period_seconds)
        .bind(endpoint.failure_count)
        .bind(endpoint.disabled_after_failures)
        .bind(endpoint.active)
        .bind(endpoint.created_at)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn get_endpoint(&self, id: Uuid) -> Result<Option<WebhookEndpoint>, StoreError> {
        let row = sqlx::query("SELECT * FROM webhook_endpoints WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?;
        row.as_ref().map(row_to_endpoint).transpose()
    }

    async fn record_endpoint_success(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE webhook_endpoints SET failure_count = 0 WHERE id = $1")
            .bind(id)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn record_endpoint_failure(&self, id: Uuid) -> Result<i32, StoreError> {
        let row = sqlx::query(
            "UPDATE webhook_endpoints
             SET failure_count = failure_count + 1,
                 active = CASE
                     WHEN failure_count + 1 >= disabled_after_failures THEN FALSE
                     ELSE active
                 END
             WHERE id = $1
             RETURNING failure_count",
        )
        .bind(id)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(StoreError::NotFound("webhook endpoint"))?;
        Ok(row.try_get("failure_count")?)
    }

    async fn insert_delivery_record(
        &self,
        record: WebhookDeliveryRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO webhook_deliveries
                 (id, endpoint_id, event_type, request_payload, request_headers,
                  response_status, response_body, error_message, attempt, duration_ms,
                  status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(record.id)
        .bind(record.endpoint_id)
        .bind(&record.event_type)
        .bind(&record.request_payload)
        .bind(&record.request_headers)
        .bind(record.response_status)
        .bind(&record.response_body)
        .bind(&record.error_message)
        .bind(record.attempt)
        .bind(record.duration_ms)
        .bind(to_text(&record.status)?)
        .bind(record.created_at)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn update_delivery_record(
        &self,
        record: &WebhookDeliveryRecord,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE webhook_deliveries SET
                 response_status = $2, response_body = $3, error_message = $4,
                 duration_ms = $5, status = $6
             WHERE id = $1",
        )
        .bind(record.id)
        .bind(record.response_status)
        .bind(&record.response_body)
        .bind(&record.error_message)
        .bind(record.duration_ms)
        .bind(to_text(&record.status)?)
        .execute(&self.db_pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("delivery record"));
        }
        Ok(())
    }

    async fn save_assignment_rule(&self, rule: AssignmentRule) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO assignment_rules
                 (id, tenant_id, name, entity_type, strategy, criteria, candidate_ids,
                  priority, is_active, round_robin_cursor, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, $10)
             ON CONFLICT (id) DO UPDATE SET
                 name = EXCLUDED.name,
                 entity_type = EXCLUDED.entity_type,
                 strategy = EXCLUDED.strategy,
                 criteria = EXCLUDED.criteria,
                 candidate_ids = EXCLUDED.candidate_ids,
                 priority = EXCLUDED.priority,
                 is_active = EXCLUDED.is_active",
        )
        .bind(rule.id)
        .bind(&rule.tenant_id)
        .bind(&rule.name)
        .bind(&rule.entity_type)
        .bind(to_text(&rule.strategy)?)
        .bind(serde_json::to_value(&rule.criteria)?)
        .bind(serde_json::to_value(&rule.candidate_ids)?)
        .bind(rule.priority)
        .bind(rule.is_active)
        .bind(rule.created_at)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn assignment_rules(
        &self,
        tenant_id: &str,
        entity_type: &str,
    ) -> Result<Vec<AssignmentRule>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM assignment_rules
             WHERE tenant_id = $1 AND entity_type = $2 AND is_active = TRUE
             ORDER BY priority DESC, created_at",
        )
        .bind(tenant_id)
        .bind(entity_type)
        .fetch_all(&self.db_pool)
        .await?;
        rows.iter().map(row_to_rule).collect()
    }

    async fn get_candidates(&self, ids: &[Uuid]) -> Result<Vec<Candidate>, StoreError> {
        let rows = sqlx::query("SELECT * FROM candidates WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.db_pool)
            .await?;
        rows.iter().map(row_to_candidate).collect()
    }

    async fn advance_round_robin(
        &self,
        rule_id: Uuid,
        pool_size: usize,
    ) -> Result<usize, StoreError> {
        if pool_size == 0 {
            return Err(StoreError::NotFound("round robin pool"));
        }
        let row = sqlx::query(
            "UPDATE assignment_rules
             SET round_robin_cursor = (round_robin_cursor + 1) % $2
             WHERE id = $1
             RETURNING round_robin_cursor",
        )
        .bind(rule_id)
        .bind(pool_size as i64)
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or(StoreError::NotFound("assignment rule"))?;
        let cursor: i64 = row.try_get("round_robin_cursor")?;
        Ok(cursor as usize)
    }

    async fn count_open_assignments(
        &self,
        entity_type: &str,
        candidate_id: Uuid,
    ) -> Result<i64, StoreError> {
        let (table, predicate) = match open_filter(entity_type) {
            Some(filter) => filter,
            None => return Ok(0),
        };
        // table and predicate come from the static entity map
        let query = format!(
            "SELECT COUNT(*) AS open_count FROM {} WHERE owner_id = $1 AND {}",
            table, predicate
        );
        let row = sqlx::query(&query)
            .bind(candidate_id.to_string())
            .fetch_one(&self.db_pool)
            .await?;
        Ok(row.try_get("open_count")?)
    }
}
