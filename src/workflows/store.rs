// Workflow Store - persistence seam for the engine

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ApprovalRequest, ApprovalStatus, Execution, ExecutionStatus, ResumptionStatus,
    ScheduledResumption, WorkflowDefinition,
};
use crate::assignment::{AssignmentRule, Candidate};
use crate::webhooks::{WebhookDeliveryRecord, WebhookEndpoint};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
}

/// Persistence operations the engine needs. Counter updates
/// (`advance_round_robin`, `record_endpoint_failure`) must be atomic:
/// concurrent callers may not observe intermediate values.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    // Workflow definitions
    async fn save_workflow(&self, workflow: WorkflowDefinition) -> Result<(), StoreError>;
    async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, StoreError>;
    async fn list_workflows(&self, tenant_id: &str) -> Result<Vec<WorkflowDefinition>, StoreError>;
    /// Active workflows whose trigger subscribes to the given event name.
    async fn workflows_for_event(
        &self,
        tenant_id: &str,
        event_name: &str,
    ) -> Result<Vec<WorkflowDefinition>, StoreError>;

    // Executions
    async fn insert_execution(&self, execution: Execution) -> Result<(), StoreError>;
    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError>;
    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError>;
    async fn execution_status(&self, id: Uuid) -> Result<Option<ExecutionStatus>, StoreError>;
    async fn list_executions(
        &self,
        tenant_id: &str,
        limit: i64,
    ) -> Result<Vec<Execution>, StoreError>;

    // Approval requests
    async fn insert_approval(&self, request: ApprovalRequest) -> Result<(), StoreError>;
    async fn get_approval(&self, id: Uuid) -> Result<Option<ApprovalRequest>, StoreError>;
    async fn pending_approval(
        &self,
        execution_id: Uuid,
        action_id: Uuid,
    ) -> Result<Option<ApprovalRequest>, StoreError>;
    async fn decide_approval(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        decided_by: &str,
    ) -> Result<(), StoreError>;

    // Scheduled resumptions
    async fn insert_resumption(&self, resumption: ScheduledResumption) -> Result<(), StoreError>;
    async fn due_resumptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledResumption>, StoreError>;
    async fn mark_resumption(&self, id: Uuid, status: ResumptionStatus) -> Result<(), StoreError>;

    // Webhook endpoints and delivery audit log
    async fn save_endpoint(&self, endpoint: WebhookEndpoint) -> Result<(), StoreError>;
    async fn get_endpoint(&self, id: Uuid) -> Result<Option<WebhookEndpoint>, StoreError>;
    /// Reset the consecutive failure counter after a successful delivery.
    async fn record_endpoint_success(&self, id: Uuid) -> Result<(), StoreError>;
    /// Increment the failure counter, deactivating the endpoint once the
    /// threshold is reached, in one atomic update. Returns the new count.
    async fn record_endpoint_failure(&self, id: Uuid) -> Result<i32, StoreError>;
    async fn insert_delivery_record(
        &self,
        record: WebhookDeliveryRecord,
    ) -> Result<(), StoreError>;
    async fn update_delivery_record(
        &self,
        record: &WebhookDeliveryRecord,
    ) -> Result<(), StoreError>;

    // Assignment rules
    async fn save_assignment_rule(&self, rule: AssignmentRule) -> Result<(), StoreError>;
    /// Active rules for an entity type, highest priority first.
    async fn assignment_rules(
        &self,
        tenant_id: &str,
        entity_type: &str,
    ) -> Result<Vec<AssignmentRule>, StoreError>;
    async fn get_candidates(&self, ids: &[Uuid]) -> Result<Vec<Candidate>, StoreError>;
    /// Advance the rule's round-robin cursor over `pool_size` slots and
    /// return the selected slot, in one atomic update.
    async fn advance_round_robin(&self, rule_id: Uuid, pool_size: usize)
        -> Result<usize, StoreError>;
    async fn count_open_assignments(
        &self,
        entity_type: &str,
        candidate_id: Uuid,
    ) -> Result<i64, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    workflows: HashMap<Uuid, WorkflowDefinition>,
    executions: HashMap<Uuid, Execution>,
    approvals: HashMap<Uuid, ApprovalRequest>,
    resumptions: HashMap<Uuid, ScheduledResumption>,
    endpoints: HashMap<Uuid, WebhookEndpoint>,
    deliveries: Vec<WebhookDeliveryRecord>,
    rules: HashMap<Uuid, AssignmentRule>,
    cursors: HashMap<Uuid, usize>,
    candidates: HashMap<Uuid, Candidate>,
    open_assignments: HashMap<(String, Uuid), i64>,
}

/// In-memory store. Used by tests and as the reference semantics for the
/// Postgres implementation; every trait method holds the write lock for
/// the whole operation, so counter updates are atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Test fixtures outside the trait surface

    pub async fn insert_candidate(&self, candidate: Candidate) {
        let mut state = self.state.write().await;
        state.candidates.insert(candidate.id, candidate);
    }

    pub async fn set_open_assignments(&self, entity_type: &str, candidate_id: Uuid, count: i64) {
        let mut state = self.state.write().await;
        state
            .open_assignments
            .insert((entity_type.to_string(), candidate_id), count);
    }

    pub async fn delivery_records(&self, endpoint_id: Uuid) -> Vec<WebhookDeliveryRecord> {
        let state = self.state.read().await;
        state
            .deliveries
            .iter()
            .filter(|r| r.endpoint_id == endpoint_id)
            .cloned()
            .collect()
    }

    pub async fn get_resumption(&self, id: Uuid) -> Option<ScheduledResumption> {
        let state = self.state.read().await;
        state.resumptions.get(&id).cloned()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn save_workflow(&self, workflow: WorkflowDefinition) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.workflows.insert(workflow.id, workflow);
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, StoreError> {
        let state = self.state.read().await;
        Ok(state.workflows.get(&id).cloned())
    }

    async fn list_workflows(&self, tenant_id: &str) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let state = self.state.read().await;
        let mut workflows: Vec<_> = state
            .workflows
            .values()
            .filter(|w| w.tenant_id == tenant_id)
            .cloned()
            .collect();
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(workflows)
    }

    async fn workflows_for_event(
        &self,
        tenant_id: &str,
        event_name: &str,
    ) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let state = self.state.read().await;
        let mut workflows: Vec<_> = state
            .workflows
            .values()
            .filter(|w| {
                w.is_active
                    && w.tenant_id == tenant_id
                    && w.trigger
                        .as_ref()
                        .map(|t| t.event_name == event_name)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(workflows)
    }

    async fn insert_execution(&self, execution: Execution) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.executions.insert(execution.id, execution);
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, StoreError> {
        let state = self.state.read().await;
        Ok(state.executions.get(&id).cloned())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn execution_status(&self, id: Uuid) -> Result<Option<ExecutionStatus>, StoreError> {
        let state = self.state.read().await;
        Ok(state.executions.get(&id).map(|e| e.status))
    }

    async fn list_executions(
        &self,
        tenant_id: &str,
        limit: i64,
    ) -> Result<Vec<Execution>, StoreError> {
        let state = self.state.read().await;
        let mut executions: Vec<_> = state
            .executions
            .values()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions.truncate(limit as usize);
        Ok(executions)
    }

    async fn insert_approval(&self, request: ApprovalRequest) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.approvals.insert(request.id, request);
        Ok(())
    }

    async fn get_approval(&self, id: Uuid) -> Result<Option<ApprovalRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(state.approvals.get(&id).cloned())
    }

    async fn pending_approval(
        &self,
        execution_id: Uuid,
        action_id: Uuid,
    ) -> Result<Option<ApprovalRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .approvals
            .values()
            .find(|a| {
                a.execution_id == execution_id
                    && a.action_id == action_id
                    && a.status == ApprovalStatus::Pending
            })
            .cloned())
    }

    async fn decide_approval(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        decided_by: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let approval = state
            .approvals
            .get_mut(&id)
            .ok_or(StoreError::NotFound("approval request"))?;
        approval.status = status;
        approval.decided_at = Some(Utc::now());
        approval.decided_by = Some(decided_by.to_string());
        Ok(())
    }

    async fn insert_resumption(&self, resumption: ScheduledResumption) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.resumptions.insert(resumption.id, resumption);
        Ok(())
    }

    async fn due_resumptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledResumption>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .resumptions
            .values()
            .filter(|r| r.status == ResumptionStatus::Pending && r.scheduled_for <= now)
            .cloned()
            .collect())
    }

    async fn mark_resumption(&self, id: Uuid, status: ResumptionStatus) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let resumption = state
            .resumptions
            .get_mut(&id)
            .ok_or(StoreError::NotFound("scheduled resumption"))?;
        resumption.status = status;
        Ok(())
    }

    async fn save_endpoint(&self, endpoint: WebhookEndpoint) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.endpoints.insert(endpoint.id, endpoint);
        Ok(())
    }

    async fn get_endpoint(&self, id: Uuid) -> Result<Option<WebhookEndpoint>, StoreError> {
        let state = self.state.read().await;
        Ok(state.endpoints.get(&id).cloned())
    }

    async fn record_endpoint_success(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let endpoint = state
            .endpoints
            .get_mut(&id)
            .ok_or(StoreError::NotFound("webhook endpoint"))?;
        endpoint.failure_count = 0;
        Ok(())
    }

    async fn record_endpoint_failure(&self, id: Uuid) -> Result<i32, StoreError> {
        let mut state = self.state.write().await;
        let endpoint = state
            .endpoints
            .get_mut(&id)
            .ok_or(StoreError::NotFound("webhook endpoint"))?;
        endpoint.failure_count += 1;
        if endpoint.failure_count >= endpoint.disabled_after_failures {
            endpoint.active = false;
        }
        Ok(endpoint.failure_count)
    }

    async fn insert_delivery_record(
        &self,
        record: WebhookDeliveryRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.deliveries.push(record);
        Ok(())
    }

    async fn update_delivery_record(
        &self,
        record: &WebhookDeliveryRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        match state.deliveries.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound("delivery record")),
        }
    }

    async fn save_assignment_rule(&self, rule: AssignmentRule) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.rules.insert(rule.id, rule);
        Ok(())
    }

    async fn assignment_rules(
        &self,
        tenant_id: &str,
        entity_type: &str,
    ) -> Result<Vec<AssignmentRule>, StoreError> {
        let state = self.state.read().await;
        let mut rules: Vec<_> = state
            .rules
            .values()
            .filter(|r| r.is_active && r.tenant_id == tenant_id && r.entity_type == entity_type)
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(rules)
    }

    async fn get_candidates(&self, ids: &[Uuid]) -> Result<Vec<Candidate>, StoreError> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.candidates.get(id).cloned())
            .collect())
    }

    async fn advance_round_robin(
        &self,
        rule_id: Uuid,
        pool_size: usize,
    ) -> Result<usize, StoreError> {
        if pool_size == 0 {
            return Err(StoreError::NotFound("round-robin pool"));
        }
        let mut state = self.state.write().await;
        let cursor = state.cursors.entry(rule_id).or_insert(0);
        let selected = (*cursor + 1) % pool_size;
        *cursor = selected;
        Ok(selected)
    }

    async fn count_open_assignments(
        &self,
        entity_type: &str,
        candidate_id: Uuid,
    ) -> Result<i64, StoreError> {
        let state = self.state.read().await;
        Ok(*state
            .open_assignments
            .get(&(entity_type.to_string(), candidate_id))
            .unwrap_or(&0))
    }
}
