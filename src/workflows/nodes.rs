// Workflow Nodes - compiled workflow structure and execution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ActionType, Condition};

/// A compiled, executable workflow. Node collections are produced by the
/// graph compiler and replaced wholesale on every recompile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub trigger: Option<TriggerNode>,
    pub branches: Vec<BranchNode>,
    pub actions: Vec<ActionNode>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Event gate for a workflow: event name plus entry conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerNode {
    pub id: Uuid,
    pub event_name: String,
    pub conditions: Vec<Condition>,
}

/// A conditional decision point. `parent_branch`/`parent_branch_value`
/// place nested branches on the true or false path of an outer branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchNode {
    pub id: Uuid,
    pub condition: Condition,
    pub parent_branch: Option<Uuid>,
    pub parent_branch_value: Option<bool>,
    pub order: i32,
}

/// A single executable step. `branch`/`branch_value` scope the action to
/// one side of a branch; `order` is monotonic within that scope and
/// resets to 0 at the start of each scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionNode {
    pub id: Uuid,
    pub name: String,
    pub action_type: ActionType,
    pub config: serde_json::Value,
    pub order: i32,
    pub branch: Option<Uuid>,
    pub branch_value: Option<bool>,
}

/// One run of a workflow for one triggering event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub tenant_id: String,
    pub status: ExecutionStatus,
    pub trigger_payload: serde_json::Value,
    pub current_step: Option<Uuid>,
    pub current_branch: Option<Uuid>,
    pub current_branch_value: Option<bool>,
    pub context: serde_json::Value,
    pub error_message: Option<String>,
    pub is_replay: bool,
    pub original_execution: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    WaitingForApproval,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl ExecutionStatus {
    /// Terminal states are final; no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::WaitingForApproval => "waiting_for_approval",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Skipped => "skipped",
        }
    }
}

impl WorkflowDefinition {
    pub fn new(tenant_id: &str, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            description: None,
            trigger: None,
            branches: Vec::new(),
            actions: Vec::new(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

impl Execution {
    pub fn new(workflow_id: Uuid, tenant_id: &str, trigger_payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            tenant_id: tenant_id.to_string(),
            status: ExecutionStatus::Pending,
            trigger_payload,
            current_step: None,
            current_branch: None,
            current_branch_value: None,
            context: serde_json::json!({}),
            error_message: None,
            is_replay: false,
            original_execution: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Clone the triggering payload into a fresh execution referencing
    /// this one. The source execution is never mutated.
    pub fn replay(&self) -> Self {
        let mut replay = Self::new(self.workflow_id, &self.tenant_id, self.trigger_payload.clone());
        replay.is_replay = true;
        replay.original_execution = Some(self.id);
        replay
    }
}

/// A pending approval decision tied to one suspension point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub action_id: Uuid,
    pub approvers: Vec<String>,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalRequest {
    pub fn new(execution_id: Uuid, action_id: Uuid, approvers: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            action_id,
            approvers,
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
            decided_by: None,
        }
    }
}

/// A timer-fired continuation for a delay suspension point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledResumption {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub action_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub status: ResumptionStatus,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ResumptionStatus {
    Pending,
    Executed,
    Cancelled,
    Failed,
}

impl ScheduledResumption {
    pub fn new(
        execution_id: Uuid,
        action_id: Uuid,
        scheduled_for: DateTime<Utc>,
        context: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            action_id,
            scheduled_for,
            status: ResumptionStatus::Pending,
            context,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_execution_is_pending() {
        let execution = Execution::new(Uuid::new_v4(), "acme", serde_json::json!({"x": 1}));
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert!(!execution.is_replay);
        assert!(execution.current_step.is_none());
    }

    #[test]
    fn test_replay_references_original() {
        let original = Execution::new(Uuid::new_v4(), "acme", serde_json::json!({"x": 1}));
        let replay = original.replay();

        assert!(replay.is_replay);
        assert_eq!(replay.original_execution, Some(original.id));
        assert_eq!(replay.status, ExecutionStatus::Pending);
        assert_eq!(replay.trigger_payload, original.trigger_payload);
        assert_ne!(replay.id, original.id);
    }

    #[test]
    fn test_terminal_states() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Skipped.is_terminal());
        assert!(!ExecutionStatus::WaitingForApproval.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
    }
}
