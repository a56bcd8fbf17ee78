// Workflow Actions - action catalog and execution results

use serde::{Deserialize, Serialize};

/// Types of actions that workflow steps can execute
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    // Notification actions
    SendEmail,
    SendSlack,
    SendTeams,
    SendWhatsapp,

    // Record actions
    CreateTask,
    CreateCase,
    CreateNba,
    UpdateField,
    AssignOwner,

    // Integration actions
    Webhook,
    RunFunction,

    // Control flow (suspension points, handled by the engine itself)
    Approval,
    Delay,
}

impl ActionType {
    /// Suspension points stop the step loop instead of dispatching.
    pub fn is_suspension(&self) -> bool {
        matches!(self, ActionType::Approval | ActionType::Delay)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SendEmail => "send_email",
            ActionType::SendSlack => "send_slack",
            ActionType::SendTeams => "send_teams",
            ActionType::SendWhatsapp => "send_whatsapp",
            ActionType::CreateTask => "create_task",
            ActionType::CreateCase => "create_case",
            ActionType::CreateNba => "create_nba",
            ActionType::UpdateField => "update_field",
            ActionType::AssignOwner => "assign_owner",
            ActionType::Webhook => "webhook",
            ActionType::RunFunction => "run_function",
            ActionType::Approval => "approval",
            ActionType::Delay => "delay",
        }
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown action type '{}'", s))
    }
}

/// Result of executing an action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub duration_ms: i64,
}

impl ActionResult {
    pub fn success(output: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            output,
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failure(error: &str) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.to_string()),
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_action_type_round_trip() {
        let parsed = ActionType::from_str("send_whatsapp").unwrap();
        assert_eq!(parsed, ActionType::SendWhatsapp);
        assert_eq!(parsed.as_str(), "send_whatsapp");
    }

    #[test]
    fn test_unknown_action_type_is_err() {
        assert!(ActionType::from_str("teleport").is_err());
    }

    #[test]
    fn test_suspension_points() {
        assert!(ActionType::Approval.is_suspension());
        assert!(ActionType::Delay.is_suspension());
        assert!(!ActionType::SendEmail.is_suspension());
    }

    #[test]
    fn test_action_result() {
        let ok = ActionResult::success(Some(serde_json::json!({"task_id": "123"})));
        assert!(ok.success);

        let failed = ActionResult::failure("mail relay unreachable").with_duration(12);
        assert!(!failed.success);
        assert_eq!(failed.duration_ms, 12);
        assert!(failed.error.is_some());
    }
}
