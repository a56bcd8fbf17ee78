// Workflow Triggers - domain events that can start workflow executions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known event names. Workflows may also subscribe to custom
/// dotted event names emitted by integrations.
pub mod events {
    pub const LEAD_CREATED: &str = "lead.created";
    pub const LEAD_UPDATED: &str = "lead.updated";
    pub const LEAD_CONVERTED: &str = "lead.converted";
    pub const ACCOUNT_CREATED: &str = "account.created";
    pub const CONTACT_CREATED: &str = "contact.created";
    pub const DEAL_CREATED: &str = "deal.created";
    pub const DEAL_STAGE_CHANGED: &str = "deal.stage_changed";
    pub const DEAL_WON: &str = "deal.won";
    pub const DEAL_LOST: &str = "deal.lost";
    pub const CASE_CREATED: &str = "case.created";
    pub const TASK_COMPLETED: &str = "task.completed";
}

/// A domain event that can initiate workflow executions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub tenant_id: String,
    pub source: EventSource,
    pub timestamp: DateTime<Utc>,
}

/// Source of the event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventSource {
    System,
    User(Uuid),
    Api,
    Scheduler,
    Integration(String),
}

impl DomainEvent {
    pub fn new(event_type: &str, payload: serde_json::Value, tenant_id: &str, source: EventSource) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            payload,
            tenant_id: tenant_id.to_string(),
            source,
            timestamp: Utc::now(),
        }
    }

    /// Create a lead created event
    pub fn lead_created(
        lead_id: Uuid,
        tenant_id: &str,
        name: &str,
        email: &str,
        source_channel: &str,
        rating: &str,
    ) -> Self {
        Self::new(
            events::LEAD_CREATED,
            serde_json::json!({
                "lead_id": lead_id,
                "name": name,
                "email": email,
                "source": source_channel,
                "rating": rating
            }),
            tenant_id,
            EventSource::System,
        )
    }

    /// Create a deal stage changed event
    pub fn deal_stage_changed(
        deal_id: Uuid,
        tenant_id: &str,
        old_stage: &str,
        new_stage: &str,
        amount: f64,
        changed_by: Uuid,
    ) -> Self {
        Self::new(
            events::DEAL_STAGE_CHANGED,
            serde_json::json!({
                "deal_id": deal_id,
                "old_stage": old_stage,
                "new_stage": new_stage,
                "amount": amount,
                "changed_by": changed_by
            }),
            tenant_id,
            EventSource::User(changed_by),
        )
    }

    /// Create a case created event
    pub fn case_created(
        case_id: Uuid,
        tenant_id: &str,
        subject: &str,
        priority: &str,
        account_id: Option<Uuid>,
    ) -> Self {
        Self::new(
            events::CASE_CREATED,
            serde_json::json!({
                "case_id": case_id,
                "subject": subject,
                "priority": priority,
                "account_id": account_id
            }),
            tenant_id,
            EventSource::System,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = DomainEvent::lead_created(
            Uuid::new_v4(),
            "acme",
            "Ada Lovelace",
            "ada@acme.io",
            "webform",
            "hot",
        );

        assert_eq!(event.event_type, events::LEAD_CREATED);
        assert_eq!(event.tenant_id, "acme");
        assert!(event.payload.get("email").is_some());
    }

    #[test]
    fn test_deal_stage_changed_event() {
        let event = DomainEvent::deal_stage_changed(
            Uuid::new_v4(),
            "acme",
            "qualification",
            "negotiation",
            25_000.0,
            Uuid::new_v4(),
        );

        assert_eq!(event.event_type, events::DEAL_STAGE_CHANGED);
        assert_eq!(event.payload.get("new_stage").unwrap(), "negotiation");
    }
}
