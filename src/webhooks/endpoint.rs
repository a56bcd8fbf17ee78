// Webhook Endpoints - outbound destinations and the per-attempt audit log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    Sha256,
    Sha1,
}

/// A configured outbound HTTP destination with signing, rate-limit, and
/// retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub url: String,
    pub method: String,
    pub headers: serde_json::Value,
    pub secret: String,
    pub signature_algorithm: SignatureAlgorithm,
    pub signature_header: String,
    pub timeout_seconds: u64,
    pub retry_attempts: i32,
    pub retry_delay_seconds: u64,
    pub rate_limit: i64,
    pub rate_limit_period_seconds: i64,
    pub failure_count: i32,
    pub disabled_after_failures: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl WebhookEndpoint {
    pub fn new(tenant_id: &str, name: &str, url: &str, secret: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            method: "POST".to_string(),
            headers: serde_json::json!({}),
            secret: secret.to_string(),
            signature_algorithm: SignatureAlgorithm::Sha256,
            signature_header: "X-Webhook-Signature".to_string(),
            timeout_seconds: 10,
            retry_attempts: 3,
            retry_delay_seconds: 5,
            rate_limit: 60,
            rate_limit_period_seconds: 60,
            failure_count: 0,
            disabled_after_failures: 5,
            active: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Failed,
    Retrying,
    Timeout,
    RateLimited,
}

/// One delivery attempt. The record is created with status `sent` before
/// the request goes out, then updated with the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDeliveryRecord {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub event_type: String,
    pub request_payload: serde_json::Value,
    pub request_headers: serde_json::Value,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub attempt: i32,
    pub duration_ms: i64,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

impl WebhookDeliveryRecord {
    pub fn new(
        endpoint_id: Uuid,
        event_type: &str,
        request_payload: serde_json::Value,
        request_headers: serde_json::Value,
        attempt: i32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint_id,
            event_type: event_type.to_string(),
            request_payload,
            request_headers,
            response_status: None,
            response_body: None,
            error_message: None,
            attempt,
            duration_ms: 0,
            status: DeliveryStatus::Sent,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_defaults() {
        let endpoint = WebhookEndpoint::new("acme", "crm sink", "https://example.com/hook", "s3cret");
        assert!(endpoint.active);
        assert_eq!(endpoint.method, "POST");
        assert_eq!(endpoint.failure_count, 0);
        assert_eq!(endpoint.signature_algorithm, SignatureAlgorithm::Sha256);
    }

    #[test]
    fn test_new_record_is_sent() {
        let record = WebhookDeliveryRecord::new(
            Uuid::new_v4(),
            "lead.created",
            serde_json::json!({"x": 1}),
            serde_json::json!({}),
            1,
        );
        assert_eq!(record.status, DeliveryStatus::Sent);
        assert!(record.response_status.is_none());
    }
}
