// Webhook Delivery - signed HTTP delivery with rate limiting and auto-disable

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use super::{sign_payload, DeliveryStatus, RateLimiter, WebhookDeliveryRecord, WebhookEndpoint};
use crate::workflows::{StoreError, WorkflowStore};

/// Maximum response body length kept on a delivery record.
const RESPONSE_BODY_CAP: usize = 5000;

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered { record_id: Uuid },
    Failed { record_id: Uuid, error: String },
    RateLimited,
    Inactive,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

pub struct WebhookDeliveryService {
    store: Arc<dyn WorkflowStore>,
    limiter: RateLimiter,
    client: reqwest::Client,
}

impl WebhookDeliveryService {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            store,
            limiter: RateLimiter::new(),
            client: reqwest::Client::new(),
        }
    }

    /// One delivery attempt: active check, rate limit, sign, send, and
    /// endpoint bookkeeping. Every attempt leaves a delivery record.
    pub async fn deliver(
        &self,
        endpoint_id: Uuid,
        payload: &serde_json::Value,
        event_type: &str,
    ) -> Result<DeliveryOutcome, StoreError> {
        self.deliver_attempt(endpoint_id, payload, event_type, 1).await
    }

    /// Bounded retry loop with a fixed delay between attempts. Rate
    /// limited and inactive outcomes are returned as-is; retrying them
    /// would only burn the window or hit a disabled endpoint again.
    pub async fn deliver_with_retry(
        &self,
        endpoint_id: Uuid,
        payload: &serde_json::Value,
        event_type: &str,
    ) -> Result<DeliveryOutcome, StoreError> {
        let endpoint = self
            .store
            .get_endpoint(endpoint_id)
            .await?
            .ok_or(StoreError::NotFound("webhook endpoint"))?;
        let attempts = endpoint.retry_attempts.max(1);

        let mut outcome = DeliveryOutcome::Inactive;
        for attempt in 1..=attempts {
            outcome = self
                .deliver_attempt(endpoint_id, payload, event_type, attempt)
                .await?;

            match &outcome {
                DeliveryOutcome::Delivered { .. }
                | DeliveryOutcome::RateLimited
                | DeliveryOutcome::Inactive => return Ok(outcome),
                DeliveryOutcome::Failed { error, .. } => {
                    if attempt < attempts {
                        warn!(
                            "Webhook delivery to {} failed (attempt {}/{}): {}",
                            endpoint.name, attempt, attempts, error
                        );
                        tokio::time::sleep(Duration::from_secs(endpoint.retry_delay_seconds)).await;
                    }
                }
            }
        }

        Ok(outcome)
    }

    async fn deliver_attempt(
        &self,
        endpoint_id: Uuid,
        payload: &serde_json::Value,
        event_type: &str,
        attempt: i32,
    ) -> Result<DeliveryOutcome, StoreError> {
        let endpoint = self
            .store
            .get_endpoint(endpoint_id)
            .await?
            .ok_or(StoreError::NotFound("webhook endpoint"))?;

        if !endpoint.active {
            return Ok(DeliveryOutcome::Inactive);
        }

        if !self.limiter.try_acquire(
            endpoint.id,
            endpoint.rate_limit,
            Duration::from_secs(endpoint.rate_limit_period_seconds as u64),
        ) {
            let mut record = WebhookDeliveryRecord::new(
                endpoint.id,
                event_type,
                payload.clone(),
                serde_json::json!({}),
                attempt,
            );
            record.status = DeliveryStatus::RateLimited;
            self.store.insert_delivery_record(record).await?;
            return Ok(DeliveryOutcome::RateLimited);
        }

        let signature = sign_payload(&endpoint.secret, payload, endpoint.signature_algorithm)?;

        let mut headers = serde_json::Map::new();
        if let Some(custom) = endpoint.headers.as_object() {
            for (key, value) in custom {
                headers.insert(key.clone(), value.clone());
            }
        }
        headers.insert(
            endpoint.signature_header.clone(),
            serde_json::Value::String(signature),
        );

        let mut record = WebhookDeliveryRecord::new(
            endpoint.id,
            event_type,
            payload.clone(),
            serde_json::Value::Object(headers.clone()),
            attempt,
        );
        let record_id = record.id;
        self.store.insert_delivery_record(record.clone()).await?;

        let start = Instant::now();
        let response = self
            .build_request(&endpoint, payload, &headers)
            .send()
            .await;
        record.duration_ms = start.elapsed().as_millis() as i64;

        match response {
            Ok(response) => {
                let status = response.status();
                let mut body = response.text().await.unwrap_or_default();
                body.truncate(RESPONSE_BODY_CAP);

                record.response_status = Some(status.as_u16() as i32);
                record.response_body = Some(body);

                if status.is_success() {
                    record.status = DeliveryStatus::Delivered;
                    self.store.update_delivery_record(&record).await?;
                    self.store.record_endpoint_success(endpoint.id).await?;
                    info!("Webhook '{}' delivered ({})", endpoint.name, status);
                    Ok(DeliveryOutcome::Delivered { record_id })
                } else {
                    let error = format!("endpoint returned {}", status);
                    record.status = DeliveryStatus::Failed;
                    record.error_message = Some(error.clone());
                    self.store.update_delivery_record(&record).await?;
                    self.bookkeep_failure(&endpoint).await?;
                    Ok(DeliveryOutcome::Failed { record_id, error })
                }
            }
            Err(e) => {
                let error = e.to_string();
                record.status = if e.is_timeout() {
                    DeliveryStatus::Timeout
                } else {
                    DeliveryStatus::Failed
                };
                record.error_message = Some(error.clone());
                self.store.update_delivery_record(&record).await?;
                self.bookkeep_failure(&endpoint).await?;
                Ok(DeliveryOutcome::Failed { record_id, error })
            }
        }
    }

    fn build_request(
        &self,
        endpoint: &WebhookEndpoint,
        payload: &serde_json::Value,
        headers: &serde_json::Map<String, serde_json::Value>,
    ) -> reqwest::RequestBuilder {
        let mut request = match endpoint.method.to_uppercase().as_str() {
            "PUT" => self.client.put(&endpoint.url),
            "PATCH" => self.client.patch(&endpoint.url),
            _ => self.client.post(&endpoint.url),
        };

        for (key, value) in headers {
            if let Some(v) = value.as_str() {
                request = request.header(key, v);
            }
        }

        request
            .timeout(Duration::from_secs(endpoint.timeout_seconds))
            .json(payload)
    }

    async fn bookkeep_failure(&self, endpoint: &WebhookEndpoint) -> Result<(), StoreError> {
        let failures = self.store.record_endpoint_failure(endpoint.id).await?;
        if failures >= endpoint.disabled_after_failures {
            warn!(
                "Webhook endpoint '{}' disabled after {} consecutive failures",
                endpoint.name, failures
            );
        }
        Ok(())
    }
}
