// Outbound webhook pipeline against a local mock receiver

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::tests::fixtures::TestContext;
use crate::webhooks::{sign_payload, DeliveryOutcome, DeliveryStatus, SignatureAlgorithm, WebhookEndpoint};
use crate::workflows::store::WorkflowStore;

async fn endpoint_for(ctx: &TestContext, server: &MockServer) -> WebhookEndpoint {
    let mut endpoint = WebhookEndpoint::new("acme", "crm sink", &format!("{}/hook", server.uri()), "s3cret");
    endpoint.retry_delay_seconds = 0;
    ctx.store.save_endpoint(endpoint.clone()).await.unwrap();
    endpoint
}

#[tokio::test]
async fn test_delivery_carries_hmac_signature() {
    let ctx = TestContext::new();
    let server = MockServer::start().await;
    let payload = json!({ "lead": { "id": 7 } });
    let signature = sign_payload("s3cret", &payload, SignatureAlgorithm::Sha256).unwrap();

    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("X-Webhook-Signature", signature.as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = endpoint_for(&ctx, &server).await;
    let outcome = ctx
        .webhooks
        .deliver(endpoint.id, &payload, "lead.created")
        .await
        .unwrap();

    assert!(outcome.is_delivered());
    let records = ctx.store.delivery_records(endpoint.id).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, DeliveryStatus::Delivered);
    assert_eq!(records[0].response_status, Some(200));

    let stored = ctx.store.get_endpoint(endpoint.id).await.unwrap().unwrap();
    assert_eq!(stored.failure_count, 0);
}

#[tokio::test]
async fn test_consecutive_failures_disable_endpoint() {
    let ctx = TestContext::new();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let mut endpoint = WebhookEndpoint::new("acme", "flaky sink", &format!("{}/hook", server.uri()), "s3cret");
    endpoint.disabled_after_failures = 2;
    endpoint.retry_delay_seconds = 0;
    ctx.store.save_endpoint(endpoint.clone()).await.unwrap();

    let payload = json!({});
    for _ in 0..2 {
        let outcome = ctx
            .webhooks
            .deliver(endpoint.id, &payload, "lead.created")
            .await
            .unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Failed { .. }));
    }

    let stored = ctx.store.get_endpoint(endpoint.id).await.unwrap().unwrap();
    assert_eq!(stored.failure_count, 2);
    assert!(!stored.active);

    // disabled endpoint short-circuits without an HTTP request
    let outcome = ctx
        .webhooks
        .deliver(endpoint.id, &payload, "lead.created")
        .await
        .unwrap();
    assert!(matches!(outcome, DeliveryOutcome::Inactive));
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let ctx = TestContext::new();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let endpoint = endpoint_for(&ctx, &server).await;
    let payload = json!({});

    let first = ctx
        .webhooks
        .deliver(endpoint.id, &payload, "lead.created")
        .await
        .unwrap();
    assert!(matches!(first, DeliveryOutcome::Failed { .. }));
    let stored = ctx.store.get_endpoint(endpoint.id).await.unwrap().unwrap();
    assert_eq!(stored.failure_count, 1);

    let second = ctx
        .webhooks
        .deliver(endpoint.id, &payload, "lead.created")
        .await
        .unwrap();
    assert!(second.is_delivered());
    let stored = ctx.store.get_endpoint(endpoint.id).await.unwrap().unwrap();
    assert_eq!(stored.failure_count, 0);
    assert!(stored.active);
}

#[tokio::test]
async fn test_rate_limit_rejects_excess_deliveries() {
    let ctx = TestContext::new();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let mut endpoint = WebhookEndpoint::new("acme", "chatty sink", &format!("{}/hook", server.uri()), "s3cret");
    endpoint.rate_limit = 2;
    ctx.store.save_endpoint(endpoint.clone()).await.unwrap();

    let payload = json!({});
    for _ in 0..2 {
        let outcome = ctx
            .webhooks
            .deliver(endpoint.id, &payload, "lead.created")
            .await
            .unwrap();
        assert!(outcome.is_delivered());
    }

    let third = ctx
        .webhooks
        .deliver(endpoint.id, &payload, "lead.created")
        .await
        .unwrap();
    assert!(matches!(third, DeliveryOutcome::RateLimited));

    let records = ctx.store.delivery_records(endpoint.id).await;
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].status, DeliveryStatus::RateLimited);
}

#[tokio::test]
async fn test_bounded_retry_logs_every_attempt() {
    let ctx = TestContext::new();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let endpoint = endpoint_for(&ctx, &server).await;
    let payload = json!({ "deal": { "id": 12 } });

    let outcome = ctx
        .webhooks
        .deliver_with_retry(endpoint.id, &payload, "deal.stage_changed")
        .await
        .unwrap();
    assert!(matches!(outcome, DeliveryOutcome::Failed { .. }));

    let records = ctx.store.delivery_records(endpoint.id).await;
    assert_eq!(records.len(), 3);
    let attempts: Vec<i32> = records.iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}
