// HTTP Handlers - REST surface for workflows, executions, events,
// approvals, webhook endpoints, and assignment rules

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiResult, AppError, ValidationBuilder};
use crate::assignment::{AssignmentRule, AssignmentStrategy};
use crate::jobs::{Job, JobQueue};
use crate::webhooks::WebhookEndpoint;
use crate::workflows::{
    compile, Condition, DomainEvent, EventSource, Execution, GraphInput, WorkflowDefinition,
    WorkflowStore,
};
use crate::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = crate::database::health_check(&state.db_pool).await;
    let status = if database { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "status": if database { "healthy" } else { "degraded" },
            "service": "tradewinds-automation",
            "database": database,
        })),
    )
}

fn check(payload: &impl Validate) -> Result<(), AppError> {
    payload.validate().map_err(|errors| {
        let mut builder = ValidationBuilder::new();
        for (field, field_errors) in errors.field_errors() {
            for e in field_errors {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                builder = builder.error(field, &message);
            }
        }
        builder
            .build()
            .unwrap_or_else(|| AppError::BadRequest("invalid request".to_string()))
    })
}

// --- Workflows ---

pub fn workflow_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_workflows).post(save_workflow))
        .route("/:id", get(get_workflow).put(update_workflow))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SaveWorkflowRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,
    pub description: Option<String>,
    #[validate(length(min = 1, message = "Tenant is required"))]
    pub tenant_id: String,
    /// Visual editor graph; compiled into trigger, branches, and actions
    pub graph: GraphInput,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant_id: String,
}

async fn save_workflow(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SaveWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<WorkflowDefinition>)> {
    check(&payload)?;
    let compiled = compile(&payload.graph)?;

    let mut workflow = WorkflowDefinition::new(&payload.tenant_id, &payload.name);
    workflow.description = payload.description;
    workflow.is_active = payload.is_active.unwrap_or(true);
    compiled.apply_to(&mut workflow);

    state.store.save_workflow(workflow.clone()).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn list_workflows(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TenantQuery>,
) -> ApiResult<Json<Vec<WorkflowDefinition>>> {
    Ok(Json(state.store.list_workflows(&query.tenant_id).await?))
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowDefinition>> {
    let workflow = state
        .store
        .get_workflow(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Workflow".to_string()))?;
    Ok(Json(workflow))
}

async fn update_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SaveWorkflowRequest>,
) -> ApiResult<Json<WorkflowDefinition>> {
    check(&payload)?;
    let compiled = compile(&payload.graph)?;

    let mut workflow = state
        .store
        .get_workflow(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Workflow".to_string()))?;
    workflow.name = payload.name;
    workflow.description = payload.description;
    workflow.is_active = payload.is_active.unwrap_or(workflow.is_active);
    compiled.apply_to(&mut workflow);

    state.store.save_workflow(workflow.clone()).await?;
    Ok(Json(workflow))
}

// --- Events ---

pub fn event_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(ingest_event))
}

#[derive(Debug, Deserialize, Validate)]
pub struct IngestEventRequest {
    #[validate(length(min = 1, message = "Event type is required"))]
    pub event_type: String,
    #[validate(length(min = 1, message = "Tenant is required"))]
    pub tenant_id: String,
    pub payload: serde_json::Value,
    pub source: Option<EventSource>,
}

async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<IngestEventRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    check(&payload)?;
    let event = DomainEvent::new(
        &payload.event_type,
        payload.payload,
        &payload.tenant_id,
        payload.source.unwrap_or(EventSource::Api),
    );
    let event_id = event.event_id;

    state
        .queue
        .enqueue(Job::Event(event))
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "event_id": event_id })),
    ))
}

// --- Executions ---

pub fn execution_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_executions))
        .route("/:id", get(get_execution))
        .route("/:id/cancel", post(cancel_execution))
        .route("/:id/replay", post(replay_execution))
}

#[derive(Debug, Deserialize)]
pub struct ExecutionListQuery {
    pub tenant_id: String,
    pub limit: Option<i64>,
}

async fn list_executions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExecutionListQuery>,
) -> ApiResult<Json<Vec<Execution>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(
        state.store.list_executions(&query.tenant_id, limit).await?,
    ))
}

async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Execution>> {
    let execution = state
        .store
        .get_execution(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Execution".to_string()))?;
    Ok(Json(execution))
}

async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Execution>> {
    Ok(Json(state.engine.cancel(id).await?))
}

async fn replay_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Execution>)> {
    let replayed = state.engine.replay(id).await?;
    Ok((StatusCode::CREATED, Json(replayed)))
}

// --- Approvals ---

pub fn approval_routes() -> Router<Arc<AppState>> {
    Router::new().route("/:id/decision", post(decide_approval))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApprovalDecisionRequest {
    pub approved: bool,
    #[validate(length(min = 1, message = "Decider is required"))]
    pub decided_by: String,
}

async fn decide_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ApprovalDecisionRequest>,
) -> ApiResult<Json<Execution>> {
    check(&payload)?;
    let execution = state
        .engine
        .handle_approval_decision(id, payload.approved, &payload.decided_by)
        .await?;
    Ok(Json(execution))
}

// --- Webhook endpoints ---

pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(save_endpoint))
        .route("/:id", get(get_endpoint))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SaveEndpointRequest {
    #[validate(length(min = 1, message = "Tenant is required"))]
    pub tenant_id: String,
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,
    #[validate(url(message = "URL must be valid"))]
    pub url: String,
    #[validate(length(min = 1, message = "Secret is required"))]
    pub secret: String,
    pub method: Option<String>,
    pub headers: Option<serde_json::Value>,
    pub signature_header: Option<String>,
    pub rate_limit: Option<i64>,
    pub rate_limit_period_seconds: Option<i64>,
    pub retry_attempts: Option<i32>,
    pub timeout_seconds: Option<u64>,
}

async fn save_endpoint(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SaveEndpointRequest>,
) -> ApiResult<(StatusCode, Json<WebhookEndpoint>)> {
    check(&payload)?;

    let mut endpoint = WebhookEndpoint::new(
        &payload.tenant_id,
        &payload.name,
        &payload.url,
        &payload.secret,
    );
    if let Some(method) = payload.method {
        endpoint.method = method;
    }
    if let Some(headers) = payload.headers {
        endpoint.headers = headers;
    }
    if let Some(header) = payload.signature_header {
        endpoint.signature_header = header;
    }
    if let Some(limit) = payload.rate_limit {
        endpoint.rate_limit = limit;
    }
    if let Some(period) = payload.rate_limit_period_seconds {
        endpoint.rate_limit_period_seconds = period;
    }
    if let Some(attempts) = payload.retry_attempts {
        endpoint.retry_attempts = attempts;
    }
    if let Some(timeout) = payload.timeout_seconds {
        endpoint.timeout_seconds = timeout;
    }

    state.store.save_endpoint(endpoint.clone()).await?;
    Ok((StatusCode::CREATED, Json(endpoint)))
}

async fn get_endpoint(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WebhookEndpoint>> {
    let endpoint = state
        .store
        .get_endpoint(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Webhook endpoint".to_string()))?;
    Ok(Json(endpoint))
}

// --- Assignment rules ---

pub fn assignment_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(save_assignment_rule))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SaveAssignmentRuleRequest {
    #[validate(length(min = 1, message = "Tenant is required"))]
    pub tenant_id: String,
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,
    #[validate(length(min = 1, message = "Entity type is required"))]
    pub entity_type: String,
    pub strategy: AssignmentStrategy,
    pub criteria: Option<serde_json::Value>,
    pub candidate_ids: Vec<Uuid>,
    pub priority: Option<i32>,
}

async fn save_assignment_rule(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SaveAssignmentRuleRequest>,
) -> ApiResult<(StatusCode, Json<AssignmentRule>)> {
    check(&payload)?;

    let criteria = payload
        .criteria
        .as_ref()
        .map(Condition::normalize)
        .unwrap_or_default();
    let rule = AssignmentRule::new(
        &payload.tenant_id,
        &payload.name,
        &payload.entity_type,
        payload.strategy,
        payload.candidate_ids,
    )
    .with_criteria(criteria)
    .with_priority(payload.priority.unwrap_or(0));

    state.store.save_assignment_rule(rule.clone()).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}
