use axum::{
    http::Method,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod assignment;
mod config;
mod database;
mod error;
mod handlers;
mod jobs;
mod services;
mod webhooks;
mod workflows;

pub use error::{ApiError, ApiResult, AppError};

#[cfg(test)]
mod tests;

use assignment::AssignmentSelector;
use jobs::{JobQueue, JobWorkerPool, ResumptionScheduler};
use services::{ChatNotifier, FunctionRegistry, Mailer, PgRecords, RecordService, SmtpMailer};
use webhooks::WebhookDeliveryService;
use workflows::{ActionDispatcher, PgStore, WorkflowEngine, WorkflowStore};

pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub store: Arc<dyn WorkflowStore>,
    pub engine: Arc<WorkflowEngine>,
    pub queue: JobQueue,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let store: Arc<dyn WorkflowStore> = Arc::new(PgStore::new(db_pool.clone()));
    let webhooks = Arc::new(WebhookDeliveryService::new(store.clone()));
    if !config.smtp.is_configured() {
        tracing::warn!("SMTP is not fully configured; send_email actions will fail");
    }
    let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::new(&config.smtp));
    let records: Arc<dyn RecordService> = Arc::new(PgRecords::new(db_pool.clone()));
    let dispatcher = ActionDispatcher::new(
        mailer,
        ChatNotifier::new(),
        records,
        webhooks.clone(),
        AssignmentSelector::new(store.clone()),
        Arc::new(FunctionRegistry::new()),
    );
    let engine = Arc::new(WorkflowEngine::new(store.clone(), Arc::new(dispatcher)));

    let (queue, rx) = JobQueue::new(config.job_queue_capacity);
    JobWorkerPool::new(engine.clone(), webhooks.clone()).spawn(rx, config.job_workers);
    let _scheduler = ResumptionScheduler::start(store.clone(), queue.clone()).await?;

    let app_state = Arc::new(AppState {
        db_pool,
        store,
        engine,
        queue,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "Tradewinds Automation API v0.1.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/workflows", handlers::workflow_routes())
        .nest("/api/v1/events", handlers::event_routes())
        .nest("/api/v1/executions", handlers::execution_routes())
        .nest("/api/v1/approvals", handlers::approval_routes())
        .nest("/api/v1/webhook-endpoints", handlers::webhook_routes())
        .nest("/api/v1/assignment-rules", handlers::assignment_routes())
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
