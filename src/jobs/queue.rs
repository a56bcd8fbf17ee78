// Job Queue - typed in-process queue for engine work
//
// Three job kinds cover everything the engine defers: incoming domain
// events, suspended-execution resumptions, and outbound webhook
// deliveries. Workers share one receiver and drain it until the queue
// side is dropped.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::webhooks::WebhookDeliveryService;
use crate::workflows::{DomainEvent, WorkflowEngine};

#[derive(Debug, Clone)]
pub enum Job {
    Event(DomainEvent),
    Resume { execution_id: Uuid },
    WebhookDelivery {
        endpoint_id: Uuid,
        event_type: String,
        payload: serde_json::Value,
    },
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("job queue is closed")]
    QueueClosed,
}

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn enqueue(&self, job: Job) -> Result<(), JobError> {
        self.tx.send(job).await.map_err(|_| JobError::QueueClosed)
    }
}

pub struct JobWorkerPool {
    engine: Arc<WorkflowEngine>,
    webhooks: Arc<WebhookDeliveryService>,
}

impl JobWorkerPool {
    pub fn new(engine: Arc<WorkflowEngine>, webhooks: Arc<WebhookDeliveryService>) -> Self {
        Self { engine, webhooks }
    }

    /// Spawn `workers` tasks draining the queue. Handles are returned so
    /// the caller can await shutdown in tests.
    pub fn spawn(self, rx: mpsc::Receiver<Job>, workers: usize) -> Vec<JoinHandle<()>> {
        let rx = Arc::new(Mutex::new(rx));
        let pool = Arc::new(self);

        (0..workers.max(1))
            .map(|worker_id| {
                let rx = rx.clone();
                let pool = pool.clone();
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = rx.lock().await;
                            rx.recv().await
                        };
                        match job {
                            Some(job) => pool.handle(job).await,
                            None => break,
                        }
                    }
                    info!("Job worker {} stopped", worker_id);
                })
            })
            .collect()
    }

    async fn handle(&self, job: Job) {
        match job {
            Job::Event(event) => {
                if let Err(e) = self.engine.process_event(&event).await {
                    error!("Failed to process event '{}': {}", event.event_type, e);
                }
            }
            Job::Resume { execution_id } => {
                if let Err(e) = self.engine.resume(execution_id).await {
                    error!("Failed to resume execution {}: {}", execution_id, e);
                }
            }
            Job::WebhookDelivery {
                endpoint_id,
                event_type,
                payload,
            } => {
                if let Err(e) = self
                    .webhooks
                    .deliver_with_retry(endpoint_id, &payload, &event_type)
                    .await
                {
                    error!("Webhook delivery to endpoint {} errored: {}", endpoint_id, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::AssignmentSelector;
    use crate::services::{ChatNotifier, FunctionRegistry, MemoryRecords, RecordingMailer};
    use crate::workflows::executor::ActionDispatcher;
    use crate::workflows::nodes::{ExecutionStatus, TriggerNode, WorkflowDefinition};
    use crate::workflows::store::{MemoryStore, WorkflowStore};
    use crate::workflows::triggers::{events, EventSource};
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_enqueue_and_receive() {
        let (queue, mut rx) = JobQueue::new(4);
        let execution_id = Uuid::new_v4();

        queue.enqueue(Job::Resume { execution_id }).await.unwrap();

        match rx.recv().await {
            Some(Job::Resume { execution_id: got }) => assert_eq!(got, execution_id),
            other => panic!("unexpected job: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_enqueue_fails_after_receiver_drop() {
        let (queue, rx) = JobQueue::new(1);
        drop(rx);

        let err = queue
            .enqueue(Job::Resume { execution_id: Uuid::new_v4() })
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::QueueClosed));
    }

    #[tokio::test]
    async fn test_worker_runs_event_job() {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn WorkflowStore> = store.clone();
        let webhooks = Arc::new(WebhookDeliveryService::new(dyn_store.clone()));
        let dispatcher = ActionDispatcher::new(
            Arc::new(RecordingMailer::default()),
            ChatNotifier::new(),
            Arc::new(MemoryRecords::default()),
            webhooks.clone(),
            AssignmentSelector::new(dyn_store.clone()),
            Arc::new(FunctionRegistry::new()),
        );
        let engine = Arc::new(WorkflowEngine::new(dyn_store, Arc::new(dispatcher)));

        let workflow = WorkflowDefinition {
            id: Uuid::new_v4(),
            tenant_id: "acme".to_string(),
            name: "on lead".to_string(),
            description: None,
            trigger: Some(TriggerNode {
                id: Uuid::new_v4(),
                event_name: events::LEAD_CREATED.to_string(),
                conditions: Vec::new(),
            }),
            branches: Vec::new(),
            actions: Vec::new(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
        };
        store.save_workflow(workflow).await.unwrap();

        let (queue, rx) = JobQueue::new(4);
        let handles = JobWorkerPool::new(engine, webhooks).spawn(rx, 2);

        let event = DomainEvent::new(
            events::LEAD_CREATED,
            json!({ "lead": { "name": "Ada" } }),
            "acme",
            EventSource::System,
        );
        queue.enqueue(Job::Event(event)).await.unwrap();
        drop(queue);
        for handle in handles {
            handle.await.unwrap();
        }

        let executions = store.list_executions("acme", 10).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Completed);
    }
}
