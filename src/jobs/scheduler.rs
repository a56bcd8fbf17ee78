// Resumption Scheduler - cron tick that wakes delayed executions
//
// Every tick collects scheduled resumptions that have come due, marks
// them executed, and enqueues a resume job for each. Marking before
// enqueueing keeps a crashed enqueue from double-firing on the next
// tick; the failed mark is logged instead.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler, JobSchedulerError};
use tracing::{error, info};

use crate::jobs::queue::{Job, JobQueue};
use crate::workflows::nodes::ResumptionStatus;
use crate::workflows::store::{StoreError, WorkflowStore};

const TICK_SCHEDULE: &str = "*/30 * * * * *";

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("scheduler error: {0}")]
    Cron(#[from] JobSchedulerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ResumptionScheduler {
    scheduler: JobScheduler,
}

impl ResumptionScheduler {
    /// Build and start the cron scheduler with the resumption tick.
    pub async fn start(
        store: Arc<dyn WorkflowStore>,
        queue: JobQueue,
    ) -> Result<Self, SchedulerError> {
        let scheduler = JobScheduler::new().await?;

        let tick = CronJob::new_async(TICK_SCHEDULE, move |_job_id, _scheduler| {
            let store = store.clone();
            let queue = queue.clone();
            Box::pin(async move {
                if let Err(e) = fire_due_resumptions(store, queue).await {
                    error!("Resumption tick failed: {}", e);
                }
            })
        })?;
        scheduler.add(tick).await?;
        scheduler.start().await?;

        info!("Resumption scheduler started ({})", TICK_SCHEDULE);
        Ok(Self { scheduler })
    }

    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        self.scheduler.shutdown().await?;
        Ok(())
    }
}

/// One scheduler tick, separated from the cron wiring for testability.
async fn fire_due_resumptions(
    store: Arc<dyn WorkflowStore>,
    queue: JobQueue,
) -> Result<(), SchedulerError> {
    let due = store.due_resumptions(Utc::now()).await?;
    if due.is_empty() {
        return Ok(());
    }

    info!("Waking {} delayed execution(s)", due.len());
    for resumption in due {
        store
            .mark_resumption(resumption.id, ResumptionStatus::Executed)
            .await?;
        if let Err(e) = queue
            .enqueue(Job::Resume {
                execution_id: resumption.execution_id,
            })
            .await
        {
            error!(
                "Failed to enqueue resume for execution {}: {}",
                resumption.execution_id, e
            );
            store
                .mark_resumption(resumption.id, ResumptionStatus::Failed)
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::nodes::ScheduledResumption;
    use crate::workflows::store::MemoryStore;
    use chrono::Duration;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_due_resumption_is_marked_and_enqueued() {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn WorkflowStore> = store.clone();
        let execution_id = Uuid::new_v4();
        let resumption = ScheduledResumption::new(
            execution_id,
            Uuid::new_v4(),
            Utc::now() - Duration::minutes(1),
            json!({}),
        );
        let resumption_id = resumption.id;
        dyn_store.insert_resumption(resumption).await.unwrap();

        let (queue, mut rx) = JobQueue::new(4);
        fire_due_resumptions(dyn_store.clone(), queue).await.unwrap();

        match rx.recv().await {
            Some(Job::Resume { execution_id: got }) => assert_eq!(got, execution_id),
            other => panic!("unexpected job: {:?}", other),
        }
        let stored = store.get_resumption(resumption_id).await.unwrap();
        assert_eq!(stored.status, ResumptionStatus::Executed);
    }

    #[tokio::test]
    async fn test_future_resumption_is_left_alone() {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn WorkflowStore> = store.clone();
        let resumption = ScheduledResumption::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Utc::now() + Duration::hours(1),
            json!({}),
        );
        let resumption_id = resumption.id;
        dyn_store.insert_resumption(resumption).await.unwrap();

        let (queue, mut rx) = JobQueue::new(4);
        fire_due_resumptions(dyn_store.clone(), queue).await.unwrap();

        assert!(rx.try_recv().is_err());
        let stored = store.get_resumption(resumption_id).await.unwrap();
        assert_eq!(stored.status, ResumptionStatus::Pending);
    }
}
