// Jobs module - background work: typed queue, workers, and the
// delayed-execution scheduler

pub mod queue;
pub mod scheduler;

pub use queue::{Job, JobError, JobQueue, JobWorkerPool};
pub use scheduler::{ResumptionScheduler, SchedulerError};
