pub mod webhook_pipeline;
pub mod workflow_runs;
