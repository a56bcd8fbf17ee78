// Workflows module - event-triggered automation engine
//
// Graph definitions compile into a trigger, branch scopes, and ordered
// actions; the engine walks them per execution, suspending at approval
// and delay points and resuming from persisted state.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod graph;
pub mod nodes;
pub mod postgres;
pub mod store;
pub mod triggers;

pub use actions::{ActionResult, ActionType};
pub use conditions::{evaluate_all, lookup_path, Condition, ConditionOperator};
pub use engine::{EngineError, WorkflowEngine};
pub use executor::{resolve_templates, ActionDispatcher};
pub use graph::{compile, CompileError, CompiledWorkflow, GraphInput};
pub use nodes::{
    ActionNode, ApprovalRequest, ApprovalStatus, BranchNode, Execution, ExecutionStatus,
    ResumptionStatus, ScheduledResumption, TriggerNode, WorkflowDefinition,
};
pub use postgres::PgStore;
pub use store::{MemoryStore, StoreError, WorkflowStore};
pub use triggers::{events, DomainEvent, EventSource};
