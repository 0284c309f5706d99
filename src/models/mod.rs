//! Domain models: persisted agent assignments, the orchestration run
//! record, and the consumed execution plan.

pub mod agent;
pub mod plan;
pub mod run;

pub use agent::{AgentStatus, SerializedAgent};
pub use plan::{ExecutionPlan, PlanPhase, WorkItem};
pub use run::RunState;
