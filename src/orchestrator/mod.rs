//! Orchestration run driver: walks an execution plan through agent
//! sessions while mirroring every status change into the durable store.

pub mod runner;

pub use runner::Orchestrator;
