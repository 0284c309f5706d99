//! Durable orchestration state: file-backed store plus the pause/resume
//! operations that coordinate separate CLI invocations.

pub mod control;
pub mod store;

pub use control::{pause_all, pause_one, resume_all, resume_one, PauseOutcome, ResumeOutcome};
pub use store::StateStore;
