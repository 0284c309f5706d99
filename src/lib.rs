#![forbid(unsafe_code)]

//! `agent-conductor` — orchestrates long-running AI coding-agent
//! subprocesses over the Agent Client Protocol (newline-delimited JSON-RPC
//! 2.0 on stdio), with pausable, resumable sessions coordinated through a
//! durable file-backed run record.

pub mod acp;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod session;
pub mod state;
mod sync;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
