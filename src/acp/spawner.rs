//! ACP agent process spawner.
//!
//! Spawns the long-lived agent subprocess for an orchestration run with:
//! - `kill_on_drop(true)` so the process is cleaned up automatically.
//! - `env_clear()` + a safe variable allowlist so credentials and other
//!   secrets from the orchestrator's environment never leak into the child.
//!
//! The spawner only establishes the stdio pipes. The JSON-RPC `initialize`
//! handshake is performed by the transport client after it takes ownership
//! of the streams.

use std::path::PathBuf;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{info, warn};

use crate::{AppError, Result};

// ── Environment allowlist ────────────────────────────────────────────────────

/// Environment variables inherited by the spawned agent process.
///
/// Every other variable is stripped via `env_clear()` before the child is
/// launched.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

// ── Configuration ────────────────────────────────────────────────────────────

/// Configuration for spawning an ACP agent process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Agent CLI binary (e.g. `claude`, `codex`).
    pub agent_cmd: String,
    /// Default arguments passed to the agent CLI.
    pub agent_args: Vec<String>,
    /// Workspace root directory; the child process starts in this directory.
    pub workspace_root: PathBuf,
}

// ── Connection handle ────────────────────────────────────────────────────────

/// Active stdio connection to a spawned ACP agent process.
///
/// The caller is responsible for keeping `child` alive (it has
/// `kill_on_drop(true)`) and for driving the reader/writer over the pipes.
#[derive(Debug)]
pub struct AcpConnection {
    /// Child process handle — kept alive so `kill_on_drop` works.
    pub child: Child,
    /// Agent's stdin for writing framed requests.
    pub stdin: ChildStdin,
    /// Agent's stdout for reading framed responses and notifications.
    pub stdout: ChildStdout,
}

// ── Spawner ──────────────────────────────────────────────────────────────────

/// Spawn an ACP agent process and capture its stdio pipes.
///
/// Builds a `tokio::process::Command` with `env_clear()` and only the
/// variables listed in [`ALLOWED_ENV_VARS`], starts the process in
/// `config.workspace_root`, and pipes stdin/stdout/stderr.
///
/// # Errors
///
/// - [`AppError::Agent`] (spawn kind) — OS spawn failure, or the stdio
///   pipes could not be captured.
pub fn spawn_agent(config: &SpawnConfig) -> Result<AcpConnection> {
    let mut cmd = Command::new(&config.agent_cmd);

    for arg in &config.agent_args {
        cmd.arg(arg);
    }

    // Strip inherited environment, then inject only the safe allowlist.
    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }

    cmd.current_dir(&config.workspace_root)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::agent_spawn(
            format!("failed to spawn agent `{}`: {err}", config.agent_cmd),
            None,
        )
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::agent_spawn("failed to capture agent stdin", None))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::agent_spawn("failed to capture agent stdout", None))?;

    info!(cmd = %config.agent_cmd, "agent process spawned");

    Ok(AcpConnection {
        child,
        stdin,
        stdout,
    })
}

/// Terminate the agent process with a grace period.
///
/// Waits up to `grace` for the child to exit on its own (it may have already
/// received EOF on its stdin); if it has not exited by then, force-kills it.
pub async fn shutdown_child(mut child: Child, grace: Duration) {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(exit)) => {
            info!(?exit, "agent process exited gracefully");
        }
        Ok(Err(err)) => {
            warn!(%err, "error waiting for agent process");
        }
        Err(_) => {
            warn!("agent process did not exit within grace period, forcing kill");
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to force-kill agent process");
            }
        }
    }
}
