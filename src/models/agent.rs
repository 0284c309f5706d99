//! Persisted agent assignment model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::SessionStatus;

/// Lifecycle status for a persisted agent assignment.
///
/// This is deliberately a distinct enum from the protocol-session
/// [`SessionStatus`]: the persisted status has `Paused` (a property of the
/// work assignment, recorded only in the durable store), which the live
/// protocol session never has. The mapping from protocol status is
/// [`AgentStatus::from`].
///
/// Legal transitions driven by pause/resume are `{working, idle} → paused`
/// and `paused → idle`; `completed` and `failed` are terminal and are never
/// touched by pause/resume.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Assigned but not currently prompting.
    Idle,
    /// Actively working a task.
    Working,
    /// Paused by the operator; skipped until resumed.
    Paused,
    /// Finished its task successfully.
    Completed,
    /// Failed its task.
    Failed,
}

impl AgentStatus {
    /// Whether the status is terminal (never mutated by pause/resume).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a pause operation may act on this status.
    #[must_use]
    pub fn can_pause(self) -> bool {
        matches!(self, Self::Working | Self::Idle)
    }
}

impl From<SessionStatus> for AgentStatus {
    /// Map a live protocol status onto the persisted status. The protocol
    /// has no notion of `Paused`; that state is only ever written by the
    /// pause operation.
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Idle => Self::Idle,
            SessionStatus::Working => Self::Working,
            SessionStatus::Completed => Self::Completed,
            SessionStatus::Failed => Self::Failed,
        }
    }
}

/// One agent's durable assignment record inside a [`crate::models::RunState`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SerializedAgent {
    /// Worker identifier (e.g. `worker-1`).
    pub id: String,
    /// Task the agent is assigned to.
    pub task_id: String,
    /// Human-readable task title.
    pub task_title: String,
    /// Git branch the agent works on.
    pub branch: String,
    /// Current assignment status.
    pub status: AgentStatus,
    /// Completion percentage, 0–100. Monotonically non-decreasing while the
    /// agent is `working` or `completed`.
    pub progress: u8,
    /// When the assignment started.
    pub started_at: DateTime<Utc>,
}

impl SerializedAgent {
    /// Construct a fresh `working` assignment starting now.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        task_id: impl Into<String>,
        task_title: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.into(),
            task_title: task_title.into(),
            branch: branch.into(),
            status: AgentStatus::Working,
            progress: 0,
            started_at: Utc::now(),
        }
    }
}
