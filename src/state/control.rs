//! Pause/resume operations over the durable run record.
//!
//! Each CLI invocation is a fresh process, so all coordination between
//! `start`, `pause`, `resume`, and `status` happens through the stored
//! [`RunState`]. The only legal transitions driven here are
//! `{working, idle} → paused` and `paused → idle`; terminal statuses are
//! never touched.

use chrono::Duration;
use tracing::{info, warn};

use crate::models::agent::AgentStatus;
use crate::state::store::StateStore;
use crate::{AppError, Result};

/// Age beyond which a record is considered stale: paused agents' working
/// directories and branches may no longer match reality.
#[must_use]
pub fn stale_after() -> Duration {
    Duration::hours(24)
}

/// Result of a pause operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PauseOutcome {
    /// Worker ids transitioned to `paused`.
    pub paused: Vec<String>,
    /// Worker ids left untouched (already paused, or terminal).
    pub skipped: Vec<String>,
}

impl PauseOutcome {
    /// Whether the operation changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.paused.is_empty()
    }
}

/// Result of a resume operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeOutcome {
    /// Worker ids transitioned back to `idle`.
    pub resumed: Vec<String>,
    /// Worker ids left untouched (not paused).
    pub skipped: Vec<String>,
    /// The record was older than the staleness window. When set and the
    /// operation was not forced, nothing was mutated: the caller must retry
    /// with the override flag.
    pub stale: bool,
}

impl ResumeOutcome {
    /// Whether the operation changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.resumed.is_empty()
    }
}

/// Pause every agent currently `working` or `idle`.
///
/// A no-op (reported, nothing written, `updated_at` untouched) when no
/// agent qualifies.
///
/// # Errors
///
/// - [`AppError::NotFound`] — no record exists for `epic_id`.
/// - [`AppError::Io`] — the record could not be read or written.
pub fn pause_all(store: &StateStore, epic_id: &str) -> Result<PauseOutcome> {
    let mut state = require_record(store, epic_id)?;
    let mut outcome = PauseOutcome::default();

    for agent in &mut state.active_agents {
        if agent.status.can_pause() {
            agent.status = AgentStatus::Paused;
            outcome.paused.push(agent.id.clone());
        } else {
            outcome.skipped.push(agent.id.clone());
        }
    }

    if outcome.is_noop() {
        info!(epic_id, "nothing to pause");
        return Ok(outcome);
    }

    state.touch();
    store.save(&state)?;
    info!(epic_id, paused = outcome.paused.len(), "agents paused");
    Ok(outcome)
}

/// Pause one named agent.
///
/// Already-paused (or terminal) agents are a reported no-op with no write.
///
/// # Errors
///
/// - [`AppError::NotFound`] — no record for `epic_id`, or `agent_id` is not
///   in the record; the latter lists the known worker ids.
/// - [`AppError::Io`] — the record could not be read or written.
pub fn pause_one(store: &StateStore, epic_id: &str, agent_id: &str) -> Result<PauseOutcome> {
    let mut state = require_record(store, epic_id)?;

    let known: Vec<String> = state.active_agents.iter().map(|a| a.id.clone()).collect();
    let Some(agent) = state.agent_mut(agent_id) else {
        return Err(AppError::NotFound(format!(
            "agent `{agent_id}` not found; known agents: [{}]",
            known.join(", ")
        )));
    };

    let mut outcome = PauseOutcome::default();
    if agent.status.can_pause() {
        agent.status = AgentStatus::Paused;
        outcome.paused.push(agent.id.clone());
        state.touch();
        store.save(&state)?;
        info!(epic_id, agent_id, "agent paused");
    } else {
        outcome.skipped.push(agent.id.clone());
        info!(epic_id, agent_id, status = ?agent.status, "agent not pausable, no-op");
    }

    Ok(outcome)
}

/// Resume every `paused` agent back to `idle`.
///
/// When the record is stale (older than 24 hours) and `force` is false, no
/// mutation happens and the outcome carries `stale = true` so the caller
/// can warn and require the override flag.
///
/// # Errors
///
/// - [`AppError::NotFound`] — no record exists for `epic_id`.
/// - [`AppError::Io`] — the record could not be read or written.
pub fn resume_all(store: &StateStore, epic_id: &str, force: bool) -> Result<ResumeOutcome> {
    let mut state = require_record(store, epic_id)?;
    let mut outcome = ResumeOutcome {
        stale: state.is_stale(stale_after()),
        ..ResumeOutcome::default()
    };

    if outcome.stale && !force {
        warn!(
            epic_id,
            updated_at = %state.updated_at,
            "record is stale; resume requires the override flag"
        );
        return Ok(outcome);
    }

    for agent in &mut state.active_agents {
        if agent.status == AgentStatus::Paused {
            agent.status = AgentStatus::Idle;
            outcome.resumed.push(agent.id.clone());
        } else {
            outcome.skipped.push(agent.id.clone());
        }
    }

    if outcome.is_noop() {
        info!(epic_id, "nothing to resume");
        return Ok(outcome);
    }

    state.touch();
    store.save(&state)?;
    info!(epic_id, resumed = outcome.resumed.len(), "agents resumed");
    Ok(outcome)
}

/// Resume one named agent.
///
/// A non-paused agent is a reported no-op with no mutation.
///
/// # Errors
///
/// - [`AppError::NotFound`] — no record for `epic_id`, or `agent_id` is not
///   in the record; the latter lists the known worker ids.
/// - [`AppError::Io`] — the record could not be read or written.
pub fn resume_one(
    store: &StateStore,
    epic_id: &str,
    agent_id: &str,
    force: bool,
) -> Result<ResumeOutcome> {
    let mut state = require_record(store, epic_id)?;
    let mut outcome = ResumeOutcome {
        stale: state.is_stale(stale_after()),
        ..ResumeOutcome::default()
    };

    if outcome.stale && !force {
        warn!(
            epic_id,
            updated_at = %state.updated_at,
            "record is stale; resume requires the override flag"
        );
        return Ok(outcome);
    }

    let known: Vec<String> = state.active_agents.iter().map(|a| a.id.clone()).collect();
    let Some(agent) = state.agent_mut(agent_id) else {
        return Err(AppError::NotFound(format!(
            "agent `{agent_id}` not found; known agents: [{}]",
            known.join(", ")
        )));
    };

    if agent.status == AgentStatus::Paused {
        agent.status = AgentStatus::Idle;
        outcome.resumed.push(agent.id.clone());
        state.touch();
        store.save(&state)?;
        info!(epic_id, agent_id, "agent resumed");
    } else {
        outcome.skipped.push(agent.id.clone());
        info!(epic_id, agent_id, status = ?agent.status, "agent not paused, no-op");
    }

    Ok(outcome)
}

/// Load the record for `epic_id` or fail with a not-found error.
fn require_record(store: &StateStore, epic_id: &str) -> Result<crate::models::run::RunState> {
    store.load(epic_id)?.ok_or_else(|| {
        AppError::NotFound(format!("no orchestration record for epic `{epic_id}`"))
    })
}
