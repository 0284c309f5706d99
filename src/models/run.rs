//! Durable orchestration run record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::agent::{AgentStatus, SerializedAgent};

/// The externalized state of one orchestration run.
///
/// This record is the single source of truth between CLI invocations: no
/// in-memory state survives process exit, so `run`, `continue`, `status`,
/// `pause`, and `resume` all coordinate through it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    /// Epic this run belongs to; also the storage key.
    pub epic_id: String,
    /// Human-readable epic name.
    pub epic_name: String,
    /// When the run was first started.
    pub started_at: DateTime<Utc>,
    /// Last time this record was written. Resume operations treat records
    /// older than 24 hours as stale.
    pub updated_at: DateTime<Utc>,
    /// Current agent assignments.
    pub active_agents: Vec<SerializedAgent>,
    /// Work-item ids that finished successfully.
    pub completed_items: Vec<String>,
    /// Work-item ids that failed.
    pub failed_items: Vec<String>,
    /// Total work items in the plan.
    pub total_items: u32,
    /// Overall completion percentage, 0–100.
    pub progress: u8,
}

impl RunState {
    /// Start a fresh record for an epic.
    #[must_use]
    pub fn new(epic_id: impl Into<String>, epic_name: impl Into<String>, total_items: u32) -> Self {
        let now = Utc::now();
        Self {
            epic_id: epic_id.into(),
            epic_name: epic_name.into(),
            started_at: now,
            updated_at: now,
            active_agents: Vec::new(),
            completed_items: Vec::new(),
            failed_items: Vec::new(),
            total_items,
            progress: 0,
        }
    }

    /// Refresh `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Whether the record is older than `max_age`.
    #[must_use]
    pub fn is_stale(&self, max_age: Duration) -> bool {
        Utc::now() - self.updated_at > max_age
    }

    /// Look up an agent by worker id.
    #[must_use]
    pub fn agent(&self, agent_id: &str) -> Option<&SerializedAgent> {
        self.active_agents.iter().find(|a| a.id == agent_id)
    }

    /// Mutable lookup of an agent by worker id.
    pub fn agent_mut(&mut self, agent_id: &str) -> Option<&mut SerializedAgent> {
        self.active_agents.iter_mut().find(|a| a.id == agent_id)
    }

    /// Find the agent assigned to a task, if any.
    #[must_use]
    pub fn agent_for_task(&self, task_id: &str) -> Option<&SerializedAgent> {
        self.active_agents.iter().find(|a| a.task_id == task_id)
    }

    /// Insert or replace an agent record, matching by worker id.
    pub fn upsert_agent(&mut self, agent: SerializedAgent) {
        if let Some(existing) = self.agent_mut(&agent.id) {
            *existing = agent;
        } else {
            self.active_agents.push(agent);
        }
        self.touch();
    }

    /// Record an agent's progress, enforcing monotonicity: while the agent
    /// is `working` or `completed`, progress never decreases.
    pub fn record_progress(&mut self, agent_id: &str, progress: u8) {
        if let Some(agent) = self.agent_mut(agent_id) {
            if matches!(agent.status, AgentStatus::Working | AgentStatus::Completed)
                && progress > agent.progress
            {
                agent.progress = progress.min(100);
                self.touch();
            }
        }
    }

    /// Mark a work item completed and recompute overall progress.
    pub fn mark_completed(&mut self, item_id: &str) {
        if !self.completed_items.iter().any(|id| id == item_id) {
            self.completed_items.push(item_id.to_owned());
        }
        self.failed_items.retain(|id| id != item_id);
        self.recompute_progress();
        self.touch();
    }

    /// Mark a work item failed.
    pub fn mark_failed(&mut self, item_id: &str) {
        if !self.failed_items.iter().any(|id| id == item_id) {
            self.failed_items.push(item_id.to_owned());
        }
        self.touch();
    }

    /// Whether a work item has already completed (used by `continue`).
    #[must_use]
    pub fn is_completed(&self, item_id: &str) -> bool {
        self.completed_items.iter().any(|id| id == item_id)
    }

    /// Whether a work item has failed.
    #[must_use]
    pub fn is_failed(&self, item_id: &str) -> bool {
        self.failed_items.iter().any(|id| id == item_id)
    }

    fn recompute_progress(&mut self) {
        if self.total_items == 0 {
            self.progress = 0;
            return;
        }
        let done = u32::try_from(self.completed_items.len()).unwrap_or(u32::MAX);
        let percent = done.saturating_mul(100) / self.total_items;
        self.progress = u8::try_from(percent.min(100)).unwrap_or(100);
    }
}
