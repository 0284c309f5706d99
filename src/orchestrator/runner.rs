//! Plan execution over agent sessions.
//!
//! The orchestrator consumes an externally computed [`ExecutionPlan`] and
//! drives one session per work item, phase by phase. Every assignment and
//! status change is written through the [`StateStore`] so `status`, `pause`,
//! and `resume` commands in other processes observe it; pause takes effect
//! at item boundaries by re-reading the persisted record before each item.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};

use crate::acp::client::AcpClient;
use crate::config::GlobalConfig;
use crate::models::agent::{AgentStatus, SerializedAgent};
use crate::models::plan::{ExecutionPlan, WorkItem};
use crate::models::run::RunState;
use crate::session::manager::{SessionManager, SessionOptions};
use crate::state::store::StateStore;
use crate::Result;

/// Drives one orchestration run over an already-connected transport client.
#[derive(Debug)]
pub struct Orchestrator {
    client: AcpClient,
    manager: SessionManager,
    store: StateStore,
    config: Arc<GlobalConfig>,
    next_worker: AtomicU32,
}

impl Orchestrator {
    /// Build an orchestrator. The client must already be connected; the
    /// caller keeps ownership of the child process handle.
    #[must_use]
    pub fn new(client: AcpClient, store: StateStore, config: Arc<GlobalConfig>) -> Self {
        let manager = SessionManager::new(
            client.clone(),
            config.prompt_timeout(),
            config.control_timeout(),
        );
        Self {
            client,
            manager,
            store,
            config,
            next_worker: AtomicU32::new(1),
        }
    }

    /// The session registry for this run.
    #[must_use]
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Execute (or continue) an epic's plan.
    ///
    /// Performs the `initialize` handshake, then walks the phases in order.
    /// Items already recorded as completed are skipped, which is what makes
    /// `continue` work after an interrupted or paused run. Items whose
    /// persisted agent is `paused` are skipped for this invocation. A failed
    /// item is recorded and does not abort the run, but items depending on
    /// it are skipped as failed.
    ///
    /// # Errors
    ///
    /// Returns plan-validation failures, handshake failures, and store I/O
    /// failures. Per-item agent failures are recorded in the returned
    /// [`RunState`], not propagated.
    pub async fn run_epic(
        &self,
        plan: &ExecutionPlan,
        epic_id: &str,
        epic_name: &str,
    ) -> Result<RunState> {
        plan.validate()?;

        let state = match self.store.load(epic_id)? {
            Some(existing) => {
                info!(
                    epic_id,
                    completed = existing.completed_items.len(),
                    "continuing existing run"
                );
                existing
            }
            None => RunState::new(epic_id, epic_name, plan.total_items()),
        };
        self.store.save(&state)?;
        let state = Mutex::new(state);

        self.client
            .initialize(self.config.control_timeout())
            .await?;
        info!(epic_id, "agent initialized");

        for phase in &plan.phases {
            let span = info_span!("phase", name = %phase.name, parallel = phase.parallel);

            async {
                if phase.parallel {
                    // One session per item, bounded by max_concurrent_agents.
                    let limit = usize::try_from(self.config.max_concurrent_agents).unwrap_or(1);
                    for chunk in phase.items.chunks(limit.max(1)) {
                        let runs = chunk.iter().map(|item| self.run_item(&state, epic_id, item));
                        join_all(runs).await;
                    }
                } else {
                    for item in &phase.items {
                        self.run_item(&state, epic_id, item).await;
                    }
                }
            }
            .instrument(span)
            .await;
        }

        let final_state = state.into_inner();
        info!(
            epic_id,
            progress = final_state.progress,
            completed = final_state.completed_items.len(),
            failed = final_state.failed_items.len(),
            "run finished"
        );
        Ok(final_state)
    }

    /// Run one work item in its own session, mirroring status to the store.
    ///
    /// Failures are recorded, never propagated: the run continues with the
    /// remaining items.
    async fn run_item(&self, state: &Mutex<RunState>, epic_id: &str, item: &WorkItem) {
        // Skip work that is already done or blocked by a failed dependency.
        {
            let mut guard = state.lock().await;
            if guard.is_completed(&item.id) {
                info!(item_id = %item.id, "item already completed, skipping");
                return;
            }
            if let Some(failed_dep) = item.depends_on.iter().find(|dep| guard.is_failed(dep)) {
                warn!(
                    item_id = %item.id,
                    dependency = %failed_dep,
                    "dependency failed, marking item failed"
                );
                guard.mark_failed(&item.id);
                if let Err(err) = self.store.save(&guard) {
                    warn!(%err, "failed to persist state record");
                }
                return;
            }
        }

        // A concurrent `pause` command takes effect here: re-read the
        // persisted record and skip items whose agent is paused.
        match self.store.load(epic_id) {
            Ok(Some(persisted)) => {
                if persisted
                    .agent_for_task(&item.id)
                    .is_some_and(|agent| agent.status == AgentStatus::Paused)
                {
                    info!(item_id = %item.id, "agent paused, skipping item");
                    return;
                }
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "failed to re-read state record before item"),
        }

        let worker_id = format!("worker-{}", self.next_worker.fetch_add(1, Ordering::Relaxed));

        let session = match self.manager.create_session(SessionOptions::default()).await {
            Ok(session) => session,
            Err(err) => {
                warn!(item_id = %item.id, error = %err, "failed to create session");
                let mut guard = state.lock().await;
                guard.mark_failed(&item.id);
                if let Err(err) = self.store.save(&guard) {
                    warn!(%err, "failed to persist state record");
                }
                return;
            }
        };

        {
            let mut guard = state.lock().await;
            guard.upsert_agent(SerializedAgent::new(
                &worker_id,
                &item.id,
                &item.title,
                item.branch_name(),
            ));
            if let Err(err) = self.store.save(&guard) {
                warn!(%err, "failed to persist state record");
            }
        }

        info!(
            item_id = %item.id,
            worker_id,
            session_id = session.session_id(),
            "item started"
        );

        let outcome = session
            .send_and_wait(&item.prompt, self.config.prompt_timeout())
            .await;

        {
            let mut guard = state.lock().await;
            match outcome {
                Ok(_text) => {
                    if let Some(agent) = guard.agent_mut(&worker_id) {
                        agent.status = AgentStatus::Completed;
                    }
                    guard.record_progress(&worker_id, 100);
                    guard.mark_completed(&item.id);
                    info!(item_id = %item.id, worker_id, "item completed");
                }
                Err(err) => {
                    if let Some(agent) = guard.agent_mut(&worker_id) {
                        agent.status = AgentStatus::Failed;
                    }
                    guard.mark_failed(&item.id);
                    match err.recovery_hint() {
                        Some(hint) => warn!(
                            item_id = %item.id,
                            worker_id,
                            error = %err,
                            retryable = err.is_retryable(),
                            hint,
                            "item failed"
                        ),
                        None => warn!(
                            item_id = %item.id,
                            worker_id,
                            error = %err,
                            retryable = err.is_retryable(),
                            "item failed"
                        ),
                    }
                }
            }
            if let Err(err) = self.store.save(&guard) {
                warn!(%err, "failed to persist state record");
            }
        }

        self.manager.destroy_session(session.session_id());
    }
}
