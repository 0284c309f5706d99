//! Unit tests for the persisted agent and run-state models.
//!
//! Covers:
//! - `camelCase` field names and `snake_case` status values on the wire
//! - the protocol-status → persisted-status mapping
//! - progress monotonicity while working
//! - completion bookkeeping and overall progress recomputation
//! - record staleness

use chrono::{Duration, Utc};
use serde_json::json;

use agent_conductor::models::agent::{AgentStatus, SerializedAgent};
use agent_conductor::models::run::RunState;
use agent_conductor::session::SessionStatus;

fn sample_agent(id: &str, task_id: &str) -> SerializedAgent {
    SerializedAgent::new(id, task_id, "Build the widget", format!("feature/{task_id}"))
}

// ── Serialization ────────────────────────────────────────────────────────────

/// Agent records serialize with `camelCase` keys and `snake_case` statuses.
#[test]
fn serialized_agent_uses_camel_case_keys() {
    let value = serde_json::to_value(sample_agent("worker-1", "feat-1"))
        .expect("agent must serialize");

    assert_eq!(value["id"], json!("worker-1"));
    assert_eq!(value["taskId"], json!("feat-1"));
    assert_eq!(value["taskTitle"], json!("Build the widget"));
    assert_eq!(value["branch"], json!("feature/feat-1"));
    assert_eq!(value["status"], json!("working"));
    assert_eq!(value["progress"], json!(0));
    assert!(value.get("startedAt").is_some(), "startedAt must be present");
}

/// Run records serialize with `camelCase` keys.
#[test]
fn run_state_uses_camel_case_keys() {
    let value = serde_json::to_value(RunState::new("epic-1", "Checkout revamp", 4))
        .expect("run state must serialize");

    assert_eq!(value["epicId"], json!("epic-1"));
    assert_eq!(value["epicName"], json!("Checkout revamp"));
    assert_eq!(value["totalItems"], json!(4));
    assert_eq!(value["activeAgents"], json!([]));
    assert_eq!(value["completedItems"], json!([]));
    assert_eq!(value["failedItems"], json!([]));
}

/// All five persisted statuses round-trip through their `snake_case` form.
#[test]
fn agent_status_round_trips_snake_case() {
    for (status, wire) in [
        (AgentStatus::Idle, "idle"),
        (AgentStatus::Working, "working"),
        (AgentStatus::Paused, "paused"),
        (AgentStatus::Completed, "completed"),
        (AgentStatus::Failed, "failed"),
    ] {
        let value = serde_json::to_value(status).expect("status must serialize");
        assert_eq!(value, json!(wire));
        let back: AgentStatus = serde_json::from_value(value).expect("status must deserialize");
        assert_eq!(back, status);
    }
}

// ── Status mapping ───────────────────────────────────────────────────────────

/// The protocol status maps one-to-one onto the persisted status; `paused`
/// has no protocol source.
#[test]
fn protocol_status_maps_onto_persisted_status() {
    assert_eq!(AgentStatus::from(SessionStatus::Idle), AgentStatus::Idle);
    assert_eq!(AgentStatus::from(SessionStatus::Working), AgentStatus::Working);
    assert_eq!(
        AgentStatus::from(SessionStatus::Completed),
        AgentStatus::Completed
    );
    assert_eq!(AgentStatus::from(SessionStatus::Failed), AgentStatus::Failed);
}

/// Pause applies only to `working` and `idle`; terminal statuses and
/// `paused` itself do not qualify.
#[test]
fn only_working_and_idle_can_pause() {
    assert!(AgentStatus::Working.can_pause());
    assert!(AgentStatus::Idle.can_pause());
    assert!(!AgentStatus::Paused.can_pause());
    assert!(!AgentStatus::Completed.can_pause());
    assert!(!AgentStatus::Failed.can_pause());
}

// ── Progress ─────────────────────────────────────────────────────────────────

/// Progress never decreases while the agent is working.
#[test]
fn progress_is_monotonic_while_working() {
    let mut state = RunState::new("epic-1", "Epic", 1);
    state.upsert_agent(sample_agent("worker-1", "feat-1"));

    state.record_progress("worker-1", 40);
    assert_eq!(state.agent("worker-1").expect("agent").progress, 40);

    state.record_progress("worker-1", 25);
    assert_eq!(
        state.agent("worker-1").expect("agent").progress,
        40,
        "a lower report must not roll progress back"
    );

    state.record_progress("worker-1", 90);
    assert_eq!(state.agent("worker-1").expect("agent").progress, 90);
}

/// Progress reports against a paused agent are ignored.
#[test]
fn paused_agents_ignore_progress_reports() {
    let mut state = RunState::new("epic-1", "Epic", 1);
    state.upsert_agent(sample_agent("worker-1", "feat-1"));
    state
        .agent_mut("worker-1")
        .expect("agent")
        .status = AgentStatus::Paused;

    state.record_progress("worker-1", 80);
    assert_eq!(state.agent("worker-1").expect("agent").progress, 0);
}

/// Progress is capped at 100 even for an out-of-range report.
#[test]
fn progress_is_capped_at_one_hundred() {
    let mut state = RunState::new("epic-1", "Epic", 1);
    state.upsert_agent(sample_agent("worker-1", "feat-1"));

    state.record_progress("worker-1", 250);
    assert_eq!(state.agent("worker-1").expect("agent").progress, 100);
}

// ── Completion bookkeeping ───────────────────────────────────────────────────

/// Completing items recomputes the overall percentage and deduplicates.
#[test]
fn mark_completed_recomputes_overall_progress() {
    let mut state = RunState::new("epic-1", "Epic", 4);

    state.mark_completed("feat-1");
    assert_eq!(state.progress, 25);

    state.mark_completed("feat-1");
    assert_eq!(
        state.completed_items.len(),
        1,
        "completing twice must not double-count"
    );

    state.mark_completed("feat-2");
    state.mark_completed("feat-3");
    state.mark_completed("feat-4");
    assert_eq!(state.progress, 100);
}

/// A later success removes the item from the failed list.
#[test]
fn completion_clears_an_earlier_failure() {
    let mut state = RunState::new("epic-1", "Epic", 2);

    state.mark_failed("feat-1");
    assert!(state.is_failed("feat-1"));

    state.mark_completed("feat-1");
    assert!(state.is_completed("feat-1"));
    assert!(!state.is_failed("feat-1"), "success must clear the failure");
}

/// A zero-item record reports zero progress rather than dividing by zero.
#[test]
fn empty_plan_reports_zero_progress() {
    let mut state = RunState::new("epic-1", "Epic", 0);
    state.mark_completed("stray");
    assert_eq!(state.progress, 0);
}

// ── Staleness ────────────────────────────────────────────────────────────────

/// A record updated within the window is fresh; one past it is stale.
#[test]
fn staleness_follows_the_updated_at_timestamp() {
    let mut state = RunState::new("epic-1", "Epic", 1);
    assert!(!state.is_stale(Duration::hours(24)));

    state.updated_at = Utc::now() - Duration::hours(25);
    assert!(state.is_stale(Duration::hours(24)));

    state.touch();
    assert!(!state.is_stale(Duration::hours(24)));
}
