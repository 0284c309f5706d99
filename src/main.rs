#![forbid(unsafe_code)]

//! `agent-conductor` CLI.
//!
//! Thin command surface over the orchestration core: `run` and `continue`
//! spawn the agent subprocess and drive a plan; `status`, `pause`, and
//! `resume` operate purely on the durable run record, so they work from a
//! separate invocation while (or after) a run is in flight.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conductor::acp::client::{AcpClient, PermissionDecision, PermissionRequest};
use agent_conductor::acp::spawner::shutdown_child;
use agent_conductor::models::plan::ExecutionPlan;
use agent_conductor::orchestrator::Orchestrator;
use agent_conductor::state::{self, StateStore};
use agent_conductor::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-conductor", about = "AI coding-agent orchestrator", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start an orchestration run for an epic.
    Run {
        /// Path to the execution plan (JSON).
        #[arg(long)]
        plan: PathBuf,
        /// Epic identifier (also the state record key).
        #[arg(long)]
        epic: String,
        /// Human-readable epic name; defaults to the epic id.
        #[arg(long)]
        name: Option<String>,
    },
    /// Continue an interrupted or partially completed run.
    Continue {
        /// Epic identifier.
        epic: String,
        /// Path to the execution plan (JSON).
        #[arg(long)]
        plan: PathBuf,
    },
    /// Show the stored state of one epic, or list all epics.
    Status {
        /// Epic identifier.
        epic: Option<String>,
    },
    /// Pause all agents of an epic, or one named worker.
    Pause {
        /// Epic identifier.
        epic: String,
        /// Worker id (e.g. `worker-1`); all workers when omitted.
        worker: Option<String>,
    },
    /// Resume paused agents of an epic, or one named worker.
    Resume {
        /// Epic identifier.
        epic: String,
        /// Worker id; all paused workers when omitted.
        worker: Option<String>,
        /// Proceed even when the record is older than 24 hours.
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Unknown(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args));

    if let Err(ref err) = result {
        error!(code = err.code(), "{err}");
        if let Some(hint) = err.recovery_hint() {
            eprintln!("error: {err}\nhint: {hint}");
        } else {
            eprintln!("error: {err}");
        }
    }

    result
}

async fn run(args: Cli) -> Result<()> {
    let config = Arc::new(GlobalConfig::load_from_path(&args.config)?);
    let store = StateStore::new(config.state_dir());

    match args.command {
        Command::Run { plan, epic, name } => {
            let plan = ExecutionPlan::load_from_path(&plan)?;
            let name = name.unwrap_or_else(|| epic.clone());
            run_plan(&config, &store, &plan, &epic, &name).await
        }
        Command::Continue { epic, plan } => {
            let plan = ExecutionPlan::load_from_path(&plan)?;
            if store.load(&epic)?.is_none() {
                return Err(AppError::NotFound(format!(
                    "no orchestration record for epic `{epic}`; use `run` to start one"
                )));
            }
            run_plan(&config, &store, &plan, &epic, &epic).await
        }
        Command::Status { epic } => show_status(&store, epic.as_deref()),
        Command::Pause { epic, worker } => {
            let outcome = match worker.as_deref() {
                Some(worker) => state::pause_one(&store, &epic, worker)?,
                None => state::pause_all(&store, &epic)?,
            };
            if outcome.is_noop() {
                println!("nothing to pause");
            } else {
                println!("paused: {}", outcome.paused.join(", "));
            }
            Ok(())
        }
        Command::Resume {
            epic,
            worker,
            force,
        } => {
            let outcome = match worker.as_deref() {
                Some(worker) => state::resume_one(&store, &epic, worker, force)?,
                None => state::resume_all(&store, &epic, force)?,
            };
            if outcome.stale && outcome.is_noop() && !force {
                println!(
                    "record is older than 24 hours; working directories and branches \
                     may be stale. Re-run with --force to resume anyway."
                );
            } else if outcome.is_noop() {
                println!("nothing to resume");
            } else {
                println!("resumed: {}", outcome.resumed.join(", "));
            }
            Ok(())
        }
    }
}

/// Spawn the agent, drive the plan, and tear everything down.
async fn run_plan(
    config: &Arc<GlobalConfig>,
    store: &StateStore,
    plan: &ExecutionPlan,
    epic_id: &str,
    epic_name: &str,
) -> Result<()> {
    let (client, child) = AcpClient::spawn(&config.spawn_config())?;

    // Until an interactive policy exists, permission requests are approved
    // for the workspace the agent was spawned into.
    client.set_permission_handler(|request: PermissionRequest| {
        info!(session_id = ?request.session_id, "auto-approving permission request");
        PermissionDecision {
            approved: true,
            reason: Some("auto-approved by orchestrator policy".into()),
        }
    });

    let orchestrator = Orchestrator::new(client.clone(), store.clone(), Arc::clone(config));
    let result = orchestrator.run_epic(plan, epic_id, epic_name).await;

    orchestrator.manager().destroy_all();
    client.shutdown();
    shutdown_child(child, Duration::from_secs(5)).await;

    let final_state = result?;
    println!(
        "epic `{}`: {}% complete, {} item(s) done, {} failed",
        final_state.epic_id,
        final_state.progress,
        final_state.completed_items.len(),
        final_state.failed_items.len(),
    );
    Ok(())
}

/// Print one epic's record, or list all known epics.
fn show_status(store: &StateStore, epic: Option<&str>) -> Result<()> {
    match epic {
        Some(epic_id) => {
            let state = store.load(epic_id)?.ok_or_else(|| {
                AppError::NotFound(format!("no orchestration record for epic `{epic_id}`"))
            })?;
            println!(
                "epic `{}` ({}): {}% complete, updated {}",
                state.epic_id, state.epic_name, state.progress, state.updated_at
            );
            for agent in &state.active_agents {
                println!(
                    "  {} [{:?}] {}% — {} ({})",
                    agent.id, agent.status, agent.progress, agent.task_title, agent.task_id
                );
            }
            if !state.failed_items.is_empty() {
                println!("  failed items: {}", state.failed_items.join(", "));
            }
        }
        None => {
            let epics = store.list()?;
            if epics.is_empty() {
                println!("no orchestration records");
            } else {
                for epic_id in epics {
                    println!("{epic_id}");
                }
            }
        }
    }
    Ok(())
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Unknown(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Unknown(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
