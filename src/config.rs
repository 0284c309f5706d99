//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::acp::spawner::SpawnConfig;
use crate::{AppError, Result};

fn default_prompt_timeout_seconds() -> u64 {
    // Prompt-class calls can legitimately run for minutes.
    300
}

fn default_control_timeout_seconds() -> u64 {
    30
}

fn default_max_concurrent_agents() -> u32 {
    3
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Agent CLI binary (e.g. `claude`, `codex`).
    pub agent_cmd: String,
    /// Default arguments for the agent CLI.
    #[serde(default)]
    pub agent_args: Vec<String>,
    /// Workspace root; the agent process starts here.
    pub workspace_root: PathBuf,
    /// Directory for orchestration state records. Defaults to
    /// `<workspace_root>/.conductor/state`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Timeout for prompt-class requests (seconds).
    #[serde(default = "default_prompt_timeout_seconds")]
    pub prompt_timeout_seconds: u64,
    /// Timeout for control-class requests such as `session/new` and
    /// `session/cancel` (seconds).
    #[serde(default = "default_control_timeout_seconds")]
    pub control_timeout_seconds: u64,
    /// Maximum agent sessions working concurrently within a parallel phase.
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: u32,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::config_invalid("config", format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Directory for orchestration state records.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.workspace_root.join(".conductor").join("state"))
    }

    /// Prompt-class request timeout.
    #[must_use]
    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_seconds)
    }

    /// Control-class request timeout.
    #[must_use]
    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_seconds)
    }

    /// Spawn configuration for the agent subprocess.
    #[must_use]
    pub fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig {
            agent_cmd: self.agent_cmd.clone(),
            agent_args: self.agent_args.clone(),
            workspace_root: self.workspace_root.clone(),
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.agent_cmd.trim().is_empty() {
            return Err(AppError::config_missing("agent_cmd"));
        }

        if self.max_concurrent_agents == 0 {
            return Err(AppError::config_invalid(
                "max_concurrent_agents",
                "max_concurrent_agents must be greater than zero",
            ));
        }

        if self.prompt_timeout_seconds == 0 {
            return Err(AppError::config_invalid(
                "prompt_timeout_seconds",
                "prompt_timeout_seconds must be greater than zero",
            ));
        }

        let canonical_root = self.workspace_root.canonicalize().map_err(|err| {
            AppError::config_invalid("workspace_root", format!("workspace_root invalid: {err}"))
        })?;
        self.workspace_root = canonical_root;

        Ok(())
    }
}
