//! Error types shared across the application.
//!
//! Every failure mode carries enough structured context to be serialized for
//! logs (`to_json`) and queried for retry policy (`is_retryable`). The CLI
//! surfaces `message` and `recovery_hint` verbatim; `context` is preserved
//! for logging but not required for display.

use std::fmt::{Display, Formatter};

use serde_json::{json, Value};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Sub-classification for [`AppError::Agent`] failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentErrorKind {
    /// The agent process could not be started.
    Spawn,
    /// The agent reported a failure while executing a task.
    Execution,
    /// The agent did not respond or complete within the allowed window.
    Timeout,
}

/// Sub-classification for [`AppError::Config`] failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// A required key is absent.
    Missing,
    /// A key is present but its value is unusable.
    Invalid,
}

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Authentication or credential failure. Never retryable.
    Auth(String),
    /// HTTP or connection-level failure when talking to a remote service.
    Network {
        /// Human-readable description.
        message: String,
        /// HTTP status code, when one was received.
        status_code: Option<u16>,
        /// Whether the caller may retry: 5xx and connection failures are
        /// retryable, 4xx are not.
        retryable: bool,
    },
    /// Agent subprocess failure (spawn, execution, or timeout).
    Agent {
        /// Human-readable description.
        message: String,
        /// Which stage of the agent lifecycle failed.
        kind: AgentErrorKind,
        /// Identifier of the agent/worker involved, when known.
        agent_id: Option<String>,
        /// Identifier of the task being worked, when known.
        task_id: Option<String>,
    },
    /// A git merge could not complete cleanly.
    MergeConflict {
        /// Human-readable description.
        message: String,
        /// Files with conflict markers.
        files: Vec<String>,
        /// Branch being merged from.
        source_branch: String,
        /// Branch being merged into.
        target_branch: String,
    },
    /// Remote CRUD API returned a failure.
    Api {
        /// Human-readable description.
        message: String,
        /// Endpoint path that was called.
        endpoint: String,
        /// HTTP method used.
        method: String,
        /// HTTP status code, when one was received.
        status_code: Option<u16>,
    },
    /// Configuration key missing or invalid.
    Config {
        /// Human-readable description.
        message: String,
        /// The offending configuration key.
        key: String,
        /// Whether the key was missing or present-but-invalid.
        kind: ConfigErrorKind,
    },
    /// ACP wire-protocol failure (malformed frame, codec limit, child error).
    Protocol(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Foreign error normalized through [`AppError::wrap_error`].
    Unknown(String),
}

impl AppError {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Build a [`AppError::Network`] error, deriving retryability from the
    /// status code: 5xx and connection failures (no status) retry, 4xx do not.
    #[must_use]
    pub fn network(message: impl Into<String>, status_code: Option<u16>) -> Self {
        let retryable = status_code.is_none_or(|code| code >= 500);
        Self::Network {
            message: message.into(),
            status_code,
            retryable,
        }
    }

    /// Build an [`AppError::Agent`] spawn failure.
    #[must_use]
    pub fn agent_spawn(message: impl Into<String>, agent_id: Option<String>) -> Self {
        Self::Agent {
            message: message.into(),
            kind: AgentErrorKind::Spawn,
            agent_id,
            task_id: None,
        }
    }

    /// Build an [`AppError::Agent`] execution failure.
    #[must_use]
    pub fn agent_execution(
        message: impl Into<String>,
        agent_id: Option<String>,
        task_id: Option<String>,
    ) -> Self {
        Self::Agent {
            message: message.into(),
            kind: AgentErrorKind::Execution,
            agent_id,
            task_id,
        }
    }

    /// Build an [`AppError::Agent`] timeout failure. The only retryable agent
    /// error kind.
    #[must_use]
    pub fn agent_timeout(
        message: impl Into<String>,
        agent_id: Option<String>,
        task_id: Option<String>,
    ) -> Self {
        Self::Agent {
            message: message.into(),
            kind: AgentErrorKind::Timeout,
            agent_id,
            task_id,
        }
    }

    /// Build an [`AppError::Api`] not-found error.
    #[must_use]
    pub fn api_not_found(endpoint: impl Into<String>, method: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self::Api {
            message: format!("resource not found: {endpoint}"),
            endpoint,
            method: method.into(),
            status_code: Some(404),
        }
    }

    /// Build an [`AppError::Api`] validation-failure error.
    #[must_use]
    pub fn api_validation(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Api {
            message: message.into(),
            endpoint: endpoint.into(),
            method: method.into(),
            status_code: Some(422),
        }
    }

    /// Build an [`AppError::Config`] error for an absent key.
    #[must_use]
    pub fn config_missing(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::Config {
            message: format!("missing required configuration key `{key}`"),
            key,
            kind: ConfigErrorKind::Missing,
        }
    }

    /// Build an [`AppError::Config`] error for an invalid value.
    #[must_use]
    pub fn config_invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: key.into(),
            kind: ConfigErrorKind::Invalid,
        }
    }

    /// Normalize any boxed error into an [`AppError`] without double-wrapping:
    /// a value that already is an `AppError` is returned unchanged.
    #[must_use]
    pub fn wrap_error(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        match err.downcast::<Self>() {
            Ok(app) => *app,
            Err(other) => Self::Unknown(other.to_string()),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "AUTH_ERROR",
            Self::Network { .. } => "NETWORK_ERROR",
            Self::Agent { kind, .. } => match kind {
                AgentErrorKind::Spawn => "AGENT_SPAWN",
                AgentErrorKind::Execution => "AGENT_EXECUTION",
                AgentErrorKind::Timeout => "AGENT_TIMEOUT",
            },
            Self::MergeConflict { .. } => "MERGE_CONFLICT",
            Self::Api { .. } => "API_ERROR",
            Self::Config { kind, .. } => match kind {
                ConfigErrorKind::Missing => "CONFIG_MISSING",
                ConfigErrorKind::Invalid => "CONFIG_INVALID",
            },
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// Centralized retry policy: Network errors honor their own flag, Agent
    /// errors retry only on timeout, everything else is not retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { retryable, .. } => *retryable,
            Self::Agent { kind, .. } => *kind == AgentErrorKind::Timeout,
            _ => false,
        }
    }

    /// Optional human-readable recovery suggestion, surfaced verbatim by the
    /// CLI alongside the error message.
    #[must_use]
    pub fn recovery_hint(&self) -> Option<String> {
        match self {
            Self::Auth(_) => Some("re-authenticate and retry the command".into()),
            Self::Network {
                retryable: true, ..
            } => Some("transient network failure; retry after a short backoff".into()),
            Self::Agent {
                kind: AgentErrorKind::Timeout,
                ..
            } => Some(
                "the task may be too large for a single prompt; \
                 decompose it into smaller units of work"
                    .into(),
            ),
            Self::Agent {
                kind: AgentErrorKind::Spawn,
                ..
            } => Some("verify the agent command is installed and on PATH".into()),
            Self::MergeConflict { target_branch, .. } => Some(format!(
                "resolve the conflicts on `{target_branch}` manually, then resume"
            )),
            Self::Config { key, kind, .. } => match kind {
                ConfigErrorKind::Missing => Some(format!("set `{key}` in the configuration file")),
                ConfigErrorKind::Invalid => Some(format!(
                    "correct the value of `{key}` in the configuration file"
                )),
            },
            _ => None,
        }
    }

    /// Variant-specific structured context, serialized with `camelCase` keys.
    #[must_use]
    pub fn context(&self) -> Value {
        match self {
            Self::Network {
                status_code,
                retryable,
                ..
            } => json!({ "statusCode": status_code, "retryable": retryable }),
            Self::Agent {
                agent_id, task_id, ..
            } => json!({ "agentId": agent_id, "taskId": task_id }),
            Self::MergeConflict {
                files,
                source_branch,
                target_branch,
                ..
            } => json!({
                "files": files,
                "sourceBranch": source_branch,
                "targetBranch": target_branch,
            }),
            Self::Api {
                endpoint,
                method,
                status_code,
                ..
            } => json!({
                "endpoint": endpoint,
                "method": method,
                "statusCode": status_code,
            }),
            Self::Config { key, .. } => json!({ "key": key }),
            _ => json!({}),
        }
    }

    /// Serialize the full error for structured logging.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name(),
            "code": self.code(),
            "message": self.message(),
            "context": self.context(),
            "recoveryHint": self.recovery_hint(),
        })
    }

    /// The bare message without the variant prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Auth(msg)
            | Self::Protocol(msg)
            | Self::Io(msg)
            | Self::NotFound(msg)
            | Self::Unknown(msg) => msg,
            Self::Network { message, .. }
            | Self::Agent { message, .. }
            | Self::MergeConflict { message, .. }
            | Self::Api { message, .. }
            | Self::Config { message, .. } => message,
        }
    }

    /// Variant name used in serialized form.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auth(_) => "AuthError",
            Self::Network { .. } => "NetworkError",
            Self::Agent { .. } => "AgentError",
            Self::MergeConflict { .. } => "MergeConflictError",
            Self::Api { .. } => "ApiError",
            Self::Config { .. } => "ConfigError",
            Self::Protocol(_) => "ProtocolError",
            Self::Io(_) => "IoError",
            Self::NotFound(_) => "NotFoundError",
            Self::Unknown(_) => "UnknownError",
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth(msg) => write!(f, "auth: {msg}"),
            Self::Network { message, .. } => write!(f, "network: {message}"),
            Self::Agent { message, .. } => write!(f, "agent: {message}"),
            Self::MergeConflict { message, .. } => write!(f, "merge conflict: {message}"),
            Self::Api { message, .. } => write!(f, "api: {message}"),
            Self::Config { message, .. } => write!(f, "config: {message}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Unknown(msg) => write!(f, "unknown: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config_invalid("config", format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("json: {err}"))
    }
}
