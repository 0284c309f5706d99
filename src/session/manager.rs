//! Session registry.
//!
//! An explicitly constructed registry owned by the orchestration run, not a
//! process-wide singleton: whoever needs it receives a clone. Sessions are
//! created through the transport client (`session/new`), which assigns the
//! session identifier on the child side.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::acp::client::AcpClient;
use crate::session::Session;
use crate::sync::lock;
use crate::{AppError, Result};

/// Options for creating a new session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Working directory for the session, when different from the agent
    /// process's own.
    pub cwd: Option<PathBuf>,
}

/// Registry of live sessions for one orchestration run.
#[derive(Debug, Clone)]
pub struct SessionManager {
    client: AcpClient,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    prompt_timeout: Duration,
    control_timeout: Duration,
}

impl SessionManager {
    /// Build a manager over an already-connected transport client.
    #[must_use]
    pub fn new(client: AcpClient, prompt_timeout: Duration, control_timeout: Duration) -> Self {
        Self {
            client,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            prompt_timeout,
            control_timeout,
        }
    }

    /// Create a session via `session/new` and register it.
    ///
    /// The session id comes from the child's response, never from the
    /// caller.
    ///
    /// # Errors
    ///
    /// - transport failures from the `session/new` request;
    /// - [`AppError::Protocol`] when the response carries no `sessionId`.
    pub async fn create_session(&self, options: SessionOptions) -> Result<Session> {
        let params = json!({
            "cwd": options.cwd.map(|p| p.to_string_lossy().into_owned()),
        });

        let result = self
            .client
            .send_request("session/new", params, self.control_timeout)
            .await?;

        let session_id = extract_session_id(&result, "session/new")?;
        Ok(self.register(session_id))
    }

    /// Reattach to an existing child-side session via `session/load`.
    ///
    /// # Errors
    ///
    /// - transport failures from the `session/load` request;
    /// - [`AppError::Protocol`] when the response carries no `sessionId`.
    pub async fn load_session(&self, session_id: &str) -> Result<Session> {
        let result = self
            .client
            .send_request(
                "session/load",
                json!({ "sessionId": session_id }),
                self.control_timeout,
            )
            .await?;

        // The child echoes the id it actually loaded.
        let loaded_id = extract_session_id(&result, "session/load")?;
        Ok(self.register(loaded_id))
    }

    /// Look up a registered session by id.
    #[must_use]
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        lock(&self.sessions).get(session_id).cloned()
    }

    /// Destroy and deregister a session. Idempotent: destroying an unknown
    /// id is a no-op.
    pub fn destroy_session(&self, session_id: &str) {
        if let Some(session) = lock(&self.sessions).remove(session_id) {
            session.destroy();
            debug!(session_id, "session deregistered");
        }
    }

    /// Destroy every registered session and clear the registry.
    ///
    /// Each session is destroyed regardless of the others; teardown never
    /// fails fast on a single session.
    pub fn destroy_all(&self) {
        let drained: Vec<Session> = {
            let mut sessions = lock(&self.sessions);
            sessions.drain().map(|(_, session)| session).collect()
        };

        let count = drained.len();
        for session in drained {
            session.destroy();
        }

        if count > 0 {
            info!(count, "all sessions destroyed");
        }
    }

    /// Number of currently registered sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        lock(&self.sessions).len()
    }

    fn register(&self, session_id: String) -> Session {
        let session = Session::attach(
            self.client.clone(),
            session_id.clone(),
            self.prompt_timeout,
            self.control_timeout,
        );
        info!(session_id, "session registered");
        lock(&self.sessions).insert(session_id, session.clone());
        session
    }
}

/// Pull the child-assigned `sessionId` out of a response payload.
fn extract_session_id(result: &Value, method: &str) -> Result<String> {
    result
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| AppError::Protocol(format!("{method} response missing `sessionId`")))
}
