//! File-backed store for [`RunState`] records.
//!
//! Each orchestration run is one JSON document keyed by epic id. Writes go
//! through a temp-file-then-rename so a torn write can never leave a
//! partially updated agent list on disk; readers always see either the old
//! record or the new one. Concurrent CLI invocations racing on the same
//! record are out of scope — the store assumes one active writer at a time.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::models::run::RunState;
use crate::{AppError, Result};

/// Store of orchestration run records under a single directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Build a store rooted at `dir`. The directory is created lazily on
    /// first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the records.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a record atomically (write to temp file, then rename over
    /// the target).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on directory creation, serialization, write,
    /// or rename failure, and for unusable epic ids.
    pub fn save(&self, state: &RunState) -> Result<()> {
        let path = self.record_path(&state.epic_id)?;

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| AppError::Io(format!("failed to create state dir: {e}")))?;

        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| AppError::Io(format!("failed to serialise state record: {e}")))?;

        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|e| AppError::Io(format!("failed to create temp state file: {e}")))?;
        tmp.write_all(&bytes)
            .map_err(|e| AppError::Io(format!("failed to write state record: {e}")))?;
        tmp.persist(&path)
            .map_err(|e| AppError::Io(format!("failed to replace state record: {e}")))?;

        debug!(epic_id = %state.epic_id, path = %path.display(), "state record saved");
        Ok(())
    }

    /// Load a record by epic id. Returns `Ok(None)` when no record exists.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on read failure or when the record on disk
    /// is not valid JSON.
    pub fn load(&self, epic_id: &str) -> Result<Option<RunState>> {
        let path = self.record_path(epic_id)?;

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::Io(format!("failed to read state record: {e}"))),
        };

        let state: RunState = serde_json::from_str(&raw)
            .map_err(|e| AppError::Io(format!("state record for `{epic_id}` is corrupt: {e}")))?;
        Ok(Some(state))
    }

    /// Delete a record. Returns whether a record existed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on filesystem failure other than not-found.
    pub fn delete(&self, epic_id: &str) -> Result<bool> {
        let path = self.record_path(epic_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Io(format!("failed to delete state record: {e}"))),
        }
    }

    /// List the epic ids with a stored record.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on directory read failure.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(format!("failed to read state dir: {e}"))),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AppError::Io(format!("failed to read state dir: {e}")))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(std::ffi::OsStr::to_str) {
                    ids.push(stem.to_owned());
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Resolve the record path for an epic id, rejecting ids that would
    /// escape the store directory.
    fn record_path(&self, epic_id: &str) -> Result<PathBuf> {
        if epic_id.is_empty()
            || epic_id
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
            || epic_id.contains("..")
        {
            return Err(AppError::Io(format!(
                "epic id `{epic_id}` is not a valid record key"
            )));
        }
        Ok(self.dir.join(format!("{epic_id}.json")))
    }
}
