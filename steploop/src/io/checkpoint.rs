//! Session checkpoints: one JSON snapshot per session id.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::session::SessionState;

/// Session id that cannot be used as a checkpoint file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointIdError {
    pub session_id: String,
}

impl fmt::Display for CheckpointIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session id '{}' is not a valid checkpoint name (use letters, digits, '-', '_' or '.')",
            self.session_id
        )
    }
}

impl Error for CheckpointIdError {}

/// Directory of `<session_id>.json` snapshots.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session_id: &str) -> Result<PathBuf> {
        if !is_safe_id(session_id) {
            return Err(CheckpointIdError {
                session_id: session_id.to_string(),
            }
            .into());
        }
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    /// Atomically write the snapshot (temp file + rename).
    pub fn save(&self, state: &SessionState) -> Result<PathBuf> {
        let path = self.path_for(&state.session_id)?;
        debug!(
            path = %path.display(),
            step = %state.step,
            steps_taken = state.steps_taken,
            "writing checkpoint"
        );
        let mut buf = serde_json::to_string_pretty(state).context("serialize checkpoint")?;
        buf.push('\n');
        crate::io::write_atomic(&path, &buf)?;
        Ok(path)
    }

    pub fn load(&self, session_id: &str) -> Result<SessionState> {
        let path = self.path_for(session_id)?;
        debug!(path = %path.display(), "loading checkpoint");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("read checkpoint {}", path.display()))?;
        let state: SessionState = serde_json::from_str(&contents)
            .with_context(|| format!("parse checkpoint {}", path.display()))?;
        debug!(step = %state.step, steps_taken = state.steps_taken, "checkpoint loaded");
        Ok(state)
    }
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
