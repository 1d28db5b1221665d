use std::path::{Path, PathBuf};

use mfls_core::fsio;
use mfls_model::{EpochMillis, now_millis};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DaemonError;

const STATE_DIR: &str = ".metaflow-local-service";
const STATE_FILE: &str = "state.json";
const LOG_FILE: &str = "daemon.log";

/// Advertisement of a live daemon, persisted while it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonState {
    pub pid: u32,
    pub port: u16,
    pub storage_root: PathBuf,
    pub started_at: EpochMillis,
}

impl DaemonState {
    pub fn new(pid: u32, port: u16, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            pid,
            port,
            storage_root: storage_root.into(),
            started_at: now_millis(),
        }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// Location of the [`DaemonState`] for one storage root.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn for_root(storage_root: &Path) -> Self {
        Self {
            path: storage_root.join(STATE_DIR).join(STATE_FILE),
        }
    }

    /// Where a verbose daemon writes its output.
    pub fn log_path(storage_root: &Path) -> PathBuf {
        storage_root.join(STATE_DIR).join(LOG_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current state; a missing or undecodable file reads as `None`.
    pub fn read(&self) -> Result<Option<DaemonState>, DaemonError> {
        let Some(bytes) = fsio::read_optional(&self.path).map_err(DaemonError::io(&self.path))?
        else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable daemon state");
                Ok(None)
            }
        }
    }

    pub fn write(&self, state: &DaemonState) -> Result<(), DaemonError> {
        let bytes = serde_json::to_vec(state).map_err(|e| DaemonError::Io {
            path: self.path.clone(),
            source: e.into(),
        })?;
        fsio::atomic_write(&self.path, &bytes).map_err(DaemonError::io(&self.path))
    }

    /// Remove the file; `false` if there was none.
    pub fn clear(&self) -> Result<bool, DaemonError> {
        fsio::remove_if_exists(&self.path).map_err(DaemonError::io(&self.path))
    }

    /// Remove the file only if it still advertises `pid`.
    pub fn clear_if_owned(&self, pid: u32) -> Result<bool, DaemonError> {
        match self.read()? {
            Some(state) if state.pid == pid => self.clear(),
            _ => Ok(false),
        }
    }
}
