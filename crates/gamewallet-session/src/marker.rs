//! Durable "was previously connected" marker.

use gamewallet_core::config::get_marker_path;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::MarkerError;

/// Single global flag persisted across restarts.
pub trait MarkerStore: Send + Sync {
    /// Whether a previous session was established. Read errors count as no.
    fn was_connected(&self) -> bool;

    fn set_connected(&self) -> Result<(), MarkerError>;

    fn clear(&self) -> Result<(), MarkerError>;
}

/// Process-local marker for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryMarkerStore {
    connected: AtomicBool,
}

impl MemoryMarkerStore {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }
}

impl MarkerStore for MemoryMarkerStore {
    fn was_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_connected(&self) -> Result<(), MarkerError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<(), MarkerError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MarkerFile {
    wallet_connected: bool,
    /// Unix seconds of the last successful connection.
    #[serde(default)]
    connected_at: Option<i64>,
}

/// Marker stored as a small JSON file, by default in the platform data dir.
#[derive(Debug, Clone)]
pub struct FileMarkerStore {
    path: PathBuf,
}

impl FileMarkerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker at the default location (`session.json` in the data dir).
    pub fn open_default() -> Result<Self, MarkerError> {
        Ok(Self::new(get_marker_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<MarkerFile>, MarkerError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

impl MarkerStore for FileMarkerStore {
    fn was_connected(&self) -> bool {
        match self.read() {
            Ok(marker) => marker.is_some_and(|m| m.wallet_connected),
            Err(e) => {
                tracing::warn!("Ignoring unreadable session marker {:?}: {}", self.path, e);
                false
            }
        }
    }

    fn set_connected(&self) -> Result<(), MarkerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let marker = MarkerFile {
            wallet_connected: true,
            connected_at: Some(chrono::Utc::now().timestamp()),
        };
        fs::write(&self.path, serde_json::to_string_pretty(&marker)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), MarkerError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
