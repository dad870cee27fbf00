//! Durable draft buffer: a local snapshot of the live transcript.
//!
//! The snapshot lets unsaved turns survive a reload. It is always written as
//! a whole, never merged with what is already on disk. It also carries the
//! active conversation id so a reloaded session keeps appending to the same
//! remote conversation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::config::DraftConfig;
use crate::core::errors::ChatResult;
use crate::core::ids::{ConversationId, UserId};
use crate::core::message::ChatMessage;

/// Snapshot format version written by [`FileDraftBuffer`].
const SNAPSHOT_VERSION: u32 = 1;

/// Contents of the draft slot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftSnapshot {
    /// Identity that owns `conversation_id`.
    #[serde(default)]
    pub owner: Option<UserId>,
    /// Remote conversation the transcript belongs to, once created.
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    /// Full transcript, saved and unsaved messages alike.
    pub messages: Vec<ChatMessage>,
}

/// Local, synchronous key-value slot holding the current transcript.
pub trait DraftBuffer: Send + Sync {
    /// Overwrite the slot with `snapshot`.
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be written.
    fn save(&self, snapshot: &DraftSnapshot) -> ChatResult<()>;

    /// Read the slot, if it holds a snapshot.
    ///
    /// # Errors
    /// Returns an error if the backing storage cannot be read.
    fn load(&self) -> ChatResult<Option<DraftSnapshot>>;

    /// Remove the snapshot.
    ///
    /// # Errors
    /// Returns an error if the snapshot exists but cannot be removed.
    fn clear(&self) -> ChatResult<()>;
}

#[derive(Deserialize)]
struct StoredDraft {
    version: u32,
    #[serde(flatten)]
    snapshot: DraftSnapshot,
}

#[derive(Serialize)]
struct StoredDraftRef<'a> {
    version: u32,
    #[serde(flatten)]
    snapshot: &'a DraftSnapshot,
}

/// Draft buffer stored as a JSON file.
pub struct FileDraftBuffer {
    path: PathBuf,
}

impl FileDraftBuffer {
    /// Use the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Use the configured path.
    #[must_use]
    pub fn from_config(config: &DraftConfig) -> Self {
        Self::new(config.path.clone())
    }

    /// Location of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl DraftBuffer for FileDraftBuffer {
    fn save(&self, snapshot: &DraftSnapshot) -> ChatResult<()> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let bytes = serde_json::to_vec(&StoredDraftRef {
            version: SNAPSHOT_VERSION,
            snapshot,
        })?;
        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, bytes)?;
        match fs::rename(&tmp_path, &self.path) {
            Ok(()) => {}
            Err(rename_err) => {
                if self.path.exists() {
                    fs::remove_file(&self.path)?;
                    fs::rename(&tmp_path, &self.path)?;
                } else {
                    return Err(rename_err.into());
                }
            }
        }
        debug!(path = %self.path.display(), count = snapshot.messages.len(), "draft saved");
        Ok(())
    }

    fn load(&self) -> ChatResult<Option<DraftSnapshot>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_slice::<StoredDraft>(&data) {
            Ok(stored) if stored.version == SNAPSHOT_VERSION => Ok(Some(stored.snapshot)),
            Ok(stored) => {
                warn!(
                    path = %self.path.display(),
                    version = stored.version,
                    "ignoring draft with unknown version"
                );
                Ok(None)
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring corrupt draft");
                Ok(None)
            }
        }
    }

    fn clear(&self) -> ChatResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Draft buffer held in memory, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryDraftBuffer {
    slot: Mutex<Option<DraftSnapshot>>,
}

impl MemoryDraftBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer pre-filled with `snapshot`.
    #[must_use]
    pub fn with_snapshot(snapshot: DraftSnapshot) -> Self {
        Self {
            slot: Mutex::new(Some(snapshot)),
        }
    }
}

impl DraftBuffer for MemoryDraftBuffer {
    fn save(&self, snapshot: &DraftSnapshot) -> ChatResult<()> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> ChatResult<Option<DraftSnapshot>> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slot.clone())
    }

    fn clear(&self) -> ChatResult<()> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
        Ok(())
    }
}
