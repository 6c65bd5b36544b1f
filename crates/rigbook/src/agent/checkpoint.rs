//! Persistence of [`ConversationState`] between turns, keyed by thread id.
//!
//! [`MemoryCheckpointStore`] lives for the process; [`FileCheckpointStore`]
//! writes one JSON file per thread with an atomic temp-file-then-rename, so a
//! crash mid-write leaves the previous checkpoint intact.

use crate::agent::state::ConversationState;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("checkpoint for thread '{thread_id}' is corrupt: {source}")]
    Corrupt {
        thread_id: String,
        source: serde_json::Error,
    },
    #[error("invalid thread id '{0}'")]
    InvalidThreadId(String),
}

pub type CheckpointFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, CheckpointError>> + Send + 'a>>;

pub trait CheckpointStore: Send + Sync {
    /// `Ok(None)` for a thread that has never been saved.
    fn load<'a>(&'a self, thread_id: &'a str) -> CheckpointFuture<'a, Option<ConversationState>>;

    fn save<'a>(&'a self, state: &'a ConversationState) -> CheckpointFuture<'a, ()>;
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    threads: Mutex<HashMap<String, ConversationState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load<'a>(&'a self, thread_id: &'a str) -> CheckpointFuture<'a, Option<ConversationState>> {
        let found = self
            .threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(thread_id)
            .cloned();
        Box::pin(async move { Ok(found) })
    }

    fn save<'a>(&'a self, state: &'a ConversationState) -> CheckpointFuture<'a, ()> {
        self.threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(state.thread_id.clone(), state.clone());
        Box::pin(async { Ok(()) })
    }
}

/// One `<thread_id>.json` per thread under a directory.
///
/// ```text
/// checkpoint_dir/
///   ops-desk.json
///   .ops-desk.json.tmp   (only while a write is in flight)
/// ```
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create the store, ensuring the directory exists.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| CheckpointError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &str) -> Result<PathBuf, CheckpointError> {
        let valid = !thread_id.is_empty()
            && thread_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !thread_id.starts_with('.');
        if !valid {
            return Err(CheckpointError::InvalidThreadId(thread_id.to_string()));
        }
        Ok(self.dir.join(format!("{thread_id}.json")))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load<'a>(&'a self, thread_id: &'a str) -> CheckpointFuture<'a, Option<ConversationState>> {
        Box::pin(async move {
            let path = self.path_for(thread_id)?;
            let json = match tokio::fs::read_to_string(&path).await {
                Ok(json) => json,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(source) => return Err(CheckpointError::Io { path, source }),
            };
            let state = serde_json::from_str(&json).map_err(|source| CheckpointError::Corrupt {
                thread_id: thread_id.to_string(),
                source,
            })?;
            Ok(Some(state))
        })
    }

    fn save<'a>(&'a self, state: &'a ConversationState) -> CheckpointFuture<'a, ()> {
        Box::pin(async move {
            let final_path = self.path_for(&state.thread_id)?;
            let tmp_path = self.dir.join(format!(".{}.json.tmp", state.thread_id));

            let json = serde_json::to_string_pretty(state).map_err(|source| {
                CheckpointError::Corrupt {
                    thread_id: state.thread_id.clone(),
                    source,
                }
            })?;
            tokio::fs::write(&tmp_path, json)
                .await
                .map_err(|source| CheckpointError::Io {
                    path: tmp_path.clone(),
                    source,
                })?;
            tokio::fs::rename(&tmp_path, &final_path)
                .await
                .map_err(|source| CheckpointError::Io {
                    path: final_path.clone(),
                    source,
                })?;
            Ok(())
        })
    }
}
