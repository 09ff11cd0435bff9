//! File-based and in-memory state stores.
//!
//! `FileStateStore` keeps three human-readable JSON files in one directory:
//! `progress.json` (recipient → next step), `responded.json` (list of ids)
//! and `last_sent.json` (group → epoch ms). Every write rewrites the whole
//! file through a temp file + rename, so a crash never leaves half a file.
//! The cached copy only changes once the file write has succeeded.

use async_trait::async_trait;
use relaycast_core::error::{RelayError, Result};
use relaycast_core::traits::{CheckpointStore, EngagementCheck, LastSentStore, ResponseGuard};
use relaycast_core::types::Checkpoint;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const PROGRESS_FILE: &str = "progress.json";
const RESPONDED_FILE: &str = "responded.json";
const LAST_SENT_FILE: &str = "last_sent.json";

/// A progress record. Bare numbers are accepted for files that only stored
/// the step index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ProgressEntry {
    Full {
        #[serde(default)]
        sequence: Option<String>,
        step_index: usize,
    },
    Index(usize),
}

impl ProgressEntry {
    fn into_checkpoint(self, recipient_id: &str) -> Checkpoint {
        let (sequence, step_index) = match self {
            ProgressEntry::Full { sequence, step_index } => (sequence, step_index),
            ProgressEntry::Index(i) => (None, i),
        };
        Checkpoint {
            recipient_id: recipient_id.to_string(),
            sequence,
            step_index,
        }
    }
}

#[derive(Default)]
struct FileState {
    progress: BTreeMap<String, ProgressEntry>,
    responded: BTreeSet<String>,
    last_sent: BTreeMap<String, i64>,
}

/// JSON-file state store.
pub struct FileStateStore {
    dir: PathBuf,
    state: Mutex<FileState>,
}

impl FileStateStore {
    /// Open the store directory, loading whatever state already exists.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| RelayError::Persistence(format!("Create {}: {e}", dir.display())))?;
        let state = FileState {
            progress: read_json(&dir.join(PROGRESS_FILE))?,
            responded: read_json(&dir.join(RESPONDED_FILE))?,
            last_sent: read_json(&dir.join(LAST_SENT_FILE))?,
        };
        tracing::debug!(
            "📂 Loaded state from {}: {} in flight, {} responded",
            dir.display(),
            state.progress.len(),
            state.responded.len()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state(&self) -> Result<MutexGuard<'_, FileState>> {
        self.state
            .lock()
            .map_err(|e| RelayError::Persistence(format!("State lock poisoned: {e}")))
    }

    /// Remove a recipient from the response guard. Operator action only.
    pub fn forget_responded(&self, recipient_id: &str) -> Result<bool> {
        let mut state = self.state()?;
        if !state.responded.contains(recipient_id) {
            return Ok(false);
        }
        let mut responded = state.responded.clone();
        responded.remove(recipient_id);
        write_json(&self.dir.join(RESPONDED_FILE), &responded)?;
        state.responded = responded;
        Ok(true)
    }

    pub fn all_last_sent(&self) -> Result<Vec<(String, i64)>> {
        Ok(self
            .state()?
            .last_sent
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| RelayError::Persistence(format!("Read {}: {e}", path.display())))?;
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&raw)
        .map_err(|e| RelayError::Persistence(format!("Parse {}: {e}", path.display())))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| RelayError::Persistence(format!("Serialize error: {e}")))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .map_err(|e| RelayError::Persistence(format!("Write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| RelayError::Persistence(format!("Rename {}: {e}", path.display())))?;
    Ok(())
}

#[async_trait]
impl CheckpointStore for FileStateStore {
    async fn load(&self) -> Result<Vec<Checkpoint>> {
        Ok(self
            .state()?
            .progress
            .iter()
            .map(|(id, entry)| entry.clone().into_checkpoint(id))
            .collect())
    }

    async fn get(&self, recipient_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .state()?
            .progress
            .get(recipient_id)
            .map(|entry| entry.clone().into_checkpoint(recipient_id)))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut state = self.state()?;
        let mut progress = state.progress.clone();
        progress.insert(
            checkpoint.recipient_id.clone(),
            ProgressEntry::Full {
                sequence: checkpoint.sequence.clone(),
                step_index: checkpoint.step_index,
            },
        );
        write_json(&self.dir.join(PROGRESS_FILE), &progress)?;
        state.progress = progress;
        Ok(())
    }

    async fn clear(&self, recipient_id: &str) -> Result<()> {
        let mut state = self.state()?;
        if !state.progress.contains_key(recipient_id) {
            return Ok(());
        }
        let mut progress = state.progress.clone();
        progress.remove(recipient_id);
        write_json(&self.dir.join(PROGRESS_FILE), &progress)?;
        state.progress = progress;
        Ok(())
    }
}

#[async_trait]
impl ResponseGuard for FileStateStore {
    async fn is_responded(&self, recipient_id: &str) -> Result<bool> {
        Ok(self.state()?.responded.contains(recipient_id))
    }

    async fn mark_responded(&self, recipient_id: &str) -> Result<()> {
        let mut state = self.state()?;
        if state.responded.contains(recipient_id) {
            return Ok(());
        }
        let mut responded = state.responded.clone();
        responded.insert(recipient_id.to_string());
        write_json(&self.dir.join(RESPONDED_FILE), &responded)?;
        state.responded = responded;
        Ok(())
    }
}

#[async_trait]
impl LastSentStore for FileStateStore {
    async fn last_sent_ms(&self, group_id: &str) -> Result<Option<i64>> {
        Ok(self.state()?.last_sent.get(group_id).copied())
    }

    async fn record_sent(&self, group_id: &str, at_ms: i64) -> Result<()> {
        let mut state = self.state()?;
        let mut last_sent = state.last_sent.clone();
        last_sent.insert(group_id.to_string(), at_ms);
        write_json(&self.dir.join(LAST_SENT_FILE), &last_sent)?;
        state.last_sent = last_sent;
        Ok(())
    }
}

/// Volatile store for tests and `--dry-run`.
#[derive(Default)]
pub struct MemoryStateStore {
    progress: Mutex<HashMap<String, Checkpoint>>,
    responded: Mutex<HashSet<String>>,
    last_sent: Mutex<HashMap<String, i64>>,
    engaged: Mutex<HashMap<String, String>>,
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> RelayError {
    RelayError::Persistence(format!("State lock poisoned: {e}"))
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag a recipient as engaged elsewhere.
    pub fn set_engaged(&self, recipient_id: &str, reason: &str) -> Result<()> {
        self.engaged
            .lock()
            .map_err(poisoned)?
            .insert(recipient_id.to_string(), reason.to_string());
        Ok(())
    }

    pub fn forget_responded(&self, recipient_id: &str) -> Result<bool> {
        Ok(self.responded.lock().map_err(poisoned)?.remove(recipient_id))
    }
}

#[async_trait]
impl CheckpointStore for MemoryStateStore {
    async fn load(&self) -> Result<Vec<Checkpoint>> {
        Ok(self.progress.lock().map_err(poisoned)?.values().cloned().collect())
    }

    async fn get(&self, recipient_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.progress.lock().map_err(poisoned)?.get(recipient_id).cloned())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.progress
            .lock()
            .map_err(poisoned)?
            .insert(checkpoint.recipient_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn clear(&self, recipient_id: &str) -> Result<()> {
        self.progress.lock().map_err(poisoned)?.remove(recipient_id);
        Ok(())
    }
}

#[async_trait]
impl ResponseGuard for MemoryStateStore {
    async fn is_responded(&self, recipient_id: &str) -> Result<bool> {
        Ok(self.responded.lock().map_err(poisoned)?.contains(recipient_id))
    }

    async fn mark_responded(&self, recipient_id: &str) -> Result<()> {
        self.responded
            .lock()
            .map_err(poisoned)?
            .insert(recipient_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl LastSentStore for MemoryStateStore {
    async fn last_sent_ms(&self, group_id: &str) -> Result<Option<i64>> {
        Ok(self.last_sent.lock().map_err(poisoned)?.get(group_id).copied())
    }

    async fn record_sent(&self, group_id: &str, at_ms: i64) -> Result<()> {
        self.last_sent
            .lock()
            .map_err(poisoned)?
            .insert(group_id.to_string(), at_ms);
        Ok(())
    }
}

#[async_trait]
impl EngagementCheck for MemoryStateStore {
    async fn engaged_reason(&self, recipient_id: &str) -> Result<Option<String>> {
        Ok(self.engaged.lock().map_err(poisoned)?.get(recipient_id).cloned())
    }
}
