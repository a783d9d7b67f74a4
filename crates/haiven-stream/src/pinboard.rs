//! Pinboard: snippets the user pinned from generated output.
//!
//! The whole board is a flat `{timestamp: content}` map stored as one JSON
//! value under a single key of a local key-value store.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::errors::StoreError;

/// Key the pinboard is stored under.
pub const PINBOARD_KEY: &str = "pinboard";

/// Pinned entries keyed by creation time in Unix milliseconds.
pub type PinboardEntries = BTreeMap<i64, String>;

/// Minimal string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store backed by one JSON object file. A missing file is an empty store.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut all = self.load()?;
        all.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        // Readers never observe a partially written file.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&all)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), key, "store updated");
        Ok(())
    }
}

/// Pinboard view over a key-value store.
pub struct Pinboard<S> {
    store: S,
}

impl<S: KeyValueStore> Pinboard<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Reads the whole board. A store without the key is an empty board.
    pub fn read(&self) -> Result<PinboardEntries, StoreError> {
        match self.store.get(PINBOARD_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(PinboardEntries::new()),
        }
    }

    /// Replaces the whole board.
    pub fn write(&self, entries: &PinboardEntries) -> Result<(), StoreError> {
        let raw = serde_json::to_string(entries)?;
        self.store.set(PINBOARD_KEY, &raw)
    }

    /// Pins `content` under the current time and returns its timestamp.
    pub fn pin(&self, content: impl Into<String>) -> Result<i64, StoreError> {
        let mut entries = self.read()?;
        let mut timestamp = chrono::Utc::now().timestamp_millis();
        while entries.contains_key(&timestamp) {
            timestamp += 1;
        }
        entries.insert(timestamp, content.into());
        self.write(&entries)?;
        Ok(timestamp)
    }

    /// Removes the entry pinned at `timestamp`. Returns false if absent.
    pub fn unpin(&self, timestamp: i64) -> Result<bool, StoreError> {
        let mut entries = self.read()?;
        if entries.remove(&timestamp).is_none() {
            return Ok(false);
        }
        self.write(&entries)?;
        Ok(true)
    }

    /// Entries newest first.
    pub fn entries(&self) -> Result<Vec<(i64, String)>, StoreError> {
        Ok(self.read()?.into_iter().rev().collect())
    }
}
