//! Key-value settings stores.
//!
//! [`MemoryStore`] keeps entries in memory only. [`FileStore`] keeps the
//! same map and writes it through to a JSON file after every mutation:
//!
//! ```text
//! {
//!   "version": 1,
//!   "entries": { "jd:name": [104, 105] }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::SettingsStore;
use crate::error::StoreError;

const SNAPSHOT_VERSION: u32 = 1;

fn list_prefixed(entries: &BTreeMap<String, Vec<u8>>, prefix: &str) -> Vec<String> {
    entries
        .range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect()
}

/// In-memory [`SettingsStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, across all namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl SettingsStore for MemoryStore {
    fn list(&self, prefix: &str) -> Vec<String> {
        list_prefixed(&self.entries.lock(), prefix)
    }

    fn read_buffer(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).cloned()
    }

    fn write_buffer(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: BTreeMap<String, Vec<u8>>,
}

/// JSON-file-backed [`SettingsStore`] with write-through persistence.
///
/// Writes go to a temporary sibling file that is then renamed over the
/// target, so a crash never leaves a half-written file behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl FileStore {
    /// Opens the store at `path`, loading existing entries if the file
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the file exists but cannot be read or
    /// parsed, or was written with another snapshot version.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = std::fs::read(&path)?;
            let snapshot: Snapshot = serde_json::from_slice(&raw)?;
            if snapshot.version != SNAPSHOT_VERSION {
                return Err(StoreError::Version(snapshot.version));
            }
            snapshot.entries
        } else {
            BTreeMap::new()
        };
        tracing::info!(path = %path.display(), keys = entries.len(), "settings store opened");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn persist(&self, entries: &BTreeMap<String, Vec<u8>>) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entries: entries.clone(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        let temp = self.temp_path();
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for FileStore {
    fn list(&self, prefix: &str) -> Vec<String> {
        list_prefixed(&self.entries.lock(), prefix)
    }

    fn read_buffer(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(key).cloned()
    }

    fn write_buffer(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let mut staged = entries.clone();
        staged.insert(key.to_string(), value.to_vec());
        self.persist(&staged)?;
        *entries = staged;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut staged = entries.clone();
        staged.remove(key);
        self.persist(&staged)?;
        *entries = staged;
        Ok(())
    }
}
