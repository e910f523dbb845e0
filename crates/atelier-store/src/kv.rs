//! String key-value storage.
//!
//! [`KvStore`] keeps the browser-local-storage contract the higher layers
//! were designed against: opaque string values under string keys, with a
//! hard per-slot capacity.  [`FileKvStore`] persists each key as one file
//! under the platform data directory; [`MemoryKvStore`] backs tests.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::ProjectDirs;

use atelier_shared::constants::KV_DEFAULT_CAPACITY;

use crate::error::{Result, StoreError};

/// Synchronous string key-value storage with a per-slot byte capacity.
pub trait KvStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// Fails with [`StoreError::CapacityExceeded`] when the value is larger
    /// than [`KvStore::capacity`].
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the value stored under `key`.  Removing a missing key is not
    /// an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Capacity of a single slot in bytes.
    fn capacity(&self) -> usize;
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// Key-value store persisting each key as one file in a base directory.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    base_dir: PathBuf,
    capacity: usize,
}

impl FileKvStore {
    /// Open (or create) the store in the platform data directory:
    /// - Linux:   `~/.local/share/atelier/storage`
    /// - macOS:   `~/Library/Application Support/com.atelier.atelier/storage`
    /// - Windows: `{FOLDERID_RoamingAppData}\atelier\atelier\data\storage`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "atelier", "atelier").ok_or(StoreError::NoDataDir)?;
        let base_dir = project_dirs.data_dir().join("storage");

        tracing::info!(path = %base_dir.display(), "opening key-value store");

        Self::open_at(&base_dir, KV_DEFAULT_CAPACITY)
    }

    /// Open (or create) a store at an explicit directory.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(base_dir: &Path, capacity: usize) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            capacity,
        })
    }

    /// Resolve the file a key is stored in, rejecting anything that could
    /// escape the base directory.
    fn key_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.base_dir.join(key))
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key)?;
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if value.len() > self.capacity {
            return Err(StoreError::CapacityExceeded {
                size: value.len(),
                capacity: self.capacity,
            });
        }
        let path = self.key_path(key)?;
        std::fs::write(&path, value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Volatile key-value store used in tests and ephemeral sessions.
pub struct MemoryKvStore {
    values: Mutex<HashMap<String, String>>,
    capacity: usize,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::with_capacity(KV_DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned lock means a panic mid-write; the map itself is still
        // a consistent snapshot.
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if value.len() > self.capacity {
            return Err(StoreError::CapacityExceeded {
                size: value.len(),
                capacity: self.capacity,
            });
        }
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::open_at(dir.path(), 1024).unwrap();

        assert_eq!(store.get("missing").unwrap(), None);

        store.set("session", r#"{"userId":"user_1"}"#).unwrap();
        assert_eq!(
            store.get("session").unwrap().as_deref(),
            Some(r#"{"userId":"user_1"}"#)
        );

        store.remove("session").unwrap();
        assert_eq!(store.get("session").unwrap(), None);
    }

    #[test]
    fn file_store_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::open_at(dir.path(), 1024).unwrap();
        store.remove("never-set").unwrap();
    }

    #[test]
    fn file_store_enforces_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::open_at(dir.path(), 16).unwrap();

        let err = store.set("key", &"x".repeat(17)).unwrap_err();
        assert!(matches!(err, StoreError::CapacityExceeded { size: 17, .. }));

        store.set("key", &"x".repeat(16)).unwrap();
    }

    #[test]
    fn file_store_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::open_at(dir.path(), 1024).unwrap();

        for key in ["../escape", "a/b", "a\\b", ""] {
            assert!(matches!(
                store.set(key, "value"),
                Err(StoreError::InvalidKey(_))
            ));
        }
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryKvStore::with_capacity(64);

        store.set("key", "value").unwrap();
        assert_eq!(store.get("key").unwrap().as_deref(), Some("value"));

        store.remove("key").unwrap();
        assert_eq!(store.get("key").unwrap(), None);

        assert!(store.set("key", &"y".repeat(65)).is_err());
    }
}
