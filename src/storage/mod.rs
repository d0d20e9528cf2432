//! Persistent key-value storage seam.
//!
//! The config manager drives storage through the [`ConfigStore`] trait so
//! the state machine is testable without flash hardware.
//!
//! # Implementations
//!
//! - [`MemoryStore`] - in-process map for host builds and tests
//! - [`nvs::NvsStore`] - ESP32 NVS partition (`esp32` feature)

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

#[cfg(feature = "esp32")]
pub mod nvs;

/// NVS-style namespace holding the configuration blob.
pub const CONFIG_NAMESPACE: &str = "config_storage";

/// Storage key of the combined configuration blob.
///
/// Connectivity, system and user sections share this single key; the blob is
/// written atomically as one unit.
pub const UNIT_CONFIG_KEY: &str = "unit_config";

/// Backend failures, mapped from whatever the platform reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The key holds no value.
    NotFound,
    /// The store is not open.
    NotOpen,
    /// Backend I/O failure (flash error, commit failure, ...).
    Io(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::NotOpen => write!(f, "store not open"),
            Self::Io(msg) => write!(f, "storage I/O error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

/// Flash-backed key-value store contract.
///
/// Synchronous from the caller's perspective; the config manager worker
/// blocks while an operation completes.
pub trait ConfigStore: Send {
    /// Open (or re-open) the backing store.
    fn open(&mut self) -> Result<(), StorageError>;

    /// Read the value stored under `key`.
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stage a value under `key`.
    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Flush staged values to the backing medium.
    fn commit(&mut self) -> Result<(), StorageError>;

    /// Close the store; a later `open` may resume.
    fn close(&mut self);
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, Vec<u8>>,
    open: bool,
    fail_next_commit: bool,
    fail_open: bool,
}

/// In-memory store for host builds and tests.
///
/// Cloning shares the underlying map, so a test can keep a handle to
/// inspect or corrupt storage after the config manager took ownership of
/// another clone. Injected failures fire at `commit`/`open`, mirroring how
/// NVS reports flash errors.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a key before the store is opened (test seeding).
    pub fn seed(self, key: &str, value: Vec<u8>) -> Self {
        self.lock().entries.insert(key.to_string(), value);
        self
    }

    /// Make the next `commit` fail with an I/O error.
    pub fn fail_next_commit(&self) {
        self.lock().fail_next_commit = true;
    }

    /// Make every `open` fail with an I/O error.
    pub fn fail_open(&self) {
        self.lock().fail_open = true;
    }

    /// Overwrite a stored value regardless of open state (test seam).
    pub fn insert_raw(&self, key: &str, value: Vec<u8>) {
        self.lock().entries.insert(key.to_string(), value);
    }

    /// Read a stored value regardless of open state (test seam).
    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().entries.get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ConfigStore for MemoryStore {
    fn open(&mut self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.fail_open {
            return Err(StorageError::Io("simulated open failure".to_string()));
        }
        inner.open = true;
        Ok(())
    }

    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let inner = self.lock();
        if !inner.open {
            return Err(StorageError::NotOpen);
        }
        Ok(inner.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if !inner.open {
            return Err(StorageError::NotOpen);
        }
        inner.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if !inner.open {
            return Err(StorageError::NotOpen);
        }
        if inner.fail_next_commit {
            inner.fail_next_commit = false;
            return Err(StorageError::Io("simulated commit failure".to_string()));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.lock().open = false;
    }
}
