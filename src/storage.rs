use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Durable store keys.
pub const CONSENT_KEY: &str = "cookieConsent";
pub const CONSENT_DATE_KEY: &str = "cookieConsentDate";
pub const USER_ID_KEY: &str = "userId";
/// Session-scoped store key.
pub const SESSION_ID_KEY: &str = "sessionId";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable")]
    Unavailable,
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage file is not a string map: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Key/value port standing in for browser local and session storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// In-memory store; lives as long as the value does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RefCell<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.entries.borrow_mut().clear();
        Ok(())
    }
}

/// JSON file backed store. Every write rewrites the whole file, so two
/// processes sharing a file get last-write-wins.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: RefCell<Map<String, Value>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => Map::new(),
            Ok(raw) => serde_json::from_str::<Map<String, Value>>(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(err) => return Err(err.into()),
        };
        debug!(path = %path.display(), keys = entries.len(), "opened file store");
        Ok(Self {
            path,
            entries: RefCell::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&*self.entries.borrow())?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .entries
            .borrow()
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), Value::String(value.to_string()));
        self.flush()
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        if self.entries.borrow_mut().remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.entries.borrow_mut().clear();
        self.flush()
    }
}

/// Store that refuses every operation, like storage in a locked-down browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStore;

impl KeyValueStore for UnavailableStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable)
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable)
    }

    fn clear(&self) -> Result<(), StorageError> {
        Err(StorageError::Unavailable)
    }
}
