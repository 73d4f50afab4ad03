//! Key-value persistence for the resume pointer.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::{PlayerError, Result};

/// Key under which the last started track is stored.
pub const RESUME_KEY: &str = "last_track";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// One JSON object per file. Writes go to a temp file in the same directory and are
/// renamed over the target.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                PlayerError::Persistence(format!("parse {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(PlayerError::Persistence(format!(
                "read {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn store(&self, map: &BTreeMap<String, String>) -> Result<()> {
        let persist_err =
            |e: std::io::Error| PlayerError::Persistence(format!("write {}: {e}", self.path.display()));
        let body = serde_json::to_vec_pretty(map)
            .map_err(|e| PlayerError::Persistence(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).map_err(persist_err)?;
        file.write_all(&body).map_err(persist_err)?;
        file.sync_all().map_err(persist_err)?;
        fs::rename(&tmp, &self.path).map_err(persist_err)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "state file unreadable; starting fresh");
            BTreeMap::new()
        });
        map.insert(key.to_string(), value.to_string());
        self.store(&map)
    }
}

/// Volatile store used when no state file is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
