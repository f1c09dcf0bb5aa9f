//! History persistence boundary
//!
//! Key-value-by-user-id document interface for the alert history. The
//! storage technology is external; two adapters ship with the crate.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::AlertRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("History storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("History document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Invalid user id for storage: {0}")]
    InvalidKey(String),
}

/// Persisted alert history, keyed by the authenticated user's identity
pub trait HistoryStore: Send + Sync {
    /// Records for `user_id`; empty when nothing was stored yet
    fn load(&self, user_id: &str) -> Result<Vec<AlertRecord>, StoreError>;

    fn save(&self, user_id: &str, records: &[AlertRecord]) -> Result<(), StoreError>;
}

/// Process-local store, used when no data directory is configured
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, Vec<AlertRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryStore {
    fn load(&self, user_id: &str) -> Result<Vec<AlertRecord>, StoreError> {
        let documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        Ok(documents.get(user_id).cloned().unwrap_or_default())
    }

    fn save(&self, user_id: &str, records: &[AlertRecord]) -> Result<(), StoreError> {
        let mut documents = self.documents.lock().unwrap_or_else(|e| e.into_inner());
        documents.insert(user_id.to_string(), records.to_vec());
        Ok(())
    }
}

/// One JSON document per user under a data directory
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!(path = %root.display(), "Using JSON file history store");
        Ok(Self { root })
    }

    fn path_for(&self, user_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !user_id.is_empty()
            && user_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && user_id != "."
            && user_id != "..";
        if !valid {
            return Err(StoreError::InvalidKey(user_id.to_string()));
        }
        Ok(self.root.join(format!("{}.json", user_id)))
    }
}

impl HistoryStore for JsonFileStore {
    fn load(&self, user_id: &str) -> Result<Vec<AlertRecord>, StoreError> {
        let path = self.path_for(user_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&path)?;
        let records: Vec<AlertRecord> = serde_json::from_slice(&bytes)?;
        debug!(user_id = %user_id, count = records.len(), "Loaded history document");
        Ok(records)
    }

    fn save(&self, user_id: &str, records: &[AlertRecord]) -> Result<(), StoreError> {
        let path = self.path_for(user_id)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(records)?)?;
        fs::rename(&tmp, &path)?;
        debug!(user_id = %user_id, count = records.len(), "Saved history document");
        Ok(())
    }
}
