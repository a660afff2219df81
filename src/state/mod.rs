// State module - persistent key/value document for daemon state

use crate::error::{WardenError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Version of the state file format
const STATE_VERSION: &str = "1";

/// The document written to disk: a versioned map of JSON values by key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub version: String,
    pub entries: BTreeMap<String, serde_json::Value>,
    pub last_updated: DateTime<Utc>,
}

impl StateDocument {
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            entries: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != STATE_VERSION {
            return Err(WardenError::StateCorruption(format!(
                "Incompatible state version: expected {}, found {}",
                STATE_VERSION, self.version
            )));
        }
        Ok(())
    }
}

impl Default for StateDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// File-backed store. Every `set` rewrites the whole document through a
/// temp file and an atomic rename.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    document: Mutex<StateDocument>,
}

impl StateStore {
    /// Open the store at `path`, loading the existing document if present
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = Self::load(&path)?;
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    fn load(path: &Path) -> Result<StateDocument> {
        if !path.exists() {
            return Ok(StateDocument::new());
        }

        let file = File::open(path).map_err(|e| {
            WardenError::StateLoadError(format!("Failed to open state file: {}", e))
        })?;

        let document: StateDocument = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| WardenError::StateLoadError(format!("Failed to parse state file: {}", e)))?;

        document.validate()?;
        Ok(document)
    }

    /// Value stored under `key`, or `default` when absent
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        let document = self.lock()?;
        match document.entries.get(key) {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                WardenError::StateCorruption(format!("Invalid value for '{}': {}", key, e))
            }),
            None => Ok(default),
        }
    }

    /// Store `value` under `key` and persist the document
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| WardenError::StateSaveError(format!("Failed to serialize '{}': {}", key, e)))?;

        let mut document = self.lock()?;
        document.entries.insert(key.to_string(), value);
        document.last_updated = Utc::now();
        self.save(&document)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let mut document = self.lock()?;
        if document.entries.remove(key).is_some() {
            document.last_updated = Utc::now();
            self.save(&document)?;
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StateDocument>> {
        self.document
            .lock()
            .map_err(|_| WardenError::Internal("State store lock poisoned".to_string()))
    }

    fn save(&self, document: &StateDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                WardenError::StateSaveError(format!("Failed to create state directory: {}", e))
            })?;
        }

        let temp_path = self.path.with_extension("tmp");

        {
            let file = File::create(&temp_path).map_err(|e| {
                WardenError::StateSaveError(format!("Failed to create temp state file: {}", e))
            })?;
            let mut writer = BufWriter::new(file);

            serde_json::to_writer_pretty(&mut writer, document).map_err(|e| {
                WardenError::StateSaveError(format!("Failed to serialize state: {}", e))
            })?;

            writer.flush().map_err(|e| {
                WardenError::StateSaveError(format!("Failed to flush state file: {}", e))
            })?;
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            WardenError::StateSaveError(format!("Failed to rename temp state file: {}", e))
        })?;

        tracing::debug!(path = %self.path.display(), "state saved");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
