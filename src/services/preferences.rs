//! Keyed preference storage, namespaced by device identity.
//!
//! The engine only needs `get(device, field)` and `set(device, field, value)`;
//! how values are kept is up to the implementation. [`JsonFileStore`] reads its
//! file once when opened and writes it through on every `set`.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::error::{AppError, AppResult};

/// `{ deviceId: { field: value } }`
type Document = BTreeMap<String, BTreeMap<String, Value>>;

pub trait PreferenceStore: Send + Sync {
    fn get(&self, device_id: &str, field: &str) -> Option<Value>;

    /// # Errors
    ///
    /// Returns `AppError::Storage` if the value cannot be persisted.
    fn set(&self, device_id: &str, field: &str, value: Value) -> AppResult<()>;
}

/// Process-local store, nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: RwLock<Document>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, device_id: &str, field: &str) -> Option<Value> {
        let doc = self.doc.read().unwrap_or_else(PoisonError::into_inner);
        doc.get(device_id).and_then(|fields| fields.get(field)).cloned()
    }

    fn set(&self, device_id: &str, field: &str, value: Value) -> AppResult<()> {
        let mut doc = self.doc.write().unwrap_or_else(PoisonError::into_inner);
        doc.entry(device_id.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }
}

/// Single JSON file holding every device's preferences.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    doc: RwLock<Document>,
}

impl JsonFileStore {
    /// Open the store, loading the file if it exists.
    ///
    /// A missing file starts empty. An unreadable or malformed file is logged
    /// and also starts empty; it is replaced on the next `set`.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let doc = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed preferences file");
                Document::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read preferences file");
                Document::new()
            }
        };

        tracing::debug!(
            path = %path.display(),
            devices = doc.len(),
            "Preferences loaded"
        );

        Self {
            path,
            doc: RwLock::new(doc),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, doc: &Document) -> AppResult<()> {
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| AppError::Storage(format!("serialize: {e}")))?;

        // Write a sibling file and rename it over the original so a crash
        // mid-write never leaves a truncated document.
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, bytes)
            .map_err(|e| AppError::Storage(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| AppError::Storage(format!("rename to {}: {e}", self.path.display())))
    }
}

impl PreferenceStore for JsonFileStore {
    fn get(&self, device_id: &str, field: &str) -> Option<Value> {
        let doc = self.doc.read().unwrap_or_else(PoisonError::into_inner);
        doc.get(device_id).and_then(|fields| fields.get(field)).cloned()
    }

    fn set(&self, device_id: &str, field: &str, value: Value) -> AppResult<()> {
        let mut doc = self.doc.write().unwrap_or_else(PoisonError::into_inner);
        doc.entry(device_id.to_string())
            .or_default()
            .insert(field.to_string(), value);
        self.persist(&doc)
    }
}
