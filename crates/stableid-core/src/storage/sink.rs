//! Persistence sinks for the registry document.

use super::atomic::{atomic_read_json, atomic_write_json};
use crate::id::PersistentId;
use crate::types::ScopeKey;
use crate::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// The persisted form of the registry: scope key -> ascending identifiers.
///
/// Counts and the flattened identifier set are derived on load and never
/// written, so there is only one source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub scopes: BTreeMap<ScopeKey, Vec<PersistentId>>,
}

fn default_version() -> u32 {
    FORMAT_VERSION
}

impl Default for RegistryDocument {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            scopes: BTreeMap::new(),
        }
    }
}

/// Durable storage for the registry.
///
/// `save` must be atomic at the granularity of one call.
pub trait PersistenceSink: Send {
    fn load(&self) -> Result<RegistryDocument>;

    fn save(&self, document: &RegistryDocument) -> Result<()>;

    /// Human-readable location, used in logs.
    fn describe(&self) -> String;
}

/// Registry stored as a JSON file, written atomically.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
    keep_backup: bool,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keep_backup: false,
        }
    }

    /// Copy the previous file to `<name>.bak` before every write.
    pub fn with_backup(mut self, keep_backup: bool) -> Self {
        self.keep_backup = keep_backup;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistenceSink for JsonFileSink {
    fn load(&self) -> Result<RegistryDocument> {
        let document: RegistryDocument = atomic_read_json(&self.path)?.unwrap_or_default();
        if document.version != FORMAT_VERSION {
            return Err(RegistryError::UnsupportedVersion {
                found: document.version,
                expected: FORMAT_VERSION,
            });
        }
        Ok(document)
    }

    fn save(&self, document: &RegistryDocument) -> Result<()> {
        atomic_write_json(&self.path, document, self.keep_backup)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    document: RegistryDocument,
    saves: usize,
    fail_saves: bool,
}

/// In-memory sink. Clones share state, so a test can keep a handle and
/// inspect what the registry persisted.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink pre-populated with a document, as if loaded from disk.
    pub fn with_document(document: RegistryDocument) -> Self {
        let sink = Self::default();
        if let Ok(mut state) = sink.state.lock() {
            state.document = document;
        }
        sink
    }

    /// Make every subsequent `save` fail until switched back.
    pub fn set_fail_saves(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_saves = fail;
        }
    }

    /// Snapshot of the last persisted document.
    pub fn document(&self) -> RegistryDocument {
        self.state
            .lock()
            .map(|s| s.document.clone())
            .unwrap_or_default()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.state.lock().map(|s| s.saves).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| RegistryError::Other("Memory sink lock poisoned".to_string()))
    }
}

impl PersistenceSink for MemorySink {
    fn load(&self) -> Result<RegistryDocument> {
        Ok(self.lock()?.document.clone())
    }

    fn save(&self, document: &RegistryDocument) -> Result<()> {
        let mut state = self.lock()?;
        if state.fail_saves {
            return Err(RegistryError::Io {
                message: "simulated save failure".to_string(),
                path: None,
                source: None,
            });
        }
        state.document = document.clone();
        state.saves += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
