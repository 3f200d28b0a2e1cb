//! Catalog persistence
//!
//! A store holds a single record, `{"files": [...]}`. `load` always hands back
//! a usable catalog; read problems are logged and degrade to an empty one.
//! `save` replaces the record in one step so a reader never sees half a file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::{complete_entries, Catalog};

/// File name of the persisted catalog inside the data directory
pub const CATALOG_FILE_NAME: &str = "catalog.json";

/// Catalog persistence error
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable storage for the catalog.
pub trait CatalogStore: Send + Sync {
    /// Last persisted catalog, or an empty one.
    fn load(&self) -> Catalog;

    /// Replace the persisted catalog.
    fn save(&self, catalog: &Catalog) -> Result<(), CatalogError>;
}

/// On-disk record layout
#[derive(Debug, Default, Serialize)]
struct PersistedCatalog {
    files: Catalog,
}

/// On-disk record as read back; entries are checked one by one
#[derive(Debug, Default, Deserialize)]
struct StoredRecords {
    #[serde(default)]
    files: Vec<Value>,
}

/// JSON file store, one file per device profile.
#[derive(Debug, Clone)]
pub struct JsonFileCatalogStore {
    path: PathBuf,
}

impl JsonFileCatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<data_dir>/catalog.json`
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(CATALOG_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> CatalogError {
        CatalogError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read(&self) -> Result<Option<Catalog>, CatalogError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        let record: StoredRecords = serde_json::from_slice(&raw)?;
        let (entries, dropped) = complete_entries(record.files);
        if dropped > 0 {
            warn!(path = %self.path.display(), dropped, "Skipped malformed catalog records");
        }
        // Collapse any duplicate hashes a hand-edited file may carry
        Ok(Some(Catalog::from_entries(entries)))
    }
}

impl CatalogStore for JsonFileCatalogStore {
    fn load(&self) -> Catalog {
        match self.read() {
            Ok(Some(catalog)) => {
                debug!(path = %self.path.display(), entries = catalog.len(), "Loaded catalog");
                catalog
            }
            Ok(None) => Catalog::new(),
            Err(e) => {
                warn!("Catalog unreadable, starting empty: {}", e);
                Catalog::new()
            }
        }
    }

    fn save(&self, catalog: &Catalog) -> Result<(), CatalogError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }

        let record = PersistedCatalog {
            files: catalog.clone(),
        };
        let body = serde_json::to_vec_pretty(&record)?;

        // Write beside the target, then rename over it
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &body).map_err(|e| self.io_err(e))?;
        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            std::fs::remove_file(&tmp_path).ok();
            return Err(self.io_err(e));
        }

        debug!(path = %self.path.display(), entries = catalog.len(), "Saved catalog");
        Ok(())
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    catalog: Mutex<Catalog>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: Catalog) -> Self {
        Self {
            catalog: Mutex::new(catalog),
        }
    }
}

impl CatalogStore for MemoryCatalogStore {
    fn load(&self) -> Catalog {
        match self.catalog.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn save(&self, catalog: &Catalog) -> Result<(), CatalogError> {
        match self.catalog.lock() {
            Ok(mut guard) => *guard = catalog.clone(),
            Err(poisoned) => *poisoned.into_inner() = catalog.clone(),
        }
        Ok(())
    }
}
