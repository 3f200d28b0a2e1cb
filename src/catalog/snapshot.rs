//! Catalog export and import
//!
//! The exchange format is a bare JSON array of catalog entries, conventionally
//! saved as `files.json`. Importing never duplicates a hash: imported records
//! move to the front and replace any existing record with the same hash.

use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use super::{complete_entries, Catalog, CatalogEntry};

/// Default export file name
pub const EXPORT_FILE_NAME: &str = "files.json";

/// Why an import was rejected as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportErrorKind {
    /// Input file is not named `*.json`
    UnsupportedFileName,
    /// Input could not be read
    Unreadable,
    /// Input is not valid JSON
    NotJson,
    /// Input is JSON but not an array
    NotArray,
}

impl fmt::Display for ImportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::UnsupportedFileName => "file error",
            Self::Unreadable => "file unreadable",
            Self::NotJson | Self::NotArray => "file content error",
        };
        f.write_str(text)
    }
}

/// Import failure
#[derive(Debug, Error)]
#[error("{kind}: {detail}")]
pub struct ImportError {
    pub kind: ImportErrorKind,
    pub detail: String,
}

impl ImportError {
    fn new(kind: ImportErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Serialize the whole catalog in export format.
pub fn export_snapshot(catalog: &Catalog) -> Vec<u8> {
    // Vec<CatalogEntry> of plain strings and integers cannot fail to serialize
    serde_json::to_vec(catalog).unwrap_or_else(|_| b"[]".to_vec())
}

/// Parse `raw` and merge it in front of `existing`.
///
/// Records missing any of `Hash`, `Name`, `UpEndpoint`, `PinEndpoint` (or
/// carrying them empty) are dropped without failing the import.
pub fn import_snapshot(raw: &[u8], existing: &Catalog) -> Result<Catalog, ImportError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| ImportError::new(ImportErrorKind::NotJson, e.to_string()))?;

    let Value::Array(records) = value else {
        return Err(ImportError::new(
            ImportErrorKind::NotArray,
            "expected a JSON array of files",
        ));
    };

    let (accepted, dropped) = complete_entries(records);
    if dropped > 0 {
        debug!(dropped, "Dropped malformed import records");
    }

    let imported = Catalog::from_entries(accepted);
    let merged = Catalog::merged_with(imported, existing);
    Ok(merged)
}

/// Read an import file from disk and merge it.
pub fn import_file(path: &Path, existing: &Catalog) -> Result<Catalog, ImportError> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if !is_json {
        return Err(ImportError::new(
            ImportErrorKind::UnsupportedFileName,
            format!("{} is not a .json file", path.display()),
        ));
    }

    let raw = std::fs::read(path)
        .map_err(|e| ImportError::new(ImportErrorKind::Unreadable, format!("{}: {}", path.display(), e)))?;
    let merged = import_snapshot(&raw, existing)?;
    info!(path = %path.display(), entries = merged.len(), "Imported catalog snapshot");
    Ok(merged)
}

/// Write the export file. A directory target gets `files.json` inside it.
pub fn export_file(catalog: &Catalog, target: &Path) -> std::io::Result<PathBuf> {
    let path = if target.is_dir() {
        target.join(EXPORT_FILE_NAME)
    } else {
        target.to_path_buf()
    };
    std::fs::write(&path, export_snapshot(catalog))?;
    info!(path = %path.display(), entries = catalog.len(), "Exported catalog");
    Ok(path)
}
