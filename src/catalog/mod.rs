//! Local catalog of uploaded files
//!
//! The catalog is an ordered list of [`CatalogEntry`] records, most recently
//! added first. It is keyed by content hash: at most one entry per hash, and a
//! newer entry for an existing hash replaces the older one.
//!
//! - [`store`]: durable persistence (`load` never fails, `save` is atomic)
//! - [`snapshot`]: export to / import from the `files.json` exchange format

pub mod snapshot;
pub mod store;

pub use snapshot::{export_file, export_snapshot, import_file, import_snapshot, ImportError, ImportErrorKind};
pub use store::{CatalogError, CatalogStore, JsonFileCatalogStore, MemoryCatalogStore};

use serde::{Deserialize, Deserializer, Serialize};

/// Gateway used to build download links for entries that carry no upload endpoint.
pub const FALLBACK_GATEWAY: &str = "https://ipfs.io";

/// One uploaded file.
///
/// Field names on the wire (`Hash`, `Name`, `Size`, `UpEndpoint`,
/// `PinEndpoint`) are shared by the persisted catalog and the export format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Content identifier returned by the gateway
    #[serde(rename = "Hash")]
    pub content_hash: String,

    /// File name as reported by the gateway
    #[serde(rename = "Name")]
    pub name: String,

    /// Size in bytes; gateways report it as a string, exports as a number
    #[serde(rename = "Size", default, deserialize_with = "deserialize_size")]
    pub size_bytes: u64,

    /// Gateway URL the file was uploaded through
    #[serde(rename = "UpEndpoint")]
    pub upload_endpoint: String,

    /// Pinning service URL the pin was registered with
    #[serde(rename = "PinEndpoint")]
    pub pin_endpoint: String,
}

impl CatalogEntry {
    /// Whether every required field is present and non-empty.
    pub fn is_complete(&self) -> bool {
        !self.content_hash.is_empty()
            && !self.name.is_empty()
            && !self.upload_endpoint.is_empty()
            && !self.pin_endpoint.is_empty()
    }

    /// Link for fetching this file back from the gateway it was uploaded to.
    pub fn download_url(&self) -> String {
        let endpoint = if self.upload_endpoint.is_empty() {
            FALLBACK_GATEWAY
        } else {
            self.upload_endpoint.trim_end_matches('/')
        };
        format!(
            "{}/ipfs/{}?filename={}",
            endpoint,
            self.content_hash,
            urlencoding::encode(&self.name)
        )
    }
}

/// Accepts `"1234"` as well as `1234`.
pub(crate) fn deserialize_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawSize {
        Number(u64),
        Text(String),
    }

    match RawSize::deserialize(deserializer)? {
        RawSize::Number(n) => Ok(n),
        RawSize::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid Size {s:?}: {e}"))),
    }
}

/// Ordered file catalog, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from entries in display order.
    ///
    /// If a hash repeats, the first occurrence is kept.
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let mut catalog = Self::new();
        for entry in entries {
            if catalog.find(&entry.content_hash).is_none() {
                catalog.entries.push(entry);
            }
        }
        catalog
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CatalogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by content hash
    pub fn find(&self, content_hash: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.content_hash == content_hash)
    }

    /// Put a freshly uploaded file at the front, replacing any entry with the same hash.
    pub fn record_upload(&mut self, entry: CatalogEntry) {
        self.entries.retain(|e| e.content_hash != entry.content_hash);
        self.entries.insert(0, entry);
    }

    /// Remove an entry by hash. Returns the removed entry, if any.
    pub fn remove(&mut self, content_hash: &str) -> Option<CatalogEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.content_hash == content_hash)?;
        Some(self.entries.remove(index))
    }

    /// Imported entries first (input order), then existing entries whose hash
    /// was not imported, in their original order.
    pub(crate) fn merged_with(imported: Catalog, existing: &Catalog) -> Catalog {
        let mut entries = imported.entries;
        let tail: Vec<CatalogEntry> = existing
            .entries
            .iter()
            .filter(|old| !entries.iter().any(|new| new.content_hash == old.content_hash))
            .cloned()
            .collect();
        entries.extend(tail);
        Catalog { entries }
    }
}

/// Entries from raw JSON records, skipping any that fail to parse or are
/// incomplete. Returns the kept entries and the number dropped.
pub(crate) fn complete_entries(records: Vec<serde_json::Value>) -> (Vec<CatalogEntry>, usize) {
    let total = records.len();
    let kept: Vec<CatalogEntry> = records
        .into_iter()
        .filter_map(|record| serde_json::from_value::<CatalogEntry>(record).ok())
        .filter(CatalogEntry::is_complete)
        .collect();
    let dropped = total - kept.len();
    (kept, dropped)
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a CatalogEntry;
    type IntoIter = std::slice::Iter<'a, CatalogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
pub(crate) fn entry(hash: &str, name: &str) -> CatalogEntry {
    CatalogEntry {
        content_hash: hash.to_string(),
        name: name.to_string(),
        size_bytes: 42,
        upload_endpoint: "https://gw.example".to_string(),
        pin_endpoint: "https://pin.example".to_string(),
    }
}
