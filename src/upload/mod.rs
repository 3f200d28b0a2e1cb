//! Authenticated upload sessions
//!
//! One [`UploadSession`] runs at most one upload at a time:
//!
//! 1. unlock the identity if it is a locked local key
//! 2. sign the identity's address and build the [`CredentialToken`]
//! 3. stream the file to `{gateway}/api/v0/add?pin=true` (cancellable)
//! 4. register the pin with `{pinner}/psa/pins` (cancellable)
//! 5. hand back the [`CatalogEntry`] for the caller to record
//!
//! Progress is published on a watch channel. It stays at or below 99 while
//! bytes move and only reaches 100 once the pin is registered. Any failure or
//! cancellation resets it to zero.

pub mod cancel;
pub mod credential;
pub mod gateway;

pub use cancel::CancelToken;
pub use credential::CredentialToken;
pub use gateway::{AddResponse, DownloadError, GatewayClient, PinStatus};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::CatalogEntry;
use crate::endpoints::UploadEndpoints;
use crate::error::UploadError;
use crate::signer::{IdentityState, ResolvedIdentity, SignerError};

/// Largest file accepted for upload (100 MiB)
pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Where upload bytes come from
#[derive(Debug, Clone)]
pub(crate) enum FileSource {
    Path(PathBuf),
    Memory(Bytes),
}

/// A file queued for upload
#[derive(Debug, Clone)]
pub struct UploadFile {
    name: String,
    size: u64,
    source: FileSource,
}

impl UploadFile {
    /// Reference a file on disk. Only metadata is read here.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        Ok(Self {
            name,
            size: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            source: FileSource::Memory(data),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn source(&self) -> &FileSource {
        &self.source
    }
}

/// Upload progress as seen by observers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub in_progress: bool,
    /// 0..=100
    pub percent_complete: u8,
}

impl UploadProgress {
    pub fn idle() -> Self {
        Self::default()
    }

    fn transferring(sent: u64, total: u64) -> Self {
        Self {
            in_progress: true,
            percent_complete: transfer_percent(sent, total),
        }
    }

    fn complete() -> Self {
        Self {
            in_progress: false,
            percent_complete: 100,
        }
    }
}

/// `round(sent / total * 99)`, never above 99
pub fn transfer_percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let ratio = sent.min(total) as f64 / total as f64;
    (ratio * 99.0).round() as u8
}

/// Runs uploads one at a time and reports their progress
pub struct UploadSession {
    client: GatewayClient,
    progress: Arc<watch::Sender<UploadProgress>>,
    busy: AtomicBool,
    cancel: Mutex<Option<CancelToken>>,
}

/// Clears the busy flag and the cancel token when an upload ends, however it ends
struct ActiveUpload<'a> {
    session: &'a UploadSession,
}

impl Drop for ActiveUpload<'_> {
    fn drop(&mut self) {
        self.session.cancel_slot().take();
        self.session.busy.store(false, Ordering::SeqCst);
    }
}

impl UploadSession {
    pub fn new(client: GatewayClient) -> Self {
        let (tx, _) = watch::channel(UploadProgress::idle());
        Self {
            client,
            progress: Arc::new(tx),
            busy: AtomicBool::new(false),
            cancel: Mutex::new(None),
        }
    }

    pub fn progress(&self) -> UploadProgress {
        *self.progress.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress.subscribe()
    }

    /// An upload is running
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Abandon the running upload or pin.
    ///
    /// No-op until the transfer phase has started. Returns whether anything
    /// was cancelled.
    pub fn cancel(&self) -> bool {
        // Held across the reset so completion cannot publish in between
        let slot = self.cancel_slot();
        match slot.as_ref() {
            Some(token) => {
                token.cancel();
                self.progress.send_replace(UploadProgress::idle());
                info!("Upload cancelled by user");
                true
            }
            None => {
                debug!("Cancel requested with no transfer running");
                false
            }
        }
    }

    fn cancel_slot(&self) -> MutexGuard<'_, Option<CancelToken>> {
        self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Upload `file` signed by `identity` and pin it.
    ///
    /// Returns the record to add to the catalog. Nothing is recorded here, so a
    /// failed or cancelled upload leaves the catalog untouched.
    pub async fn start(
        &self,
        identity: &mut ResolvedIdentity,
        file: &UploadFile,
        endpoints: &UploadEndpoints,
        passphrase: Option<&str>,
    ) -> Result<CatalogEntry, UploadError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(UploadError::Validation("An upload is already in progress".to_string()));
        }
        let _active = ActiveUpload { session: self };

        let upload_id = Uuid::new_v4();
        let result = self.run(upload_id, identity, file, endpoints, passphrase).await;

        match &result {
            Ok(entry) => {
                info!(upload_id = %upload_id, cid = %entry.content_hash, "Upload complete");
            }
            Err(e) => {
                self.progress.send_replace(UploadProgress::idle());
                if e.is_cancellation() {
                    info!(upload_id = %upload_id, "Upload cancelled");
                } else {
                    warn!(upload_id = %upload_id, "Upload failed: {}", e);
                }
            }
        }
        result
    }

    async fn run(
        &self,
        upload_id: Uuid,
        identity: &mut ResolvedIdentity,
        file: &UploadFile,
        endpoints: &UploadEndpoints,
        passphrase: Option<&str>,
    ) -> Result<CatalogEntry, UploadError> {
        if file.size() > MAX_UPLOAD_BYTES {
            return Err(UploadError::Validation(format!(
                "File size {} exceeds the {} MiB limit",
                file.size(),
                MAX_UPLOAD_BYTES / (1024 * 1024)
            )));
        }
        if let Some(reason) = identity.unusable_reason() {
            return Err(UploadError::Authentication(format!(
                "Identity {} cannot sign: {}",
                identity.address(),
                reason
            )));
        }

        info!(
            upload_id = %upload_id,
            file = %file.name(),
            bytes = file.size(),
            gateway = %endpoints.gateway,
            address = %identity.address(),
            "Starting upload"
        );
        self.progress.send_replace(UploadProgress {
            in_progress: true,
            percent_complete: 0,
        });

        // 1. unlock
        match identity.state() {
            IdentityState::Locked => {
                let passphrase = passphrase
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| SignerError::PassphraseRequired(identity.address().to_string()))?;
                identity.unlock(passphrase).await?;
            }
            IdentityState::DelegatedPending => {
                if identity.confirm().await == IdentityState::Unusable {
                    let reason = identity.unusable_reason().unwrap_or("delegated signer unavailable");
                    return Err(UploadError::Authentication(reason.to_string()));
                }
            }
            _ => {}
        }

        // 2. sign
        let challenge = identity.challenge();
        let signature = identity.sign(&challenge).await?;
        let credential = CredentialToken::new(identity.address(), &signature);
        debug!(upload_id = %upload_id, "Upload credential ready");

        // 3. transfer
        let token = CancelToken::new();
        *self.cancel_slot() = Some(token.clone());

        let progress = self.progress.clone();
        let on_progress = move |sent: u64, total: u64| {
            let next = UploadProgress::transferring(sent, total);
            progress.send_if_modified(|current| {
                if current.in_progress && *current != next {
                    *current = next;
                    true
                } else {
                    false
                }
            });
        };

        let added = tokio::select! {
            result = self.client.add(&endpoints.gateway, &credential, file, &token, on_progress) => result?,
            _ = token.cancelled() => return Err(UploadError::Cancelled),
        };
        if token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        // 4. pin
        let name = if added.name.is_empty() {
            file.name().to_string()
        } else {
            added.name.clone()
        };
        tokio::select! {
            result = self.client.pin(&endpoints.pinner, &credential, &added.hash, &name) => { result?; }
            _ = token.cancelled() => return Err(UploadError::Cancelled),
        }

        // 5. complete; once the token is gone a late cancel is a no-op
        self.cancel_slot().take();
        if token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        self.progress.send_replace(UploadProgress::complete());
        Ok(CatalogEntry {
            content_hash: added.hash,
            name,
            size_bytes: if added.size == 0 { file.size() } else { added.size },
            upload_endpoint: endpoints.gateway.clone(),
            pin_endpoint: endpoints.pinner.clone(),
        })
    }
}
