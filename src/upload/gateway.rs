//! Gateway and pinning service HTTP client
//!
//! - `POST {gateway}/api/v0/add?pin=true`: multipart upload, field `file`
//! - `POST {pinner}/psa/pins`: register `{cid, name}` for persistence
//! - `GET {gateway}/ipfs/{cid}?filename=...`: fetch a file back

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{header, multipart, Client};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::cancel::CancelToken;
use super::credential::CredentialToken;
use super::{FileSource, UploadFile};
use crate::catalog::{deserialize_size, CatalogEntry};
use crate::endpoints::service_url;
use crate::error::UploadError;

/// Body chunk size; cancellation is observed between chunks
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Gateway answer to an add request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddResponse {
    #[serde(rename = "Hash")]
    pub hash: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Size", default, deserialize_with = "deserialize_size")]
    pub size: u64,
}

#[derive(Debug, Serialize)]
struct PinRequest<'a> {
    cid: &'a str,
    name: &'a str,
}

/// Pin status as returned by a pinning service. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PinStatus {
    #[serde(default)]
    pub requestid: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Error body shapes seen from gateways and pinners
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(alias = "Message", alias = "error")]
    message: String,
}

/// Download failure
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Download failed: {0}")]
    Network(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// HTTP client shared by uploads, pins and downloads
#[derive(Debug, Clone, Default)]
pub struct GatewayClient {
    http: Client,
}

impl GatewayClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a preconfigured client (timeouts, proxies)
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    /// Upload `file` to the gateway.
    ///
    /// `on_progress(sent, total)` fires as body chunks are handed to the
    /// connection. A cancelled `token` aborts the body at the next chunk.
    pub async fn add<F>(
        &self,
        gateway: &str,
        credential: &CredentialToken,
        file: &UploadFile,
        token: &CancelToken,
        on_progress: F,
    ) -> Result<AddResponse, UploadError>
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        let mut url = service_url(gateway, &["api", "v0", "add"]).map_err(UploadError::Validation)?;
        url.query_pairs_mut().append_pair("pin", "true");
        let total = file.size();
        let chunks = open_chunks(file).await?;

        let body_token = token.clone();
        let mut sent: u64 = 0;
        let body = chunks.map(move |chunk| {
            if body_token.is_cancelled() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "upload cancelled"));
            }
            let chunk = chunk?;
            sent += chunk.len() as u64;
            on_progress(sent, total);
            Ok::<Bytes, io::Error>(chunk)
        });

        let part = multipart::Part::stream_with_length(reqwest::Body::wrap_stream(body), total)
            .file_name(file.name().to_string());
        let form = multipart::Form::new().part("file", part);

        debug!(url = %url, bytes = total, "Uploading to gateway");
        let response = self
            .http
            .post(url)
            .header(header::AUTHORIZATION, credential.basic())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if token.is_cancelled() {
                    UploadError::Cancelled
                } else {
                    UploadError::from(e)
                }
            })?;

        let response = check_status(response).await?;
        let added = response
            .json::<AddResponse>()
            .await
            .map_err(|e| UploadError::Network(format!("Unexpected gateway response: {e}")))?;

        if added.hash.is_empty() {
            return Err(UploadError::Network("Gateway returned no content hash".to_string()));
        }
        info!(cid = %added.hash, size = added.size, "Gateway accepted upload");
        Ok(added)
    }

    /// Ask the pinning service to keep `cid`.
    pub async fn pin(
        &self,
        pinner: &str,
        credential: &CredentialToken,
        cid: &str,
        name: &str,
    ) -> Result<PinStatus, UploadError> {
        let url = service_url(pinner, &["psa", "pins"]).map_err(UploadError::Validation)?;
        debug!(url = %url, cid = %cid, "Registering pin");

        let response = self
            .http
            .post(url)
            .header(header::AUTHORIZATION, credential.bearer())
            .json(&PinRequest { cid, name })
            .send()
            .await?;

        let response = check_status(response).await?;
        let body = response.text().await.unwrap_or_default();
        let status = serde_json::from_str::<PinStatus>(&body).unwrap_or_else(|e| {
            debug!("Pin response not a pin status ({}): {}", e, body);
            PinStatus::default()
        });
        info!(
            cid = %cid,
            request_id = status.requestid.as_deref().unwrap_or("-"),
            status = status.status.as_deref().unwrap_or("-"),
            "Pin registered"
        );
        Ok(status)
    }

    /// Fetch a catalog entry back from its gateway into `dest`.
    ///
    /// A directory `dest` receives the file under the entry's name. Data is
    /// written to a temporary file first and renamed on completion.
    pub async fn download<F>(&self, entry: &CatalogEntry, dest: &Path, progress: F) -> Result<PathBuf, DownloadError>
    where
        F: Fn(u8),
    {
        let final_path = if dest.is_dir() {
            dest.join(&entry.name)
        } else {
            dest.to_path_buf()
        };
        let mut partial_name = final_path.as_os_str().to_owned();
        partial_name.push(".download");
        let partial_path = PathBuf::from(partial_name);
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| DownloadError::Io { path, source }
        };

        let url = entry.download_url();
        info!("Downloading {} from {}", entry.content_hash, url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DownloadError::Network(format!("HTTP {}", response.status())));
        }

        let total_size = response.content_length().unwrap_or(entry.size_bytes);
        let written = async {
            let mut file = tokio::fs::File::create(&partial_path)
                .await
                .map_err(io_err(&partial_path))?;
            let mut stream = response.bytes_stream();
            let mut downloaded: u64 = 0;

            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| DownloadError::Network(e.to_string()))?;
                file.write_all(&chunk).await.map_err(io_err(&partial_path))?;

                downloaded += chunk.len() as u64;
                if total_size > 0 {
                    progress(((downloaded * 100) / total_size).min(100) as u8);
                }
            }

            file.flush().await.map_err(io_err(&partial_path))?;
            drop(file);

            tokio::fs::rename(&partial_path, &final_path)
                .await
                .map_err(io_err(&final_path))
        }
        .await;

        if let Err(e) = written {
            // Never leave a partial file behind
            if let Err(remove_err) = tokio::fs::remove_file(&partial_path).await {
                if remove_err.kind() != io::ErrorKind::NotFound {
                    warn!("Could not remove {}: {}", partial_path.display(), remove_err);
                }
            }
            return Err(e);
        }

        info!("Downloaded {} to {}", entry.content_hash, final_path.display());
        Ok(final_path)
    }
}

/// Pass successful responses through, turn the rest into `Network` errors
/// carrying the server's message.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
    warn!(status = %status, "Request rejected: {}", body);

    if let Ok(err) = serde_json::from_str::<ErrorResponse>(&body) {
        return Err(UploadError::Network(err.message));
    }
    if body.trim().is_empty() {
        return Err(UploadError::Network(format!("HTTP {status}")));
    }
    Err(UploadError::Network(body))
}

/// File contents as a stream of chunks
async fn open_chunks(file: &UploadFile) -> Result<BoxStream<'static, io::Result<Bytes>>, UploadError> {
    match file.source() {
        FileSource::Memory(data) => {
            let data = data.clone();
            let chunks: Vec<io::Result<Bytes>> = (0..data.len())
                .step_by(CHUNK_SIZE)
                .map(|start| Ok(data.slice(start..(start + CHUNK_SIZE).min(data.len()))))
                .collect();
            Ok(stream::iter(chunks).boxed())
        }
        FileSource::Path(path) => {
            let handle = tokio::fs::File::open(path)
                .await
                .map_err(|e| UploadError::Validation(format!("Cannot read {}: {}", path.display(), e)))?;
            Ok(stream::unfold(Some(handle), |state| async move {
                let mut handle = state?;
                let mut buf = vec![0u8; CHUNK_SIZE];
                match handle.read(&mut buf).await {
                    Ok(0) => None,
                    Ok(n) => {
                        buf.truncate(n);
                        Some((Ok(Bytes::from(buf)), Some(handle)))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            })
            .boxed())
        }
    }
}
