//! Upload error types

use thiserror::Error;

use crate::signer::SignerError;

/// Why an upload session stopped
#[derive(Debug, Error)]
pub enum UploadError {
    /// Rejected before any network call (size limit, concurrent start, bad input)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The identity could not produce a signature
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Gateway or pinner failed or rejected the request
    #[error("Network error: {0}")]
    Network(String),

    /// The user cancelled
    #[error("Upload cancelled")]
    Cancelled,
}

impl UploadError {
    /// Status line shown to the user
    pub fn status_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::Authentication(msg) => format!("Signing failed: {msg}"),
            Self::Network(msg) => msg.clone(),
            Self::Cancelled => "Upload cancelled".to_string(),
        }
    }

    /// Cancellation is not a failure; callers reset quietly.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<SignerError> for UploadError {
    fn from(err: SignerError) -> Self {
        UploadError::Authentication(err.to_string())
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UploadError::Network(format!("Request timed out: {err}"))
        } else {
            UploadError::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;
