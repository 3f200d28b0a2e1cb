//! Upload Signing Identities
//!
//! Produces the signature that authenticates an upload. The gateway and the
//! pinning service both verify `"<address>:<signature>"`, where the signature
//! covers the identity's own address.
//!
//! # Identity kinds
//!
//! - **Local**: Ed25519 key held in the keyring, encrypted with a passphrase
//!   (Argon2id + ChaCha20-Poly1305). Starts `Locked`.
//! - **Delegated**: key held by an external agent; signing is a request that
//!   may wait on the user. Starts `DelegatedPending` until the agent confirms
//!   raw-byte signing.
//! - **Hardware**: listed for completeness, never usable for uploads.
//!
//! # Readiness
//!
//! ```text
//! Unresolved ─▶ Resolving ─┬─▶ Locked ──unlock──▶ Unlocked
//!                          ├─▶ DelegatedPending ──confirm──▶ DelegatedReady
//!                          │                        └──────▶ Unusable
//!                          └─▶ Unusable
//! ```

pub mod agent;
pub mod capability;
pub mod crypto;
pub mod identity;
pub mod keyring;

pub use agent::{AgentCapabilities, AgentRegistry, HttpSigningAgent, SignRawRequest, SignRawResponse, SigningAgent};
pub use capability::{DelegatedSigner, LocalKey, SigningCapability};
pub use crypto::KdfParams;
pub use identity::{IdentityBinding, IdentityContext, IdentityKind, IdentitySelector, IdentityState, ResolvedIdentity};
pub use keyring::{Keyring, StoredIdentity, KEYRING_FILE_NAME};

use thiserror::Error;

/// Signing error
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Wrong passphrase")]
    WrongPassphrase,

    #[error("Passphrase required to unlock {0}")]
    PassphraseRequired(String),

    #[error("Identity {0} is locked")]
    Locked(String),

    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    #[error("No identities in keyring")]
    NoIdentities,

    #[error("Identity {address} cannot sign: {reason}")]
    Unusable { address: String, reason: String },

    #[error("Signer for {0} does not support raw signing")]
    RawSigningUnsupported(String),

    #[error("Signing agent error: {0}")]
    Agent(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Crypto error: {0}")]
    Crypto(String),
}

/// Signature bytes over an upload challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse hex, with or without `0x`
    pub fn from_hex(text: &str) -> Result<Self, SignerError> {
        let digits = text.strip_prefix("0x").unwrap_or(text);
        let bytes = hex::decode(digits).map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
        if bytes.is_empty() {
            return Err(SignerError::InvalidSignature("empty signature".to_string()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
}
