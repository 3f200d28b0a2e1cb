//! Signing capabilities
//!
//! Only identities that can actually sign get a [`SigningCapability`]; the
//! enum has no "unusable" arm. Dispatch goes through `sign` and `is_usable`
//! rather than kind flags.

use std::sync::Arc;

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::agent::{SignRawRequest, SigningAgent};
use super::crypto::SealedKey;
use super::{Signature, SignerError};

/// Locally held Ed25519 key, sealed until unlocked
pub struct LocalKey {
    address: String,
    public_key: VerifyingKey,
    sealed: SealedKey,
    unlocked: Option<SigningKey>,
}

impl LocalKey {
    pub fn new(address: String, public_key: VerifyingKey, sealed: SealedKey) -> Self {
        Self {
            address,
            public_key,
            sealed,
            unlocked: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key(&self) -> &VerifyingKey {
        &self.public_key
    }

    pub fn is_locked(&self) -> bool {
        self.unlocked.is_none()
    }

    /// Decrypt the key. Calling it on an unlocked key is a no-op.
    ///
    /// Key derivation runs on the blocking pool.
    pub async fn unlock(&mut self, passphrase: &str) -> Result<(), SignerError> {
        if self.unlocked.is_some() {
            return Ok(());
        }

        let sealed = self.sealed.clone();
        let passphrase = Zeroizing::new(passphrase.to_string());
        let signing_key = tokio::task::spawn_blocking(move || sealed.open(&passphrase))
            .await
            .map_err(|e| SignerError::Crypto(format!("Unlock task failed: {e}")))??;

        if signing_key.verifying_key() != self.public_key {
            return Err(SignerError::Keyring(format!(
                "Decrypted key does not match public key of {}",
                self.address
            )));
        }

        info!(address = %self.address, "Identity unlocked");
        self.unlocked = Some(signing_key);
        Ok(())
    }

    /// Drop the decrypted key
    pub fn lock(&mut self) {
        self.unlocked = None;
    }

    pub fn sign(&self, challenge: &[u8]) -> Result<Signature, SignerError> {
        let key = self
            .unlocked
            .as_ref()
            .ok_or_else(|| SignerError::Locked(self.address.clone()))?;
        Ok(Signature::from_bytes(key.sign(challenge).to_bytes().to_vec()))
    }
}

impl std::fmt::Debug for LocalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKey")
            .field("address", &self.address)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Identity whose signatures come from an external agent
pub struct DelegatedSigner {
    address: String,
    agent: Arc<dyn SigningAgent>,
    confirmed: bool,
}

impl DelegatedSigner {
    pub fn new(address: String, agent: Arc<dyn SigningAgent>) -> Self {
        Self {
            address,
            agent,
            confirmed: false,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn source(&self) -> &str {
        self.agent.source()
    }

    /// Agent has confirmed raw-byte signing
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Ask the agent whether it can sign raw bytes.
    pub async fn confirm(&mut self) -> Result<(), SignerError> {
        let caps = self.agent.capabilities().await?;
        if !caps.sign_raw {
            self.confirmed = false;
            return Err(SignerError::RawSigningUnsupported(self.address.clone()));
        }
        debug!(address = %self.address, source = %self.agent.source(), "Delegated signer confirmed");
        self.confirmed = true;
        Ok(())
    }

    /// Request a signature from the agent. Never falls back to any local key.
    pub async fn sign(&mut self, challenge: &[u8]) -> Result<Signature, SignerError> {
        if !self.confirmed {
            self.confirm().await?;
        }

        let request = SignRawRequest::bytes(&self.address, challenge);
        match self.agent.sign_raw(&request).await {
            Ok(response) => Signature::from_hex(&response.signature),
            Err(e) => {
                warn!(address = %self.address, "Delegated signing failed: {}", e);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for DelegatedSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatedSigner")
            .field("address", &self.address)
            .field("source", &self.agent.source())
            .field("confirmed", &self.confirmed)
            .finish()
    }
}

/// Something that can produce upload signatures
#[derive(Debug)]
pub enum SigningCapability {
    Local(LocalKey),
    Delegated(DelegatedSigner),
}

impl SigningCapability {
    pub fn address(&self) -> &str {
        match self {
            Self::Local(key) => key.address(),
            Self::Delegated(signer) => signer.address(),
        }
    }

    /// Whether `sign` can be attempted without further confirmation.
    ///
    /// A locked local key is usable: unlocking is part of the upload flow.
    pub fn is_usable(&self) -> bool {
        match self {
            Self::Local(_) => true,
            Self::Delegated(signer) => signer.is_confirmed(),
        }
    }

    pub async fn sign(&mut self, challenge: &[u8]) -> Result<Signature, SignerError> {
        match self {
            Self::Local(key) => key.sign(challenge),
            Self::Delegated(signer) => signer.sign(challenge).await,
        }
    }
}
