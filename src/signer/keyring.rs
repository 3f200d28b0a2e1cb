//! Keyring of held identities
//!
//! Persisted as `keyring.json` in the data directory. Local private keys are
//! stored encrypted (base64 fields, same layout as an exported key bundle);
//! delegated and hardware identities store only their address and where to
//! reach the signer.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::agent::AgentRegistry;
use super::capability::{DelegatedSigner, LocalKey, SigningCapability};
use super::crypto::{address_from_public_key, generate_keypair, KdfParams, SealedKey, NONCE_LEN};
use super::identity::{IdentityBinding, IdentityKind, IdentitySelector, IdentityState, ResolvedIdentity};
use super::SignerError;

/// File name of the keyring inside the data directory
pub const KEYRING_FILE_NAME: &str = "keyring.json";

/// One held identity as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoredIdentity {
    #[serde(rename_all = "camelCase")]
    Local {
        name: String,
        address: String,
        /// Ed25519 public key (base64)
        public_key: String,
        /// Encrypted private key (base64)
        encrypted_private_key: String,
        /// Key derivation salt (base64)
        key_derivation_salt: String,
        /// Encryption nonce (base64)
        encryption_nonce: String,
        #[serde(default)]
        kdf: KdfParams,
        created_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Delegated {
        name: String,
        address: String,
        /// Agent source, usually its base URL
        source: String,
    },
    #[serde(rename_all = "camelCase")]
    Hardware { name: String, address: String },
}

impl StoredIdentity {
    pub fn name(&self) -> &str {
        match self {
            Self::Local { name, .. } | Self::Delegated { name, .. } | Self::Hardware { name, .. } => name,
        }
    }

    pub fn address(&self) -> &str {
        match self {
            Self::Local { address, .. }
            | Self::Delegated { address, .. }
            | Self::Hardware { address, .. } => address,
        }
    }

    pub fn kind(&self) -> IdentityKind {
        match self {
            Self::Local { .. } => IdentityKind::Local,
            Self::Delegated { .. } => IdentityKind::Delegated,
            Self::Hardware { .. } => IdentityKind::Hardware,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeyringFile {
    #[serde(default)]
    identities: Vec<StoredIdentity>,
}

/// Held identities
#[derive(Debug, Default)]
pub struct Keyring {
    path: Option<PathBuf>,
    identities: Vec<StoredIdentity>,
}

impl Keyring {
    /// Empty keyring that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`; a missing file gives an empty keyring bound to that path.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SignerError> {
        let path = path.into();
        let identities = match std::fs::read(&path) {
            Ok(raw) => {
                let file: KeyringFile = serde_json::from_slice(&raw)
                    .map_err(|e| SignerError::Keyring(format!("{}: {}", path.display(), e)))?;
                file.identities
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(SignerError::Keyring(format!("{}: {}", path.display(), e))),
        };
        debug!(path = %path.display(), identities = identities.len(), "Loaded keyring");
        Ok(Self {
            path: Some(path),
            identities,
        })
    }

    /// Load `<data_dir>/keyring.json`
    pub fn load_from_dir(data_dir: &Path) -> Result<Self, SignerError> {
        Self::load(data_dir.join(KEYRING_FILE_NAME))
    }

    pub fn save(&self) -> Result<(), SignerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |e: std::io::Error| SignerError::Keyring(format!("{}: {}", path.display(), e));

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let file = KeyringFile {
            identities: self.identities.clone(),
        };
        let body = serde_json::to_vec_pretty(&file).map_err(|e| SignerError::Keyring(e.to_string()))?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, body).map_err(io_err)?;
        std::fs::rename(&tmp_path, path).map_err(io_err)?;
        Ok(())
    }

    pub fn identities(&self) -> &[StoredIdentity] {
        &self.identities
    }

    pub fn find(&self, selector: &IdentitySelector) -> Option<&StoredIdentity> {
        match selector {
            IdentitySelector::Default => self.identities.first(),
            IdentitySelector::Address(address) => self.identities.iter().find(|i| i.address() == address),
        }
    }

    fn ensure_unique(&self, address: &str) -> Result<(), SignerError> {
        if self.identities.iter().any(|i| i.address() == address) {
            return Err(SignerError::Keyring(format!("Identity {address} already exists")));
        }
        Ok(())
    }

    /// Generate a new passphrase-protected Ed25519 identity.
    pub fn generate_local(
        &mut self,
        name: &str,
        passphrase: &str,
        kdf: KdfParams,
    ) -> Result<&StoredIdentity, SignerError> {
        if passphrase.is_empty() {
            return Err(SignerError::PassphraseRequired(name.to_string()));
        }

        let (signing_key, verifying_key) = generate_keypair();
        let sealed = SealedKey::seal(&signing_key, passphrase, kdf)?;
        let address = address_from_public_key(&verifying_key);
        self.ensure_unique(&address)?;

        self.identities.push(StoredIdentity::Local {
            name: name.to_string(),
            address: address.clone(),
            public_key: BASE64.encode(verifying_key.to_bytes()),
            encrypted_private_key: BASE64.encode(&sealed.ciphertext),
            key_derivation_salt: BASE64.encode(&sealed.salt),
            encryption_nonce: BASE64.encode(sealed.nonce),
            kdf,
            created_at: Utc::now(),
        });

        info!(address = %address, "Generated local identity");
        self.last_added()
    }

    /// Register an identity whose key lives with an external agent.
    pub fn add_delegated(&mut self, name: &str, address: &str, source: &str) -> Result<&StoredIdentity, SignerError> {
        self.ensure_unique(address)?;
        self.identities.push(StoredIdentity::Delegated {
            name: name.to_string(),
            address: address.to_string(),
            source: source.to_string(),
        });
        info!(address = %address, source = %source, "Added delegated identity");
        self.last_added()
    }

    /// Register a hardware-backed identity (listed, never usable for uploads).
    pub fn add_hardware(&mut self, name: &str, address: &str) -> Result<&StoredIdentity, SignerError> {
        self.ensure_unique(address)?;
        self.identities.push(StoredIdentity::Hardware {
            name: name.to_string(),
            address: address.to_string(),
        });
        self.last_added()
    }

    fn last_added(&self) -> Result<&StoredIdentity, SignerError> {
        self.identities
            .last()
            .ok_or_else(|| SignerError::Keyring("keyring is empty".to_string()))
    }

    /// Resolve a selection into something that can sign.
    ///
    /// Local keys come back `Locked`, delegated ones `DelegatedPending`
    /// (see [`ResolvedIdentity::confirm`]), hardware ones `Unusable`.
    pub fn resolve(
        &self,
        selector: &IdentitySelector,
        agents: &AgentRegistry,
    ) -> Result<ResolvedIdentity, SignerError> {
        let stored = self.find(selector).ok_or_else(|| match selector {
            IdentitySelector::Default => SignerError::NoIdentities,
            IdentitySelector::Address(address) => SignerError::IdentityNotFound(address.clone()),
        })?;
        debug!(address = %stored.address(), state = %IdentityState::Resolving, "Resolving identity");

        let binding = match stored {
            StoredIdentity::Local {
                address,
                public_key,
                encrypted_private_key,
                key_derivation_salt,
                encryption_nonce,
                kdf,
                ..
            } => {
                let public_key = decode_public_key(public_key)?;
                if address_from_public_key(&public_key) != *address {
                    return Err(SignerError::Keyring(format!(
                        "Address {address} does not match its public key"
                    )));
                }
                let sealed = SealedKey {
                    ciphertext: decode_field("encryptedPrivateKey", encrypted_private_key)?,
                    salt: decode_field("keyDerivationSalt", key_derivation_salt)?,
                    nonce: decode_nonce(encryption_nonce)?,
                    kdf: *kdf,
                };
                IdentityBinding::Signing(SigningCapability::Local(LocalKey::new(
                    address.clone(),
                    public_key,
                    sealed,
                )))
            }
            StoredIdentity::Delegated { address, source, .. } => match agents.get(source) {
                Some(agent) => {
                    IdentityBinding::Signing(SigningCapability::Delegated(DelegatedSigner::new(address.clone(), agent)))
                }
                None => IdentityBinding::Unusable {
                    reason: format!("signing agent {source} not available"),
                },
            },
            StoredIdentity::Hardware { .. } => IdentityBinding::Unusable {
                reason: "hardware identities cannot sign uploads".to_string(),
            },
        };

        let resolved = ResolvedIdentity::new(
            stored.name().to_string(),
            stored.address().to_string(),
            stored.kind(),
            binding,
        );
        info!(address = %resolved.address(), state = %resolved.state(), "Resolved identity");
        Ok(resolved)
    }
}

fn decode_field(field: &str, value: &str) -> Result<Vec<u8>, SignerError> {
    BASE64
        .decode(value)
        .map_err(|e| SignerError::Keyring(format!("Invalid {field}: {e}")))
}

fn decode_nonce(value: &str) -> Result<[u8; NONCE_LEN], SignerError> {
    let bytes = decode_field("encryptionNonce", value)?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        SignerError::Keyring(format!(
            "Invalid nonce length: expected {}, got {}",
            NONCE_LEN,
            bytes.len()
        ))
    })
}

fn decode_public_key(value: &str) -> Result<VerifyingKey, SignerError> {
    let bytes = decode_field("publicKey", value)?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SignerError::Keyring("Invalid public key length".to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| SignerError::Keyring(format!("Invalid public key: {e}")))
}
