//! Resolved identities and their readiness state

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use super::capability::SigningCapability;
use super::{Signature, SignerError};

/// Which held identity to sign with
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentitySelector {
    /// First identity in the keyring
    #[default]
    Default,
    /// Identity with this address
    Address(String),
}

impl IdentitySelector {
    pub fn from_option(address: Option<String>) -> Self {
        match address {
            Some(address) if !address.is_empty() => Self::Address(address),
            _ => Self::Default,
        }
    }
}

/// Identity readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityState {
    Unresolved,
    Resolving,
    Locked,
    Unlocked,
    DelegatedPending,
    DelegatedReady,
    /// Terminal for this selection
    Unusable,
}

impl fmt::Display for IdentityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Unresolved => "unresolved",
            Self::Resolving => "resolving",
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
            Self::DelegatedPending => "delegated (pending)",
            Self::DelegatedReady => "delegated (ready)",
            Self::Unusable => "unusable",
        };
        f.write_str(text)
    }
}

/// Where the key lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    Local,
    Delegated,
    Hardware,
}

/// Snapshot of the selected identity for callers deciding what to show or allow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityContext {
    pub address: Option<String>,
    pub name: Option<String>,
    pub kind: Option<IdentityKind>,
    pub state: IdentityState,
}

impl IdentityContext {
    /// Nothing selected yet
    pub fn unresolved() -> Self {
        Self {
            address: None,
            name: None,
            kind: None,
            state: IdentityState::Unresolved,
        }
    }

    pub fn requires_passphrase_unlock(&self) -> bool {
        self.state == IdentityState::Locked
    }

    pub fn is_delegated_signing(&self) -> bool {
        self.kind == Some(IdentityKind::Delegated)
    }

    /// False for delegated identities until the agent confirms raw signing
    pub fn signing_is_usable(&self) -> bool {
        matches!(
            self.state,
            IdentityState::Locked | IdentityState::Unlocked | IdentityState::DelegatedReady
        )
    }
}

/// How a resolved identity is bound to a signer
#[derive(Debug)]
pub enum IdentityBinding {
    Signing(SigningCapability),
    Unusable { reason: String },
}

/// An identity picked from the keyring, ready to drive signing
#[derive(Debug)]
pub struct ResolvedIdentity {
    name: String,
    address: String,
    kind: IdentityKind,
    binding: IdentityBinding,
}

impl ResolvedIdentity {
    pub fn new(name: String, address: String, kind: IdentityKind, binding: IdentityBinding) -> Self {
        Self {
            name,
            address,
            kind,
            binding,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    pub fn state(&self) -> IdentityState {
        match &self.binding {
            IdentityBinding::Unusable { .. } => IdentityState::Unusable,
            IdentityBinding::Signing(SigningCapability::Local(key)) => {
                if key.is_locked() {
                    IdentityState::Locked
                } else {
                    IdentityState::Unlocked
                }
            }
            IdentityBinding::Signing(SigningCapability::Delegated(signer)) => {
                if signer.is_confirmed() {
                    IdentityState::DelegatedReady
                } else {
                    IdentityState::DelegatedPending
                }
            }
        }
    }

    pub fn context(&self) -> IdentityContext {
        IdentityContext {
            address: Some(self.address.clone()),
            name: Some(self.name.clone()),
            kind: Some(self.kind),
            state: self.state(),
        }
    }

    /// Reason the identity cannot sign, if it cannot
    pub fn unusable_reason(&self) -> Option<&str> {
        match &self.binding {
            IdentityBinding::Unusable { reason } => Some(reason),
            IdentityBinding::Signing(_) => None,
        }
    }

    /// Bytes every upload signature covers: the address itself.
    pub fn challenge(&self) -> Vec<u8> {
        self.address.as_bytes().to_vec()
    }

    /// Settle a pending delegated identity into ready or unusable.
    ///
    /// Other states are left alone.
    pub async fn confirm(&mut self) -> IdentityState {
        let failure = match &mut self.binding {
            IdentityBinding::Signing(SigningCapability::Delegated(signer)) if !signer.is_confirmed() => {
                signer.confirm().await.err()
            }
            _ => None,
        };

        if let Some(e) = failure {
            warn!(address = %self.address, "Delegated signer unusable: {}", e);
            self.binding = IdentityBinding::Unusable {
                reason: e.to_string(),
            };
        }
        self.state()
    }

    /// Unlock a locally held key. Wrong passphrases leave the identity locked.
    pub async fn unlock(&mut self, passphrase: &str) -> Result<(), SignerError> {
        match &mut self.binding {
            IdentityBinding::Signing(SigningCapability::Local(key)) => key.unlock(passphrase).await,
            IdentityBinding::Signing(SigningCapability::Delegated(_)) => Ok(()),
            IdentityBinding::Unusable { reason } => Err(SignerError::Unusable {
                address: self.address.clone(),
                reason: reason.clone(),
            }),
        }
    }

    /// Re-seal a locally held key
    pub fn lock(&mut self) {
        if let IdentityBinding::Signing(SigningCapability::Local(key)) = &mut self.binding {
            key.lock();
            info!(address = %self.address, "Identity locked");
        }
    }

    pub async fn sign(&mut self, challenge: &[u8]) -> Result<Signature, SignerError> {
        match &mut self.binding {
            IdentityBinding::Signing(capability) => capability.sign(challenge).await,
            IdentityBinding::Unusable { reason } => Err(SignerError::Unusable {
                address: self.address.clone(),
                reason: reason.clone(),
            }),
        }
    }
}
