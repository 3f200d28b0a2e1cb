//! Cryptographic primitives for locally held identities.
//!
//! # Algorithms
//!
//! - **Key Generation**: Ed25519
//! - **Key Derivation**: Argon2id (memory-hard, brute-force resistant)
//! - **Encryption**: ChaCha20-Poly1305 (authenticated encryption)
//! - **Addresses**: base58 of the 32-byte public key
//!
//! KDF parameters travel with each sealed key so old keystore records keep
//! opening after the defaults change.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::SignerError;

// =============================================================================
// Constants
// =============================================================================

/// Argon2id memory cost in KiB (64 MB)
pub const ARGON2_MEMORY_KB: u32 = 65536;

/// Argon2id iteration count
pub const ARGON2_ITERATIONS: u32 = 3;

/// Argon2id parallelism (threads)
pub const ARGON2_PARALLELISM: u32 = 4;

/// Salt length for key derivation (16 bytes)
pub const SALT_LEN: usize = 16;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Ed25519 private key length (32 bytes)
pub const PRIVATE_KEY_LEN: usize = 32;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: ARGON2_MEMORY_KB,
            iterations: ARGON2_ITERATIONS,
            parallelism: ARGON2_PARALLELISM,
        }
    }
}

// =============================================================================
// Key Generation
// =============================================================================

/// Generate a new Ed25519 keypair from the OS random number generator.
pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key)
}

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Public address for a verifying key
pub fn address_from_public_key(public_key: &VerifyingKey) -> String {
    bs58::encode(public_key.as_bytes()).into_string()
}

// =============================================================================
// Key Derivation
// =============================================================================

/// Derive a 256-bit key encryption key from a passphrase using Argon2id.
pub fn derive_key_encryption_key(
    passphrase: &[u8],
    salt: &[u8],
    kdf: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, SignerError> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(|e| SignerError::Crypto(format!("Invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase, salt, &mut key[..])
        .map_err(|e| SignerError::Crypto(format!("Key derivation failed: {e}")))?;

    Ok(key)
}

// =============================================================================
// Encryption / Decryption
// =============================================================================

/// Encrypt a private key. Output is 48 bytes: key plus auth tag.
///
/// The nonce must never be reused with the same encryption key.
pub fn encrypt_private_key(
    private_key: &[u8; PRIVATE_KEY_LEN],
    encryption_key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>, SignerError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(encryption_key));
    cipher
        .encrypt(Nonce::from_slice(nonce), private_key.as_slice())
        .map_err(|e| SignerError::Crypto(format!("Encryption failed: {e}")))
}

/// Decrypt a private key.
///
/// A failed auth tag (tampering or wrong passphrase) is reported as
/// [`SignerError::WrongPassphrase`].
pub fn decrypt_private_key(
    ciphertext: &[u8],
    encryption_key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
) -> Result<Zeroizing<[u8; PRIVATE_KEY_LEN]>, SignerError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(encryption_key));
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SignerError::WrongPassphrase)?,
    );

    if plaintext.len() != PRIVATE_KEY_LEN {
        return Err(SignerError::Crypto(format!(
            "Invalid decrypted key length: expected {}, got {}",
            PRIVATE_KEY_LEN,
            plaintext.len()
        )));
    }

    let mut key = Zeroizing::new([0u8; PRIVATE_KEY_LEN]);
    key.copy_from_slice(&plaintext);
    Ok(key)
}

/// Private key material encrypted at rest.
#[derive(Clone)]
pub struct SealedKey {
    pub ciphertext: Vec<u8>,
    pub salt: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub kdf: KdfParams,
}

impl SealedKey {
    /// Encrypt `signing_key` under `passphrase` with fresh salt and nonce.
    pub fn seal(signing_key: &SigningKey, passphrase: &str, kdf: KdfParams) -> Result<Self, SignerError> {
        let salt: [u8; SALT_LEN] = generate_random_bytes();
        let nonce: [u8; NONCE_LEN] = generate_random_bytes();
        let kek = derive_key_encryption_key(passphrase.as_bytes(), &salt, &kdf)?;
        let ciphertext = encrypt_private_key(&signing_key.to_bytes(), &kek, &nonce)?;
        Ok(Self {
            ciphertext,
            salt: salt.to_vec(),
            nonce,
            kdf,
        })
    }

    /// Decrypt with `passphrase`. CPU and memory heavy; run off the async runtime.
    pub fn open(&self, passphrase: &str) -> Result<SigningKey, SignerError> {
        let kek = derive_key_encryption_key(passphrase.as_bytes(), &self.salt, &self.kdf)?;
        let secret = decrypt_private_key(&self.ciphertext, &kek, &self.nonce)?;
        Ok(SigningKey::from_bytes(&secret))
    }
}

impl std::fmt::Debug for SealedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedKey")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("kdf", &self.kdf)
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn fast_kdf() -> KdfParams {
    KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}
