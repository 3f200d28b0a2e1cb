//! w3files - wallet-authenticated IPFS uploads with a local file catalog
//!
//! - [`upload`]: signed, cancellable upload to an IPFS gateway plus pin registration
//! - [`signer`]: identities that produce the upload signature
//! - [`catalog`]: the local record of uploaded files, with import and export
//! - [`endpoints`]: known gateways and pinning services

pub mod catalog;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod logging;
pub mod signer;
pub mod upload;

pub use catalog::{Catalog, CatalogEntry, CatalogStore, JsonFileCatalogStore, MemoryCatalogStore};
pub use endpoints::UploadEndpoints;
pub use error::UploadError;
pub use signer::{IdentitySelector, Keyring, ResolvedIdentity, SignerError};
pub use upload::{GatewayClient, UploadFile, UploadProgress, UploadSession, MAX_UPLOAD_BYTES};
