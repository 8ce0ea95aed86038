//! Cryptographic identity for repository owners and commit payloads
//!
//! - `OwnerKeys`: Ed25519 signing + X25519 key-agreement keypairs of a repository owner
//! - `SimKey`: symmetric AES-256-GCM key that encrypts commit diffs and snapshots
//! - `SharedSimKey`: a `SimKey` wrapped for one recipient via ephemeral ECDH

pub mod keys;
pub mod shared_key;
pub mod sim_key;

pub use keys::{OwnerKeys, PubKey};
pub use shared_key::SharedSimKey;
pub use sim_key::{EncryptedData, SimKey, SimKeyHash};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),
}
