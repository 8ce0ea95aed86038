//! Owner identity
//!
//! Every repository is owned by one keypair. The Ed25519 half signs heads,
//! snapshots and key shares; the X25519 half receives wrapped symmetric keys.
//! Replicas of the same owner (several devices of one user) load the same
//! keystore file.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519Secret};
use zeroize::Zeroize;

use super::IdentityError;

/// Ed25519 public key of a repository owner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PubKey([u8; 32]);

impl PubKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Verify a signature made by the holder of this key.
    ///
    /// Bytes that do not decode to a curve point never verify.
    pub fn verify(&self, data: &[u8], signature: &Signature) -> bool {
        match VerifyingKey::from_bytes(&self.0) {
            Ok(key) => key.verify(data, signature).is_ok(),
            Err(_) => false,
        }
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({})", self)
    }
}

/// Serializable form of `OwnerKeys`. Zeroized on drop.
#[derive(Serialize, Deserialize)]
struct OwnerKeysStore {
    signing_key_bytes: [u8; 32],
    dh_key_bytes: [u8; 32],
}

impl Drop for OwnerKeysStore {
    fn drop(&mut self) {
        self.signing_key_bytes.zeroize();
        self.dh_key_bytes.zeroize();
    }
}

/// Private keys of a repository owner.
pub struct OwnerKeys {
    signing_key: SigningKey,
    dh_secret: X25519Secret,
}

impl OwnerKeys {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            dh_secret: X25519Secret::random_from_rng(OsRng),
        }
    }

    pub fn pub_key(&self) -> PubKey {
        PubKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Public X25519 key, handed to peers that want to share keys with us.
    pub fn dh_public(&self) -> [u8; 32] {
        X25519PublicKey::from(&self.dh_secret).to_bytes()
    }

    /// X25519 ECDH with a peer's public key.
    pub fn dh_agree(&self, peer_public: &[u8; 32]) -> [u8; 32] {
        self.dh_secret
            .diffie_hellman(&X25519PublicKey::from(*peer_public))
            .to_bytes()
    }

    pub fn sign(&self, data: &[u8]) -> Signature {
        self.signing_key.sign(data)
    }

    pub fn verify(&self, data: &[u8], signature: &Signature) -> bool {
        self.pub_key().verify(data, signature)
    }

    /// Load from a JSON keystore file.
    pub fn load(path: &Path) -> Result<Self, IdentityError> {
        let data = std::fs::read(path).map_err(|e| IdentityError::IoError(e.to_string()))?;
        let store: OwnerKeysStore = serde_json::from_slice(&data)
            .map_err(|e| IdentityError::DeserializationError(e.to_string()))?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&store.signing_key_bytes),
            dh_secret: X25519Secret::from(store.dh_key_bytes),
        })
    }

    /// Persist to a JSON keystore file.
    pub fn save(&self, path: &Path) -> Result<(), IdentityError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IdentityError::IoError(e.to_string()))?;
        }

        let store = OwnerKeysStore {
            signing_key_bytes: self.signing_key.to_bytes(),
            dh_key_bytes: self.dh_secret.to_bytes(),
        };

        let json = serde_json::to_string_pretty(&store)
            .map_err(|e| IdentityError::SerializationError(e.to_string()))?;

        std::fs::write(path, json).map_err(|e| IdentityError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Load from path if it exists, otherwise generate and save.
    pub fn load_or_generate(path: &Path) -> Result<Self, IdentityError> {
        if path.exists() {
            Self::load(path)
        } else {
            let keys = Self::generate();
            keys.save(path)?;
            Ok(keys)
        }
    }
}

impl fmt::Debug for OwnerKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerKeys")
            .field("pub_key", &self.pub_key())
            .finish_non_exhaustive()
    }
}
