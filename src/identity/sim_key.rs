//! Symmetric payload keys
//!
//! Commit diffs and snapshots are encrypted with AES-256-GCM under a `SimKey`.
//! The key itself never travels in the clear; commits only carry its
//! SHA-256 hash so a reader knows which key to look up.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use bytes::BufMut;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::IdentityError;
use crate::graph::codec::{get_array, get_bytes, put_bytes, WireDecode, WireEncode};
use crate::graph::GraphError;

pub const NONCE_LEN: usize = 12;

/// SHA-256 of a `SimKey`'s bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SimKeyHash([u8; 32]);

impl SimKeyHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SimKeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimKeyHash({})", hex::encode(&self.0[..8]))
    }
}

/// Nonce and AES-256-GCM ciphertext (tag included).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedData {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl WireEncode for EncryptedData {
    fn encode(&self, out: &mut Vec<u8>) {
        out.put_slice(&self.nonce);
        put_bytes(out, &self.ciphertext);
    }
}

impl WireDecode for EncryptedData {
    fn decode(input: &mut &[u8]) -> Result<Self, GraphError> {
        Ok(Self {
            nonce: get_array(input, "nonce")?,
            ciphertext: get_bytes(input, "ciphertext")?,
        })
    }
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SimKey {
    bytes: [u8; 32],
}

impl SimKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn hash(&self) -> SimKeyHash {
        SimKeyHash(Sha256::digest(self.bytes).into())
    }

    /// Encrypt with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedData, IdentityError> {
        let cipher = Aes256Gcm::new_from_slice(&self.bytes)
            .map_err(|e| IdentityError::CryptoError(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| IdentityError::CryptoError(e.to_string()))?;

        Ok(EncryptedData { nonce, ciphertext })
    }

    pub fn decrypt(&self, data: &EncryptedData) -> Result<Vec<u8>, IdentityError> {
        let cipher = Aes256Gcm::new_from_slice(&self.bytes)
            .map_err(|e| IdentityError::CryptoError(e.to_string()))?;

        cipher
            .decrypt(Nonce::from_slice(&data.nonce), data.ciphertext.as_slice())
            .map_err(|e| IdentityError::CryptoError(e.to_string()))
    }
}

impl fmt::Debug for SimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimKey({:?})", self.hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = SimKey::generate();
        let sealed = key.encrypt(b"diff payload").unwrap();
        assert_ne!(sealed.ciphertext, b"diff payload");
        assert_eq!(key.decrypt(&sealed).unwrap(), b"diff payload");
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let key = SimKey::generate();
        let a = key.encrypt(b"same").unwrap();
        let b = key.encrypt(b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = SimKey::generate().encrypt(b"secret").unwrap();
        assert!(SimKey::generate().decrypt(&sealed).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = SimKey::generate();
        let mut sealed = key.encrypt(b"secret").unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert!(key.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_hash_identifies_key() {
        let key = SimKey::from_bytes([7u8; 32]);
        assert_eq!(key.hash(), SimKey::from_bytes([7u8; 32]).hash());
        assert_ne!(key.hash(), SimKey::from_bytes([8u8; 32]).hash());
    }

    #[test]
    fn test_debug_hides_key_bytes() {
        let key = SimKey::from_bytes([0xab; 32]);
        assert!(!format!("{:?}", key).contains("abababab"));
    }
}
