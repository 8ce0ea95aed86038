//! Symmetric keys wrapped for a single recipient
//!
//! The sender generates an ephemeral X25519 secret, agrees a shared secret
//! with the recipient's public key, derives a wrapping key with HKDF-SHA256
//! and seals the `SimKey` bytes with AES-256-GCM. Only the recipient's
//! private key can reopen it. The record is signed by the sender when it is
//! published (see `graph::SignedData`).

use bytes::BufMut;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519Secret};

use super::{EncryptedData, IdentityError, OwnerKeys, PubKey, SimKey, SimKeyHash};
use crate::graph::codec::{get_array, WireDecode, WireEncode};
use crate::graph::GraphError;

const WRAP_INFO: &[u8] = b"otgraph-shared-key-v1";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedSimKey {
    pub receiver: PubKey,
    pub hash: SimKeyHash,
    pub ephemeral_public: [u8; 32],
    pub wrapped: EncryptedData,
}

fn wrapping_key(shared_secret: &[u8; 32], receiver: &PubKey) -> Result<SimKey, IdentityError> {
    let hk = Hkdf::<Sha256>::new(Some(receiver.as_bytes()), shared_secret);
    let mut okm = [0u8; 32];
    hk.expand(WRAP_INFO, &mut okm)
        .map_err(|e| IdentityError::CryptoError(e.to_string()))?;
    Ok(SimKey::from_bytes(okm))
}

impl SharedSimKey {
    /// Wrap `key` for the owner of `receiver` / `receiver_dh_public`.
    pub fn seal(
        key: &SimKey,
        receiver: PubKey,
        receiver_dh_public: &[u8; 32],
    ) -> Result<Self, IdentityError> {
        let ephemeral = X25519Secret::random_from_rng(OsRng);
        let ephemeral_public = X25519PublicKey::from(&ephemeral).to_bytes();
        let shared = ephemeral
            .diffie_hellman(&X25519PublicKey::from(*receiver_dh_public))
            .to_bytes();

        let wrapped = wrapping_key(&shared, &receiver)?.encrypt(key.as_bytes())?;

        Ok(Self {
            receiver,
            hash: key.hash(),
            ephemeral_public,
            wrapped,
        })
    }

    /// Unwrap with the recipient's keys and check the result against `hash`.
    pub fn open(&self, keys: &OwnerKeys) -> Result<SimKey, IdentityError> {
        if keys.pub_key() != self.receiver {
            return Err(IdentityError::InvalidKeyMaterial(format!(
                "key shared with {}, not {}",
                self.receiver,
                keys.pub_key()
            )));
        }

        let shared = keys.dh_agree(&self.ephemeral_public);
        let plain = wrapping_key(&shared, &self.receiver)?.decrypt(&self.wrapped)?;
        let bytes: [u8; 32] = plain.as_slice().try_into().map_err(|_| {
            IdentityError::InvalidKeyMaterial(format!("unwrapped key has {} bytes", plain.len()))
        })?;

        let key = SimKey::from_bytes(bytes);
        if key.hash() != self.hash {
            return Err(IdentityError::InvalidKeyMaterial(
                "unwrapped key does not match its hash".to_string(),
            ));
        }
        Ok(key)
    }
}

impl WireEncode for SharedSimKey {
    fn encode(&self, out: &mut Vec<u8>) {
        out.put_slice(self.receiver.as_bytes());
        out.put_slice(self.hash.as_bytes());
        out.put_slice(&self.ephemeral_public);
        self.wrapped.encode(out);
    }
}

impl WireDecode for SharedSimKey {
    fn decode(input: &mut &[u8]) -> Result<Self, GraphError> {
        Ok(Self {
            receiver: PubKey::from_bytes(get_array(input, "receiver")?),
            hash: SimKeyHash::from_bytes(get_array(input, "key hash")?),
            ephemeral_public: get_array(input, "ephemeral key")?,
            wrapped: EncryptedData::decode(input)?,
        })
    }
}
