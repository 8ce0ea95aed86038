//! Repository heads and signed records

use bytes::BufMut;
use ed25519_dalek::Signature;
use std::collections::BTreeSet;
use std::fmt;

use super::codec::{get_array, get_bytes, get_i64, get_string, put_bytes, put_string, WireDecode, WireEncode};
use super::{CommitId, GraphError};
use crate::identity::{OwnerKeys, PubKey};

/// A repository is named by its owner's key plus a name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoId {
    pub owner: PubKey,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: PubKey, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl WireEncode for RepoId {
    fn encode(&self, out: &mut Vec<u8>) {
        out.put_slice(self.owner.as_bytes());
        put_string(out, &self.name);
    }
}

impl WireDecode for RepoId {
    fn decode(input: &mut &[u8]) -> Result<Self, GraphError> {
        Ok(Self {
            owner: PubKey::from_bytes(get_array(input, "owner")?),
            name: get_string(input, "repository name")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawHead {
    pub repository: RepoId,
    pub commit: CommitId,
    pub timestamp: i64,
}

impl WireEncode for RawHead {
    fn encode(&self, out: &mut Vec<u8>) {
        self.repository.encode(out);
        out.put_slice(self.commit.as_bytes());
        out.put_i64(self.timestamp);
    }
}

impl WireDecode for RawHead {
    fn decode(input: &mut &[u8]) -> Result<Self, GraphError> {
        Ok(Self {
            repository: RepoId::decode(input)?,
            commit: CommitId::from_bytes(get_array(input, "head commit")?),
            timestamp: get_i64(input, "head timestamp")?,
        })
    }
}

/// A record together with the exact bytes that were signed and the signature.
///
/// Encoded as `u32-prefixed payload | 64-byte Ed25519 signature`. The
/// payload bytes are kept so verification never depends on re-encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedData<T> {
    value: T,
    bytes: Vec<u8>,
    signature: Signature,
}

impl<T: WireEncode> SignedData<T> {
    pub fn sign(value: T, keys: &OwnerKeys) -> Self {
        let bytes = value.to_wire();
        let signature = keys.sign(&bytes);
        Self {
            value,
            bytes,
            signature,
        }
    }
}

impl<T> SignedData<T> {
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn signed_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn verify(&self, key: &PubKey) -> bool {
        key.verify(&self.bytes, &self.signature)
    }
}

impl<T> WireEncode for SignedData<T> {
    fn encode(&self, out: &mut Vec<u8>) {
        put_bytes(out, &self.bytes);
        out.put_slice(&self.signature.to_bytes());
    }
}

impl<T: WireDecode> WireDecode for SignedData<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, GraphError> {
        let bytes = get_bytes(input, "signed payload")?;
        let signature = Signature::from_bytes(&get_array(input, "signature")?);
        let value = T::from_wire(&bytes)?;
        Ok(Self {
            value,
            bytes,
            signature,
        })
    }
}

/// Current tips of a repository plus the commits whose parents are not held.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeadsInfo {
    pub bases: BTreeSet<CommitId>,
    pub heads: BTreeSet<CommitId>,
}
