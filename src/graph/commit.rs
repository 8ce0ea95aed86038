use bytes::BufMut;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use super::codec::{get_array, get_i64, get_u32, get_u64, WireDecode, WireEncode};
use super::GraphError;
use crate::identity::{EncryptedData, SimKeyHash};

/// SHA-256 of a commit's wire encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitId([u8; 32]);

impl CommitId {
    /// The virtual empty commit every history starts from. Never stored.
    pub const ROOT: CommitId = CommitId([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn digest(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "root")
        } else {
            write!(f, "{}", hex::encode(&self.0[..6]))
        }
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", self)
    }
}

/// A commit as stored and transferred: parent diffs still encrypted.
///
/// Wire layout:
/// `u32 parent count | (32-byte parent id | 12-byte nonce | u32-prefixed ciphertext)* |
///  u64 level | i64 timestamp | 32-byte key hash`
///
/// Parents are encoded in ascending id order, so one logical commit has
/// exactly one encoding and one id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawCommit {
    pub parents: BTreeMap<CommitId, EncryptedData>,
    pub level: u64,
    pub timestamp: i64,
    pub sim_key_hash: SimKeyHash,
}

impl RawCommit {
    pub fn id(&self) -> CommitId {
        CommitId::digest(&self.to_wire())
    }

    /// Check that `expected` really is the hash of this commit.
    pub fn verify_id(&self, expected: &CommitId) -> Result<(), GraphError> {
        let actual = self.id();
        if actual != *expected {
            return Err(GraphError::HashMismatch {
                expected: *expected,
                actual,
            });
        }
        Ok(())
    }
}

impl WireEncode for RawCommit {
    fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32(self.parents.len() as u32);
        for (parent, diffs) in &self.parents {
            out.put_slice(parent.as_bytes());
            diffs.encode(out);
        }
        out.put_u64(self.level);
        out.put_i64(self.timestamp);
        out.put_slice(self.sim_key_hash.as_bytes());
    }
}

impl WireDecode for RawCommit {
    fn decode(input: &mut &[u8]) -> Result<Self, GraphError> {
        let count = get_u32(input, "parent count")?;
        let mut parents = BTreeMap::new();
        let mut previous: Option<CommitId> = None;
        for _ in 0..count {
            let parent = CommitId::from_bytes(get_array(input, "parent id")?);
            if previous.is_some_and(|p| p >= parent) {
                return Err(GraphError::Malformed(
                    "parents not in ascending id order".to_string(),
                ));
            }
            previous = Some(parent);
            parents.insert(parent, EncryptedData::decode(input)?);
        }

        let level = get_u64(input, "level")?;
        if level == 0 {
            return Err(GraphError::Malformed(
                "stored commits must have level >= 1".to_string(),
            ));
        }

        Ok(Self {
            parents,
            level,
            timestamp: get_i64(input, "timestamp")?,
            sim_key_hash: SimKeyHash::from_bytes(get_array(input, "key hash")?),
        })
    }
}

/// A commit with decrypted, decoded parent diffs.
#[derive(Clone, Debug)]
pub struct Commit<D> {
    id: CommitId,
    parents: BTreeMap<CommitId, Vec<D>>,
    level: u64,
    timestamp: i64,
    raw: Option<RawCommit>,
}

impl<D> Commit<D> {
    pub fn root() -> Self {
        Self {
            id: CommitId::ROOT,
            parents: BTreeMap::new(),
            level: 0,
            timestamp: 0,
            raw: None,
        }
    }

    /// Pair a raw commit with its decoded diffs. Both must name the same parents.
    pub fn from_raw(raw: RawCommit, parents: BTreeMap<CommitId, Vec<D>>) -> Result<Self, GraphError> {
        if !raw.parents.keys().eq(parents.keys()) {
            return Err(GraphError::Malformed(
                "decoded parents differ from the raw commit".to_string(),
            ));
        }
        Ok(Self {
            id: raw.id(),
            parents,
            level: raw.level,
            timestamp: raw.timestamp,
            raw: Some(raw),
        })
    }

    pub fn id(&self) -> CommitId {
        self.id
    }

    pub fn parents(&self) -> &BTreeMap<CommitId, Vec<D>> {
        &self.parents
    }

    pub fn parent_ids(&self) -> impl Iterator<Item = CommitId> + '_ {
        self.parents.keys().copied()
    }

    /// Diffs that turn `parent`'s state into this commit's state.
    pub fn diffs_from(&self, parent: &CommitId) -> Option<&[D]> {
        self.parents.get(parent).map(Vec::as_slice)
    }

    pub fn level(&self) -> u64 {
        self.level
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn raw(&self) -> Option<&RawCommit> {
        self.raw.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.id.is_root()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}
