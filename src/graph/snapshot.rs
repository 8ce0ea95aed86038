use bytes::BufMut;

use super::codec::{get_array, WireDecode, WireEncode};
use super::{CommitId, GraphError, RepoId};
use crate::identity::{EncryptedData, SimKeyHash};

/// Full state at a commit, stored as the encrypted diff list that builds it
/// from the empty state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawSnapshot {
    pub repository: RepoId,
    pub commit: CommitId,
    pub diffs: EncryptedData,
    pub sim_key_hash: SimKeyHash,
}

impl WireEncode for RawSnapshot {
    fn encode(&self, out: &mut Vec<u8>) {
        self.repository.encode(out);
        out.put_slice(self.commit.as_bytes());
        self.diffs.encode(out);
        out.put_slice(self.sim_key_hash.as_bytes());
    }
}

impl WireDecode for RawSnapshot {
    fn decode(input: &mut &[u8]) -> Result<Self, GraphError> {
        Ok(Self {
            repository: RepoId::decode(input)?,
            commit: CommitId::from_bytes(get_array(input, "snapshot commit")?),
            diffs: EncryptedData::decode(input)?,
            sim_key_hash: SimKeyHash::from_bytes(get_array(input, "key hash")?),
        })
    }
}
