//! Content-addressed commit graph
//!
//! Commits are immutable records identified by the SHA-256 of their wire
//! encoding. Each commit maps its parents to the (encrypted) diffs that turn
//! the parent state into the commit state, and carries a level one greater
//! than its highest parent. Heads name the current tips of a repository and
//! are only trusted once their owner signature verifies.

pub mod arena;
pub mod codec;
pub mod commit;
pub mod head;
pub mod snapshot;

pub use arena::CommitGraph;
pub use codec::{WireDecode, WireEncode};
pub use commit::{Commit, CommitId, RawCommit};
pub use head::{HeadsInfo, RawHead, RepoId, SignedData};
pub use snapshot::RawSnapshot;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Commit id mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: CommitId, actual: CommitId },

    #[error("Commit {commit} has level {level}, not above parent {parent} at level {parent_level}")]
    LevelOrder {
        commit: CommitId,
        level: u64,
        parent: CommitId,
        parent_level: u64,
    },
}
