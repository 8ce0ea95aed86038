//! Repository contracts and implementations
//!
//! Two layers meet here:
//! - `RemoteNode`: the raw RPC surface of a storage node. It moves encrypted
//!   commits, signed heads, snapshots and key shares, and never sees plaintext.
//! - `Repository<D>`: the typed contract the merge engine and state manager
//!   consume. `NodeRepository` implements it on top of any `RemoteNode`,
//!   handling encryption, signing and verification.
//!
//! `MemoryNode` is an in-process node; `replicate` copies a repository
//! between two nodes.

pub mod driver;
pub mod memory;
pub mod node;
pub mod replicate;

pub use driver::NodeRepository;
pub use memory::MemoryNode;
pub use node::{CommitEntry, RemoteNode};
pub use replicate::replicate;

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::algebra::Diff;
use crate::graph::{Commit, CommitId, GraphError, HeadsInfo, RepoId};
use crate::identity::IdentityError;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rejected by node: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Malformed data: {0}")]
    Malformed(#[from] GraphError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound(_))
    }

    /// Failures of the node connection itself, as opposed to bad data.
    pub fn is_transport(&self) -> bool {
        matches!(self, RepositoryError::TransportError(_))
    }
}

/// Typed view of one repository.
///
/// Heads returned by `get_heads` are verified; commits that fail
/// verification or decryption are reported as `NotFound`.
#[async_trait]
pub trait Repository<D: Diff>: Send + Sync {
    fn repository_id(&self) -> &RepoId;

    /// Build (but do not push) a commit with the given parent diffs.
    fn create_commit(
        &self,
        parents: BTreeMap<CommitId, Vec<D>>,
        level: u64,
    ) -> Result<Commit<D>, RepositoryError>;

    /// Store commits and make `heads` the repository's new heads.
    ///
    /// Pushing an already stored commit is a no-op.
    async fn push(
        &self,
        commits: Vec<Commit<D>>,
        heads: BTreeSet<CommitId>,
    ) -> Result<(), RepositoryError>;

    async fn load_commit(&self, id: CommitId) -> Result<Commit<D>, RepositoryError>;

    /// Verified heads; `{ROOT}` for a repository without any.
    async fn get_heads(&self) -> Result<BTreeSet<CommitId>, RepositoryError>;

    async fn get_heads_info(&self) -> Result<HeadsInfo, RepositoryError>;

    /// Every readable commit reachable from `heads`, stopping at `known`, in one transfer.
    async fn load_range(
        &self,
        heads: &BTreeSet<CommitId>,
        known: &BTreeSet<CommitId>,
    ) -> Result<Vec<Commit<D>>, RepositoryError>;

    /// Store the full state at `commit` as diffs from the empty state.
    async fn save_snapshot(&self, commit: CommitId, diffs: Vec<D>) -> Result<(), RepositoryError>;

    /// `Some(vec![])` for `ROOT`; `None` when no trustworthy snapshot exists.
    async fn load_snapshot(&self, commit: CommitId) -> Result<Option<Vec<D>>, RepositoryError>;
}
