//! Raw node RPC surface

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::collections::{BTreeMap, BTreeSet};

use super::RepositoryError;
use crate::graph::{CommitId, HeadsInfo, RawCommit, RawHead, RawSnapshot, RepoId, SignedData};
use crate::identity::{PubKey, SharedSimKey, SimKeyHash};

/// One commit in a bulk transfer, with its signed head if it is one.
#[derive(Clone, Debug)]
pub struct CommitEntry {
    pub id: CommitId,
    pub commit: RawCommit,
    pub head: Option<SignedData<RawHead>>,
}

/// A storage node holding encrypted repositories.
///
/// Nodes check that commit ids match commit bytes. They store heads with
/// bad signatures too, and readers verify heads against the repository
/// owner themselves.
#[async_trait]
pub trait RemoteNode: Send + Sync {
    /// Store commits, then add `heads`. A head signed by the repository
    /// owner drops the stored heads it descends from; other heads never
    /// displace anything.
    async fn save(
        &self,
        repository: &RepoId,
        commits: BTreeMap<CommitId, RawCommit>,
        heads: Vec<SignedData<RawHead>>,
    ) -> Result<(), RepositoryError>;

    async fn load_commit(&self, repository: &RepoId, id: CommitId) -> Result<RawCommit, RepositoryError>;

    async fn get_heads(&self, repository: &RepoId) -> Result<Vec<SignedData<RawHead>>, RepositoryError>;

    async fn get_heads_info(&self, repository: &RepoId) -> Result<HeadsInfo, RepositoryError>;

    /// Stream every stored commit reachable from `required` without passing
    /// through `existing`, parents before children.
    async fn download(
        &self,
        repository: &RepoId,
        required: BTreeSet<CommitId>,
        existing: BTreeSet<CommitId>,
    ) -> Result<BoxStream<'static, Result<CommitEntry, RepositoryError>>, RepositoryError>;

    async fn upload(
        &self,
        repository: &RepoId,
        entries: BoxStream<'static, CommitEntry>,
    ) -> Result<(), RepositoryError>;

    async fn save_snapshot(
        &self,
        repository: &RepoId,
        snapshot: SignedData<RawSnapshot>,
    ) -> Result<(), RepositoryError>;

    async fn load_snapshot(
        &self,
        repository: &RepoId,
        commit: CommitId,
    ) -> Result<Option<SignedData<RawSnapshot>>, RepositoryError>;

    async fn share_key(&self, receiver: &PubKey, key: SignedData<SharedSimKey>) -> Result<(), RepositoryError>;

    async fn get_shared_key(
        &self,
        receiver: &PubKey,
        hash: &SimKeyHash,
    ) -> Result<Option<SignedData<SharedSimKey>>, RepositoryError>;
}
