//! Typed repository on top of a raw node
//!
//! Diffs are CBOR-encoded and sealed with the current `SimKey` on the way
//! out. On the way in, commit ids are recomputed, keys are looked up by
//! hash (fetching a `SharedSimKey` from the node on a cache miss), and heads
//! and snapshots are checked against the repository owner's signature.
//! Anything that fails those checks is treated as absent.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use super::{RemoteNode, Repository, RepositoryError};
use crate::algebra::Diff;
use crate::graph::{Commit, CommitId, HeadsInfo, RawCommit, RawHead, RawSnapshot, RepoId, SignedData};
use crate::identity::{OwnerKeys, PubKey, SharedSimKey, SimKey, SimKeyHash};

/// Serialize a value to CBOR bytes.
fn cbor_serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, RepositoryError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| RepositoryError::SerializationError(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR bytes.
fn cbor_deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T, RepositoryError> {
    ciborium::from_reader(data).map_err(|e| RepositoryError::DeserializationError(e.to_string()))
}

pub struct NodeRepository<D> {
    node: Arc<dyn RemoteNode>,
    repository: RepoId,
    keys: Arc<OwnerKeys>,
    current_key: RwLock<SimKey>,
    sim_keys: RwLock<HashMap<SimKeyHash, SimKey>>,
    _diffs: PhantomData<fn() -> D>,
}

impl<D> NodeRepository<D> {
    /// `keys` sign what this replica pushes; `sim_key` encrypts it.
    pub fn new(node: Arc<dyn RemoteNode>, repository: RepoId, keys: Arc<OwnerKeys>, sim_key: SimKey) -> Self {
        let mut sim_keys = HashMap::new();
        sim_keys.insert(sim_key.hash(), sim_key.clone());
        Self {
            node,
            repository,
            keys,
            current_key: RwLock::new(sim_key),
            sim_keys: RwLock::new(sim_keys),
            _diffs: PhantomData,
        }
    }

    pub fn node(&self) -> &Arc<dyn RemoteNode> {
        &self.node
    }

    /// Encrypt everything pushed from now on under `key`. Older keys stay cached.
    pub fn change_current_key(&self, key: SimKey) {
        self.sim_keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.hash(), key.clone());
        *self.current_key.write().unwrap_or_else(|e| e.into_inner()) = key;
    }

    fn current_key(&self) -> SimKey {
        self.current_key
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Publish the current key to `receiver`, wrapped for their X25519 key.
    pub async fn share_current_key(
        &self,
        receiver: PubKey,
        receiver_dh_public: &[u8; 32],
    ) -> Result<(), RepositoryError> {
        let key = self.current_key();
        let shared = SharedSimKey::seal(&key, receiver, receiver_dh_public)?;
        let signed = SignedData::sign(shared, &self.keys);
        self.node.share_key(&receiver, signed).await?;
        log::info!("Shared key {:?} of {} with {}", key.hash(), self.repository, receiver);
        Ok(())
    }

    fn cached_key(&self, hash: &SimKeyHash) -> Option<SimKey> {
        self.sim_keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(hash)
            .cloned()
    }

    async fn key_for(&self, hash: &SimKeyHash) -> Result<SimKey, RepositoryError> {
        if let Some(key) = self.cached_key(hash) {
            return Ok(key);
        }

        let shared = self
            .node
            .get_shared_key(&self.keys.pub_key(), hash)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("no key shared for {:?}", hash)))?;
        if !shared.verify(&self.repository.owner) {
            return Err(RepositoryError::NotFound(format!(
                "shared key {:?} not signed by {}",
                hash, self.repository.owner
            )));
        }
        let key = shared.value().open(&self.keys)?;
        if key.hash() != *hash {
            return Err(RepositoryError::NotFound(format!("shared key does not match {:?}", hash)));
        }

        log::debug!("Fetched shared key {:?} for {}", hash, self.repository);
        self.sim_keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(*hash, key.clone());
        Ok(key)
    }
}

impl<D> NodeRepository<D>
where
    D: Diff + Serialize + DeserializeOwned,
{
    async fn decode_commit(&self, id: CommitId, raw: RawCommit) -> Result<Commit<D>, RepositoryError> {
        raw.verify_id(&id)?;
        let key = self.key_for(&raw.sim_key_hash).await?;

        let mut parents = BTreeMap::new();
        for (parent, sealed) in &raw.parents {
            let diffs: Vec<D> = cbor_deserialize(&key.decrypt(sealed)?)?;
            parents.insert(*parent, diffs);
        }
        Ok(Commit::from_raw(raw, parents)?)
    }

    /// Decode, turning every failure except a broken connection into `NotFound`.
    async fn readable_commit(&self, id: CommitId, raw: RawCommit) -> Result<Commit<D>, RepositoryError> {
        match self.decode_commit(id, raw).await {
            Ok(commit) => Ok(commit),
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                log::warn!("Treating commit {} of {} as absent: {}", id, self.repository, e);
                Err(RepositoryError::NotFound(format!("commit {} unreadable: {}", id, e)))
            }
        }
    }

    fn trusted(&self, head: &SignedData<RawHead>) -> bool {
        if head.value().repository != self.repository {
            log::warn!(
                "Discarding head {} filed for {} while reading {}",
                head.value().commit,
                head.value().repository,
                self.repository
            );
            return false;
        }
        if !head.verify(&self.repository.owner) {
            log::warn!(
                "Discarding head {} of {}: bad signature",
                head.value().commit,
                self.repository
            );
            return false;
        }
        true
    }
}

#[async_trait]
impl<D> Repository<D> for NodeRepository<D>
where
    D: Diff + Serialize + DeserializeOwned,
{
    fn repository_id(&self) -> &RepoId {
        &self.repository
    }

    fn create_commit(
        &self,
        parents: BTreeMap<CommitId, Vec<D>>,
        level: u64,
    ) -> Result<Commit<D>, RepositoryError> {
        let key = self.current_key();
        let mut sealed = BTreeMap::new();
        for (parent, diffs) in &parents {
            sealed.insert(*parent, key.encrypt(&cbor_serialize(diffs)?)?);
        }
        let raw = RawCommit {
            parents: sealed,
            level,
            timestamp: Utc::now().timestamp_millis(),
            sim_key_hash: key.hash(),
        };
        Ok(Commit::from_raw(raw, parents)?)
    }

    async fn push(
        &self,
        commits: Vec<Commit<D>>,
        heads: BTreeSet<CommitId>,
    ) -> Result<(), RepositoryError> {
        let mut raw_commits = BTreeMap::new();
        for commit in commits.iter().filter(|c| !c.is_root()) {
            let raw = commit.raw().ok_or_else(|| {
                RepositoryError::NotFound(format!("no stored form for commit {}", commit.id()))
            })?;
            raw_commits.insert(commit.id(), raw.clone());
        }

        let timestamp = Utc::now().timestamp_millis();
        let signed_heads: Vec<SignedData<RawHead>> = heads
            .iter()
            .filter(|id| !id.is_root())
            .map(|id| {
                SignedData::sign(
                    RawHead {
                        repository: self.repository.clone(),
                        commit: *id,
                        timestamp,
                    },
                    &self.keys,
                )
            })
            .collect();

        log::debug!(
            "Pushing {} commits and {} heads to {}",
            raw_commits.len(),
            signed_heads.len(),
            self.repository
        );
        self.node.save(&self.repository, raw_commits, signed_heads).await
    }

    async fn load_commit(&self, id: CommitId) -> Result<Commit<D>, RepositoryError> {
        if id.is_root() {
            return Ok(Commit::root());
        }
        let raw = self.node.load_commit(&self.repository, id).await?;
        self.readable_commit(id, raw).await
    }

    async fn get_heads(&self) -> Result<BTreeSet<CommitId>, RepositoryError> {
        let heads: BTreeSet<CommitId> = self
            .node
            .get_heads(&self.repository)
            .await?
            .iter()
            .filter(|head| self.trusted(head))
            .map(|head| head.value().commit)
            .collect();

        if heads.is_empty() {
            return Ok([CommitId::ROOT].into_iter().collect());
        }
        Ok(heads)
    }

    async fn get_heads_info(&self) -> Result<HeadsInfo, RepositoryError> {
        self.node.get_heads_info(&self.repository).await
    }

    async fn load_range(
        &self,
        heads: &BTreeSet<CommitId>,
        known: &BTreeSet<CommitId>,
    ) -> Result<Vec<Commit<D>>, RepositoryError> {
        let required: BTreeSet<CommitId> = heads.difference(known).copied().collect();
        if required.iter().all(CommitId::is_root) {
            return Ok(Vec::new());
        }

        let mut entries = self
            .node
            .download(&self.repository, required, known.clone())
            .await?;

        let mut commits = Vec::new();
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            match self.readable_commit(entry.id, entry.commit).await {
                Ok(commit) => commits.push(commit),
                Err(e) if e.is_transport() => return Err(e),
                Err(_) => {}
            }
        }
        Ok(commits)
    }

    async fn save_snapshot(&self, commit: CommitId, diffs: Vec<D>) -> Result<(), RepositoryError> {
        let key = self.current_key();
        let snapshot = RawSnapshot {
            repository: self.repository.clone(),
            commit,
            diffs: key.encrypt(&cbor_serialize(&diffs)?)?,
            sim_key_hash: key.hash(),
        };
        let signed = SignedData::sign(snapshot, &self.keys);
        self.node.save_snapshot(&self.repository, signed).await?;
        log::debug!("Saved snapshot of {} at {}", self.repository, commit);
        Ok(())
    }

    async fn load_snapshot(&self, commit: CommitId) -> Result<Option<Vec<D>>, RepositoryError> {
        if commit.is_root() {
            return Ok(Some(Vec::new()));
        }
        let Some(signed) = self.node.load_snapshot(&self.repository, commit).await? else {
            return Ok(None);
        };

        let snapshot = signed.value();
        if !signed.verify(&self.repository.owner)
            || snapshot.commit != commit
            || snapshot.repository != self.repository
        {
            log::warn!("Ignoring unverifiable snapshot of {} at {}", self.repository, commit);
            return Ok(None);
        }

        let decoded = async {
            let key = self.key_for(&snapshot.sim_key_hash).await?;
            cbor_deserialize::<Vec<D>>(&key.decrypt(&snapshot.diffs)?)
        }
        .await;
        match decoded {
            Ok(diffs) => Ok(Some(diffs)),
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                log::warn!("Ignoring unreadable snapshot of {} at {}: {}", self.repository, commit, e);
                Ok(None)
            }
        }
    }
}
