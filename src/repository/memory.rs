//! In-process storage node
//!
//! Keeps every repository in maps behind a `tokio::sync::RwLock`. Used by
//! tests, the demo binary, and as the local cache end of `replicate`.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::{CommitEntry, RemoteNode, RepositoryError};
use crate::graph::{CommitId, HeadsInfo, RawCommit, RawHead, RawSnapshot, RepoId, SignedData};
use crate::identity::{PubKey, SharedSimKey, SimKeyHash};

#[derive(Default)]
struct RepoStore {
    commits: HashMap<CommitId, RawCommit>,
    heads: HashMap<CommitId, SignedData<RawHead>>,
    snapshots: HashMap<CommitId, SignedData<RawSnapshot>>,
}

impl RepoStore {
    /// Whether `ancestor` is reachable from `of` through stored parent links.
    fn is_ancestor(&self, ancestor: &CommitId, of: &CommitId) -> bool {
        let mut stack = vec![*of];
        let mut seen = HashSet::new();
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            if let Some(commit) = self.commits.get(&next) {
                for parent in commit.parents.keys() {
                    if parent == ancestor {
                        return true;
                    }
                    stack.push(*parent);
                }
            }
        }
        false
    }

    fn save(
        &mut self,
        repository: &RepoId,
        commits: BTreeMap<CommitId, RawCommit>,
        heads: Vec<SignedData<RawHead>>,
    ) -> Result<(), RepositoryError> {
        // Validate everything before touching the store
        for (id, commit) in &commits {
            commit.verify_id(id)?;
        }
        for head in &heads {
            let raw = head.value();
            if raw.repository != *repository {
                return Err(RepositoryError::Rejected(format!(
                    "head for {} pushed to {}",
                    raw.repository, repository
                )));
            }
            if !raw.commit.is_root()
                && !self.commits.contains_key(&raw.commit)
                && !commits.contains_key(&raw.commit)
            {
                return Err(RepositoryError::NotFound(format!(
                    "head commit {} is not stored",
                    raw.commit
                )));
            }
        }

        for (id, commit) in commits {
            self.commits.entry(id).or_insert(commit);
        }

        // Heads that fail verification are kept for readers to discard.
        // Only owner-signed heads retire other heads.
        for head in heads {
            let commit = head.value().commit;
            if commit.is_root() {
                continue;
            }
            let trusted = head.verify(&repository.owner);
            if let Some(existing) = self.heads.get(&commit) {
                if trusted && !existing.verify(&repository.owner) {
                    self.heads.insert(commit, head);
                }
                continue;
            }
            if !trusted {
                log::debug!("Storing unverified head {} of {}", commit, repository);
                self.heads.insert(commit, head);
                continue;
            }

            let trusted_heads: Vec<CommitId> = self
                .heads
                .iter()
                .filter(|(_, existing)| existing.verify(&repository.owner))
                .map(|(id, _)| *id)
                .collect();
            if trusted_heads.iter().any(|existing| self.is_ancestor(&commit, existing)) {
                log::debug!("Ignoring stale head {} of {}", commit, repository);
                continue;
            }
            let superseded: Vec<CommitId> = self
                .heads
                .keys()
                .filter(|existing| self.is_ancestor(existing, &commit))
                .copied()
                .collect();
            for old in superseded {
                self.heads.remove(&old);
            }
            self.heads.insert(commit, head);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryNode {
    repositories: RwLock<HashMap<RepoId, RepoStore>>,
    shared_keys: RwLock<HashMap<(PubKey, SimKeyHash), SignedData<SharedSimKey>>>,
    offline: AtomicBool,
    drop_next_ack: AtomicBool,
    stall_next_ack: AtomicBool,
}

impl MemoryNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline, every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next `save` store its data but report a transport error,
    /// as if the acknowledgement had been lost.
    pub fn drop_next_ack(&self) {
        self.drop_next_ack.store(true, Ordering::SeqCst);
    }

    /// Make the next `save` store its data and then never return.
    pub fn stall_next_ack(&self) {
        self.stall_next_ack.store(true, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), RepositoryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RepositoryError::TransportError("node offline".to_string()));
        }
        Ok(())
    }

    pub async fn commit_count(&self, repository: &RepoId) -> usize {
        self.repositories
            .read()
            .await
            .get(repository)
            .map_or(0, |store| store.commits.len())
    }

    pub async fn contains_commit(&self, repository: &RepoId, id: &CommitId) -> bool {
        self.repositories
            .read()
            .await
            .get(repository)
            .is_some_and(|store| store.commits.contains_key(id))
    }

    /// Forget every commit that is a strict ancestor of `keep`. Returns how
    /// many were removed. Snapshots stay.
    pub async fn prune_below(&self, repository: &RepoId, keep: CommitId) -> usize {
        let mut repositories = self.repositories.write().await;
        let Some(store) = repositories.get_mut(repository) else {
            return 0;
        };

        let doomed: Vec<CommitId> = store
            .commits
            .keys()
            .filter(|id| store.is_ancestor(id, &keep))
            .copied()
            .collect();
        for id in &doomed {
            store.commits.remove(id);
            store.heads.remove(id);
        }
        log::debug!("Pruned {} commits below {} in {}", doomed.len(), keep, repository);
        doomed.len()
    }
}

#[async_trait]
impl RemoteNode for MemoryNode {
    async fn save(
        &self,
        repository: &RepoId,
        commits: BTreeMap<CommitId, RawCommit>,
        heads: Vec<SignedData<RawHead>>,
    ) -> Result<(), RepositoryError> {
        self.check_online()?;
        let mut repositories = self.repositories.write().await;
        repositories
            .entry(repository.clone())
            .or_default()
            .save(repository, commits, heads)?;
        drop(repositories);

        if self.stall_next_ack.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.drop_next_ack.swap(false, Ordering::SeqCst) {
            return Err(RepositoryError::TransportError(
                "acknowledgement lost".to_string(),
            ));
        }
        Ok(())
    }

    async fn load_commit(&self, repository: &RepoId, id: CommitId) -> Result<RawCommit, RepositoryError> {
        self.check_online()?;
        self.repositories
            .read()
            .await
            .get(repository)
            .and_then(|store| store.commits.get(&id).cloned())
            .ok_or_else(|| RepositoryError::NotFound(format!("commit {} in {}", id, repository)))
    }

    async fn get_heads(&self, repository: &RepoId) -> Result<Vec<SignedData<RawHead>>, RepositoryError> {
        self.check_online()?;
        let repositories = self.repositories.read().await;
        let mut heads: Vec<SignedData<RawHead>> = repositories
            .get(repository)
            .map(|store| store.heads.values().cloned().collect())
            .unwrap_or_default();
        heads.sort_by_key(|head| head.value().commit);
        Ok(heads)
    }

    async fn get_heads_info(&self, repository: &RepoId) -> Result<HeadsInfo, RepositoryError> {
        self.check_online()?;
        let repositories = self.repositories.read().await;
        let Some(store) = repositories.get(repository) else {
            return Ok(HeadsInfo::default());
        };

        let bases = store
            .commits
            .iter()
            .filter(|(_, commit)| {
                commit
                    .parents
                    .keys()
                    .any(|parent| !parent.is_root() && !store.commits.contains_key(parent))
            })
            .map(|(id, _)| *id)
            .collect();

        Ok(HeadsInfo {
            bases,
            heads: store.heads.keys().copied().collect(),
        })
    }

    async fn download(
        &self,
        repository: &RepoId,
        required: BTreeSet<CommitId>,
        existing: BTreeSet<CommitId>,
    ) -> Result<BoxStream<'static, Result<CommitEntry, RepositoryError>>, RepositoryError> {
        self.check_online()?;
        let repositories = self.repositories.read().await;
        let Some(store) = repositories.get(repository) else {
            return Ok(stream::empty().boxed());
        };

        let mut stack: Vec<CommitId> = required.into_iter().collect();
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        while let Some(id) = stack.pop() {
            if id.is_root() || existing.contains(&id) || !seen.insert(id) {
                continue;
            }
            let Some(commit) = store.commits.get(&id) else {
                continue;
            };
            stack.extend(commit.parents.keys().copied());
            entries.push(CommitEntry {
                id,
                commit: commit.clone(),
                head: store.heads.get(&id).cloned(),
            });
        }
        entries.sort_by_key(|entry| (entry.commit.level, entry.id));

        Ok(stream::iter(entries.into_iter().map(Ok)).boxed())
    }

    async fn upload(
        &self,
        repository: &RepoId,
        entries: BoxStream<'static, CommitEntry>,
    ) -> Result<(), RepositoryError> {
        self.check_online()?;
        let entries: Vec<CommitEntry> = entries.collect().await;

        let mut commits = BTreeMap::new();
        let mut heads = Vec::new();
        for entry in entries {
            if let Some(head) = entry.head {
                heads.push(head);
            }
            commits.insert(entry.id, entry.commit);
        }
        self.save(repository, commits, heads).await
    }

    async fn save_snapshot(
        &self,
        repository: &RepoId,
        snapshot: SignedData<RawSnapshot>,
    ) -> Result<(), RepositoryError> {
        self.check_online()?;
        if snapshot.value().repository != *repository {
            return Err(RepositoryError::Rejected(format!(
                "snapshot for {} pushed to {}",
                snapshot.value().repository,
                repository
            )));
        }
        let mut repositories = self.repositories.write().await;
        repositories
            .entry(repository.clone())
            .or_default()
            .snapshots
            .insert(snapshot.value().commit, snapshot);
        Ok(())
    }

    async fn load_snapshot(
        &self,
        repository: &RepoId,
        commit: CommitId,
    ) -> Result<Option<SignedData<RawSnapshot>>, RepositoryError> {
        self.check_online()?;
        Ok(self
            .repositories
            .read()
            .await
            .get(repository)
            .and_then(|store| store.snapshots.get(&commit).cloned()))
    }

    async fn share_key(&self, receiver: &PubKey, key: SignedData<SharedSimKey>) -> Result<(), RepositoryError> {
        self.check_online()?;
        if key.value().receiver != *receiver {
            return Err(RepositoryError::Rejected(format!(
                "key addressed to {} filed under {}",
                key.value().receiver,
                receiver
            )));
        }
        let hash = key.value().hash;
        self.shared_keys.write().await.insert((*receiver, hash), key);
        Ok(())
    }

    async fn get_shared_key(
        &self,
        receiver: &PubKey,
        hash: &SimKeyHash,
    ) -> Result<Option<SignedData<SharedSimKey>>, RepositoryError> {
        self.check_online()?;
        Ok(self.shared_keys.read().await.get(&(*receiver, *hash)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{OwnerKeys, SimKey};

    struct Fixture {
        keys: OwnerKeys,
        key: SimKey,
        repo: RepoId,
        node: MemoryNode,
    }

    impl Fixture {
        fn new() -> Self {
            let keys = OwnerKeys::generate();
            let repo = RepoId::new(keys.pub_key(), "test");
            Self {
                keys,
                key: SimKey::generate(),
                repo,
                node: MemoryNode::new(),
            }
        }

        fn commit(&self, parents: &[(CommitId, u64)]) -> RawCommit {
            let level = parents.iter().map(|(_, level)| *level).max().unwrap_or(0) + 1;
            RawCommit {
                parents: parents
                    .iter()
                    .map(|(id, _)| (*id, self.key.encrypt(b"diffs").unwrap()))
                    .collect(),
                level,
                timestamp: 0,
                sim_key_hash: self.key.hash(),
            }
        }

        fn head(&self, commit: CommitId) -> SignedData<RawHead> {
            SignedData::sign(
                RawHead {
                    repository: self.repo.clone(),
                    commit,
                    timestamp: 1,
                },
                &self.keys,
            )
        }

        async fn push(&self, commit: &RawCommit) {
            let mut commits = BTreeMap::new();
            commits.insert(commit.id(), commit.clone());
            self.node
                .save(&self.repo, commits, vec![self.head(commit.id())])
                .await
                .unwrap();
        }

        async fn head_ids(&self) -> BTreeSet<CommitId> {
            self.node
                .get_heads(&self.repo)
                .await
                .unwrap()
                .iter()
                .map(|h| h.value().commit)
                .collect()
        }
    }

    #[tokio::test]
    async fn test_save_rejects_wrong_id() {
        let f = Fixture::new();
        let commit = f.commit(&[(CommitId::ROOT, 0)]);
        let mut commits = BTreeMap::new();
        commits.insert(CommitId::from_bytes([1u8; 32]), commit);

        let result = f.node.save(&f.repo, commits, vec![]).await;
        assert!(matches!(result, Err(RepositoryError::Malformed(_))));
        assert_eq!(f.node.commit_count(&f.repo).await, 0);
    }

    #[tokio::test]
    async fn test_head_without_commit_rejected() {
        let f = Fixture::new();
        let result = f
            .node
            .save(&f.repo, BTreeMap::new(), vec![f.head(CommitId::from_bytes([2u8; 32]))])
            .await;
        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_child_head_replaces_parent_head() {
        let f = Fixture::new();
        let a = f.commit(&[(CommitId::ROOT, 0)]);
        f.push(&a).await;
        let b = f.commit(&[(a.id(), 1)]);
        f.push(&b).await;

        assert_eq!(f.head_ids().await, [b.id()].into_iter().collect());

        // Re-pushing the old head does not resurrect it
        f.push(&a).await;
        assert_eq!(f.head_ids().await, [b.id()].into_iter().collect());
    }

    #[tokio::test]
    async fn test_concurrent_heads_coexist() {
        let f = Fixture::new();
        let a = f.commit(&[(CommitId::ROOT, 0)]);
        let mut c = f.commit(&[(CommitId::ROOT, 0)]);
        c.timestamp = 7;
        f.push(&a).await;
        f.push(&c).await;
        assert_eq!(f.head_ids().await.len(), 2);
    }

    #[tokio::test]
    async fn test_forged_child_head_keeps_owner_head() {
        let f = Fixture::new();
        let mallory = OwnerKeys::generate();
        let forged = |commit: CommitId| {
            SignedData::sign(
                RawHead {
                    repository: f.repo.clone(),
                    commit,
                    timestamp: 1,
                },
                &mallory,
            )
        };

        let a = f.commit(&[(CommitId::ROOT, 0)]);
        f.push(&a).await;
        let b = f.commit(&[(a.id(), 1)]);
        let mut commits = BTreeMap::new();
        commits.insert(b.id(), b.clone());
        f.node.save(&f.repo, commits, vec![forged(b.id())]).await.unwrap();

        // Both are stored; the owner's head survives its forged child
        assert_eq!(f.head_ids().await, [a.id(), b.id()].into_iter().collect());

        // The owner re-pushing its head is not treated as stale
        f.push(&a).await;
        assert!(f.head_ids().await.contains(&a.id()));

        // A forged ancestor head never displaces anything either
        let c = f.commit(&[(b.id(), 2)]);
        f.push(&c).await;
        assert_eq!(f.head_ids().await, [c.id()].into_iter().collect());
        f.node.save(&f.repo, BTreeMap::new(), vec![forged(a.id())]).await.unwrap();
        assert!(f.head_ids().await.contains(&c.id()));
    }

    #[tokio::test]
    async fn test_owner_head_replaces_forged_entry_on_same_commit() {
        let f = Fixture::new();
        let mallory = OwnerKeys::generate();
        let a = f.commit(&[(CommitId::ROOT, 0)]);
        let mut commits = BTreeMap::new();
        commits.insert(a.id(), a.clone());
        let forged = SignedData::sign(
            RawHead {
                repository: f.repo.clone(),
                commit: a.id(),
                timestamp: 1,
            },
            &mallory,
        );
        f.node.save(&f.repo, commits, vec![forged]).await.unwrap();

        f.push(&a).await;
        let heads = f.node.get_heads(&f.repo).await.unwrap();
        assert_eq!(heads.len(), 1);
        assert!(heads[0].verify(&f.keys.pub_key()));
    }

    #[tokio::test]
    async fn test_download_order_and_existing_cutoff() {
        let f = Fixture::new();
        let a = f.commit(&[(CommitId::ROOT, 0)]);
        let b = f.commit(&[(a.id(), 1)]);
        let c = f.commit(&[(b.id(), 2)]);
        for commit in [&a, &b, &c] {
            f.push(commit).await;
        }

        let all: Vec<CommitEntry> = f
            .node
            .download(&f.repo, [c.id()].into_iter().collect(), BTreeSet::new())
            .await
            .unwrap()
            .map(|entry| entry.unwrap())
            .collect()
            .await;
        let ids: Vec<CommitId> = all.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a.id(), b.id(), c.id()]);
        assert!(all[2].head.is_some());
        assert!(all[0].head.is_none());

        let partial: Vec<CommitEntry> = f
            .node
            .download(&f.repo, [c.id()].into_iter().collect(), [a.id()].into_iter().collect())
            .await
            .unwrap()
            .map(|entry| entry.unwrap())
            .collect()
            .await;
        assert_eq!(partial.len(), 2);
    }

    #[tokio::test]
    async fn test_prune_reports_bases() {
        let f = Fixture::new();
        let a = f.commit(&[(CommitId::ROOT, 0)]);
        let b = f.commit(&[(a.id(), 1)]);
        let c = f.commit(&[(b.id(), 2)]);
        for commit in [&a, &b, &c] {
            f.push(commit).await;
        }

        assert!(f.node.get_heads_info(&f.repo).await.unwrap().bases.is_empty());
        assert_eq!(f.node.prune_below(&f.repo, b.id()).await, 1);

        let info = f.node.get_heads_info(&f.repo).await.unwrap();
        assert_eq!(info.bases, [b.id()].into_iter().collect());
        assert_eq!(info.heads, [c.id()].into_iter().collect());
        assert!(f.node.load_commit(&f.repo, a.id()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_offline_and_lost_ack() {
        let f = Fixture::new();
        let a = f.commit(&[(CommitId::ROOT, 0)]);

        f.node.set_offline(true);
        assert!(f.node.get_heads(&f.repo).await.unwrap_err().is_transport());
        f.node.set_offline(false);

        f.node.drop_next_ack();
        let mut commits = BTreeMap::new();
        commits.insert(a.id(), a.clone());
        let result = f.node.save(&f.repo, commits.clone(), vec![f.head(a.id())]).await;
        assert!(result.unwrap_err().is_transport());
        assert!(f.node.contains_commit(&f.repo, &a.id()).await);

        // The retry is an idempotent no-op that now succeeds
        f.node.save(&f.repo, commits, vec![f.head(a.id())]).await.unwrap();
        assert_eq!(f.node.commit_count(&f.repo).await, 1);
    }

    #[tokio::test]
    async fn test_shared_keys_are_filed_by_receiver() {
        let f = Fixture::new();
        let bob = OwnerKeys::generate();
        let shared = SharedSimKey::seal(&f.key, bob.pub_key(), &bob.dh_public()).unwrap();
        let signed = SignedData::sign(shared, &f.keys);

        assert!(f.node.share_key(&f.keys.pub_key(), signed.clone()).await.is_err());
        f.node.share_key(&bob.pub_key(), signed).await.unwrap();

        let fetched = f
            .node
            .get_shared_key(&bob.pub_key(), &f.key.hash())
            .await
            .unwrap()
            .unwrap();
        assert!(fetched.verify(&f.keys.pub_key()));
        assert_eq!(fetched.value().open(&bob).unwrap().hash(), f.key.hash());
    }
}
