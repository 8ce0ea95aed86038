use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

use super::SyncError;
use crate::algebra::{Diff, OtState, OtSystem};
use crate::config::SyncConfig;
use crate::graph::{Commit, CommitGraph, CommitId};
use crate::merge::{MergeEngine, MergeError};
use crate::repository::Repository;

/// What a successful `sync` did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncReport {
    /// The commit the state reflects after the sync.
    pub head: CommitId,
    /// Commits sent to the repository, local and merge commits together.
    pub pushed: usize,
    pub merge_commits: usize,
    /// Remote diffs applied to the local state.
    pub applied: usize,
    /// Nothing to send and nothing new remotely.
    pub up_to_date: bool,
}

/// Local commit made by the current sync attempt, kept so a conflict can
/// undo it.
struct LocalCommit<D> {
    id: CommitId,
    pending: Vec<D>,
    base: CommitId,
    base_level: u64,
}

pub struct StateManager<D: Diff, S: OtState<D>> {
    replica_id: Uuid,
    system: Arc<OtSystem<D>>,
    repository: Arc<dyn Repository<D>>,
    engine: MergeEngine<D>,
    graph: CommitGraph<D>,
    config: SyncConfig,
    state: S,
    base: CommitId,
    base_level: u64,
    pending: Vec<D>,
    unpushed: BTreeMap<CommitId, Commit<D>>,
}

impl<D: Diff, S: OtState<D>> StateManager<D, S> {
    /// A manager at `ROOT` with `state` initialised to empty. Call
    /// `checkout` to load what the repository already holds.
    pub fn new(
        system: Arc<OtSystem<D>>,
        repository: Arc<dyn Repository<D>>,
        mut state: S,
        config: SyncConfig,
    ) -> Self {
        state.init();
        let replica_id = Uuid::new_v4();
        log::debug!("Replica {} opened {}", replica_id, repository.repository_id());
        Self {
            replica_id,
            engine: MergeEngine::new(system.clone(), config.merge.clone()),
            system,
            repository,
            graph: CommitGraph::new(),
            config,
            state,
            base: CommitId::ROOT,
            base_level: 0,
            pending: Vec::new(),
            unpushed: BTreeMap::new(),
        }
    }

    pub fn replica_id(&self) -> Uuid {
        self.replica_id
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn base(&self) -> CommitId {
        self.base
    }

    pub fn pending(&self) -> &[D] {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Local commits the repository has not acknowledged yet.
    pub fn has_unpushed(&self) -> bool {
        !self.unpushed.is_empty()
    }

    pub fn system(&self) -> &Arc<OtSystem<D>> {
        &self.system
    }

    /// Load the state of the highest readable head. Other heads are merged
    /// by the next `sync`. Discards pending edits.
    pub async fn checkout(&mut self) -> Result<(), SyncError> {
        let heads = self.repository.get_heads().await?;
        let mut best: Option<(u64, CommitId)> = None;
        for head in heads {
            match self.repository.load_commit(head).await {
                Ok(commit) => {
                    let key = (commit.level(), head);
                    if best.map_or(true, |current| key > current) {
                        best = Some(key);
                    }
                }
                Err(e) if e.is_not_found() => log::warn!("Skipping unreadable head {}", head),
                Err(e) => return Err(e.into()),
            }
        }
        let target = best.map_or(CommitId::ROOT, |(_, id)| id);
        self.checkout_at(target).await
    }

    /// Load the state at `id`. Discards pending edits.
    pub async fn checkout_at(&mut self, id: CommitId) -> Result<(), SyncError> {
        let diffs = self
            .engine
            .checkout(self.repository.as_ref(), &mut self.graph, id)
            .await?;
        let level = self.graph.level(&id).unwrap_or(0);

        self.state.init();
        self.state.apply_all(&diffs);
        self.base = id;
        self.base_level = level;
        self.pending.clear();
        self.unpushed.clear();
        log::info!("Replica {} checked out {} at level {}", self.replica_id, id, level);
        Ok(())
    }

    /// Apply `op` to the local state and queue it for the next sync.
    ///
    /// The op is first rewritten against the current state, so inserting a
    /// present element or setting a field to its current value queues
    /// nothing.
    pub fn apply_local(&mut self, op: D) {
        let Some(op) = self.state.prepare(op) else {
            return;
        };
        if self.system.is_empty(&op) {
            return;
        }
        self.state.apply(&op);
        self.pending.push(op);
    }

    pub fn apply_all(&mut self, ops: impl IntoIterator<Item = D>) {
        for op in ops {
            self.apply_local(op);
        }
    }

    /// Undo every pending edit on the local state.
    pub fn reset(&mut self) -> Result<(), SyncError> {
        let undo = self.system.invert_list(&self.pending)?;
        self.state.apply_all(&undo);
        self.pending.clear();
        Ok(())
    }

    /// Commit pending edits on top of `base`. `None` when they squash away.
    fn commit_pending(&mut self) -> Result<Option<LocalCommit<D>>, SyncError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let diffs = self.system.squash(&self.pending);
        let pending = std::mem::take(&mut self.pending);
        if diffs.is_empty() {
            return Ok(None);
        }

        let level = self.base_level + 1;
        let mut parents = BTreeMap::new();
        parents.insert(self.base, diffs);
        let commit = match self.repository.create_commit(parents, level) {
            Ok(commit) => commit,
            Err(e) => {
                self.pending = pending;
                return Err(e.into());
            }
        };
        if let Err(e) = self.graph.insert(commit.clone()) {
            self.pending = pending;
            return Err(e.into());
        }

        let local = LocalCommit {
            id: commit.id(),
            pending,
            base: self.base,
            base_level: self.base_level,
        };
        log::debug!("Replica {} committed {} on {}", self.replica_id, local.id, self.base);
        self.unpushed.insert(commit.id(), commit);
        self.base = local.id;
        self.base_level = level;
        Ok(Some(local))
    }

    fn roll_back(&mut self, local: LocalCommit<D>) {
        self.unpushed.remove(&local.id);
        self.base = local.base;
        self.base_level = local.base_level;
        self.pending = local.pending;
    }

    /// Commit pending edits, merge with the repository's heads, push, and
    /// advance.
    ///
    /// The state only changes once the push is acknowledged. On a conflict
    /// the edits go back to `pending`; on a transport error the local
    /// commit is kept and sent again by the next call.
    pub async fn sync(&mut self) -> Result<SyncReport, SyncError> {
        let local = self.commit_pending()?;
        match self.sync_committed().await {
            Ok(report) => Ok(report),
            Err(e) => {
                if e.is_conflict() {
                    if let Some(local) = local {
                        log::warn!("Replica {} keeps its edits pending after a conflict", self.replica_id);
                        self.roll_back(local);
                    }
                } else {
                    log::warn!("Sync of replica {} failed: {}", self.replica_id, e);
                }
                Err(e)
            }
        }
    }

    /// Merge the repository's heads into the local state without committing
    /// pending edits.
    ///
    /// Pending edits are transformed past the fetched diffs and stay
    /// pending. Merge commits needed to join several remote heads are
    /// pushed. A conflict between pending edits and remote diffs leaves
    /// everything as it was.
    pub async fn pull(&mut self) -> Result<SyncReport, SyncError> {
        let result = self.sync_committed().await;
        if let Err(e) = &result {
            log::warn!("Pull of replica {} failed: {}", self.replica_id, e);
        }
        result
    }

    async fn sync_committed(&mut self) -> Result<SyncReport, SyncError> {
        let heads = self.repository.get_heads().await?;
        if self.unpushed.is_empty() && heads.len() == 1 && heads.contains(&self.base) {
            log::debug!("Replica {} is up to date at {}", self.replica_id, self.base);
            return Ok(SyncReport {
                head: self.base,
                pushed: 0,
                merge_commits: 0,
                applied: 0,
                up_to_date: true,
            });
        }

        let outcome = self
            .engine
            .merge_from(self.repository.as_ref(), &mut self.graph, self.base, &heads)
            .await?;
        // Uncommitted edits ride over the fetched diffs
        let rebased = self
            .system
            .transform(&self.pending, &outcome.diffs)
            .map_err(|source| MergeError::Conflict {
                left: self.base,
                right: outcome.head,
                source,
            })?;

        let mut commits: Vec<Commit<D>> = self.unpushed.values().cloned().collect();
        commits.sort_by_key(|commit| commit.level());
        let merge_commits = outcome.commits.len();
        commits.extend(outcome.commits);
        let pushed = commits.len();
        let new_heads: BTreeSet<CommitId> = [outcome.head].into_iter().collect();
        if pushed > 0 || !heads.contains(&outcome.head) {
            self.repository.push(commits, new_heads).await?;
        }

        self.state.apply_all(&rebased.left);
        self.pending = rebased.right;
        self.base = outcome.head;
        self.base_level = outcome.level;
        self.unpushed.clear();

        if let Some(every) = self.config.snapshot_every {
            if every > 0 && self.base_level % every == 0 {
                self.save_snapshot().await;
            }
        }

        log::info!(
            "Replica {} synced to {} ({} pushed, {} merges, {} diffs applied)",
            self.replica_id,
            self.base,
            pushed,
            merge_commits,
            rebased.left.len()
        );
        Ok(SyncReport {
            head: self.base,
            pushed,
            merge_commits,
            applied: rebased.left.len(),
            up_to_date: false,
        })
    }

    async fn save_snapshot(&mut self) {
        let result = self
            .engine
            .save_snapshot(self.repository.as_ref(), &mut self.graph, self.base)
            .await;
        match result {
            Ok(()) => log::debug!("Saved snapshot at {}", self.base),
            Err(e) => log::warn!("Snapshot at {} not saved: {}", self.base, e),
        }
    }
}
