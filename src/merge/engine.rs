use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::walk::{fetch, find_common_base, path_from_snapshot, prefetch};
use super::{MergeBase, MergeError, MergePhase};
use crate::algebra::{Diff, OtSystem};
use crate::config::MergeConfig;
use crate::graph::{Commit, CommitGraph, CommitId};
use crate::repository::{Repository, RepositoryError};

/// Result of merging two heads.
#[derive(Clone, Debug)]
pub struct PairMerge<D> {
    pub head: CommitId,
    pub level: u64,
    /// Diffs that take the left head's state to the result.
    pub left_diffs: Vec<D>,
    /// The new merge commit, or `None` for a fast-forward.
    pub commit: Option<Commit<D>>,
}

/// Result of folding a set of heads into one.
#[derive(Clone, Debug)]
pub struct MergeOutcome<D> {
    pub head: CommitId,
    pub level: u64,
    /// Diffs from the starting commit's state to the merged state, squashed.
    pub diffs: Vec<D>,
    /// Merge commits built along the way, oldest first. Not yet pushed.
    pub commits: Vec<Commit<D>>,
}

pub struct MergeEngine<D: Diff> {
    system: Arc<OtSystem<D>>,
    config: MergeConfig,
}

impl<D: Diff> MergeEngine<D> {
    pub fn new(system: Arc<OtSystem<D>>, config: MergeConfig) -> Self {
        Self { system, config }
    }

    pub fn system(&self) -> &Arc<OtSystem<D>> {
        &self.system
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Common base of two heads, falling back to snapshots when history
    /// does not connect them.
    pub async fn find_base(
        &self,
        repo: &dyn Repository<D>,
        graph: &mut CommitGraph<D>,
        left: CommitId,
        right: CommitId,
    ) -> Result<MergeBase<D>, MergeError> {
        if let Some(base) = find_common_base(repo, graph, left, right, &self.config).await? {
            return Ok(base);
        }
        if !self.config.snapshot_fallback {
            return Err(MergeError::NoCommonBase(left, right));
        }

        log::info!("No common ancestor of {} and {} in reach; using snapshots", left, right);
        let left_state = path_from_snapshot(repo, graph, left).await?;
        let right_state = path_from_snapshot(repo, graph, right).await?;
        match (left_state, right_state) {
            (Some(left_diffs), Some(right_diffs)) => Ok(MergeBase {
                base: CommitId::ROOT,
                left: self.system.squash(&left_diffs),
                right: self.system.squash(&right_diffs),
                from_snapshot: true,
            }),
            _ => Err(MergeError::NoCommonBase(left, right)),
        }
    }

    fn known_level(graph: &CommitGraph<D>, id: CommitId) -> Result<u64, MergeError> {
        graph.level(&id).ok_or_else(|| {
            MergeError::Repository(RepositoryError::NotFound(format!("commit {} not loaded", id)))
        })
    }

    /// Merge two heads into one, building a merge commit unless one is an
    /// ancestor of the other.
    pub async fn merge_pair(
        &self,
        repo: &dyn Repository<D>,
        graph: &mut CommitGraph<D>,
        left: CommitId,
        right: CommitId,
    ) -> Result<PairMerge<D>, MergeError> {
        log::debug!("Merging {} and {}: {}", left, right, MergePhase::FindBase);
        let base = self.find_base(repo, graph, left, right).await?;
        let left_level = Self::known_level(graph, left)?;
        let right_level = Self::known_level(graph, right)?;

        if !base.from_snapshot && base.base == right {
            log::debug!("{} already contains {}", left, right);
            return Ok(PairMerge {
                head: left,
                level: left_level,
                left_diffs: Vec::new(),
                commit: None,
            });
        }
        if !base.from_snapshot && base.base == left {
            log::debug!("Fast-forward {} to {}", left, right);
            return Ok(PairMerge {
                head: right,
                level: right_level,
                left_diffs: self.system.squash(&base.right),
                commit: None,
            });
        }

        log::debug!(
            "Merging {} and {}: {} ({} + {} diffs from {})",
            left,
            right,
            MergePhase::ComputeDiffs,
            base.left.len(),
            base.right.len(),
            base.base
        );

        log::debug!("Merging {} and {}: {}", left, right, MergePhase::Transform);
        let transformed = self
            .system
            .transform(&base.left, &base.right)
            .map_err(|source| {
                log::warn!("Merge of {} and {} failed: {}", left, right, source);
                log::trace!("Commit graph at failure:\n{}", graph.to_graphviz());
                MergeError::Conflict { left, right, source }
            })?;

        log::debug!("Merging {} and {}: {}", left, right, MergePhase::Squash);
        let from_left = self.system.squash(&transformed.left);
        let from_right = self.system.squash(&transformed.right);

        log::debug!("Merging {} and {}: {}", left, right, MergePhase::BuildMergeCommit);
        let level = left_level.max(right_level) + 1;
        let mut parents = BTreeMap::new();
        parents.insert(left, from_left.clone());
        parents.insert(right, from_right);
        let commit = repo.create_commit(parents, level)?;
        graph.insert(commit.clone())?;

        log::info!("Merged {} and {} into {} ({})", left, right, commit.id(), MergePhase::Done);
        Ok(PairMerge {
            head: commit.id(),
            level,
            left_diffs: from_left,
            commit: Some(commit),
        })
    }

    /// Fold `heads` into `start`, one pairwise merge at a time.
    ///
    /// Heads that cannot be read, or that are ancestors of another head,
    /// are skipped.
    pub async fn merge_from(
        &self,
        repo: &dyn Repository<D>,
        graph: &mut CommitGraph<D>,
        start: CommitId,
        heads: &BTreeSet<CommitId>,
    ) -> Result<MergeOutcome<D>, MergeError> {
        if self.config.prefetch {
            let mut wanted = heads.clone();
            wanted.insert(start);
            prefetch(repo, graph, &wanted).await?;
        }

        let Some(mut level) = fetch(repo, graph, start).await? else {
            return Err(MergeError::Repository(RepositoryError::NotFound(format!(
                "start commit {}",
                start
            ))));
        };

        let mut candidates = BTreeSet::new();
        candidates.insert(start);
        for head in heads {
            if *head == start {
                continue;
            }
            match fetch(repo, graph, *head).await? {
                Some(_) => {
                    candidates.insert(*head);
                }
                None => log::warn!("Skipping unreadable head {}", head),
            }
        }
        let tips = graph.exclude_parents(&candidates);

        let mut current = start;
        let mut diffs: Vec<D> = Vec::new();
        let mut commits = Vec::new();
        for head in tips.into_iter().filter(|head| *head != start) {
            let pair = self.merge_pair(repo, graph, current, head).await?;
            diffs.extend(pair.left_diffs);
            diffs = self.system.squash(&diffs);
            current = pair.head;
            level = pair.level;
            commits.extend(pair.commit);
        }

        Ok(MergeOutcome {
            head: current,
            level,
            diffs,
            commits,
        })
    }

    /// Fold all `heads` into one, starting from the highest.
    pub async fn merge(
        &self,
        repo: &dyn Repository<D>,
        graph: &mut CommitGraph<D>,
        heads: &BTreeSet<CommitId>,
    ) -> Result<MergeOutcome<D>, MergeError> {
        if self.config.prefetch {
            prefetch(repo, graph, heads).await?;
        }
        let mut start = None;
        for head in heads {
            if let Some(level) = fetch(repo, graph, *head).await? {
                if start.map_or(true, |(best, _)| level > best) {
                    start = Some((level, *head));
                }
            }
        }
        let start = start.map_or(CommitId::ROOT, |(_, id)| id);
        self.merge_from(repo, graph, start, heads).await
    }

    /// Diffs that take the state at `from` to the state at `to`.
    pub async fn diff(
        &self,
        repo: &dyn Repository<D>,
        graph: &mut CommitGraph<D>,
        from: CommitId,
        to: CommitId,
    ) -> Result<Vec<D>, MergeError> {
        let base = self.find_base(repo, graph, from, to).await?;
        let mut diffs = self.system.invert_list(&base.left)?;
        diffs.extend(base.right);
        Ok(self.system.squash(&diffs))
    }

    /// Diffs from the empty state to the state at `id`.
    pub async fn checkout(
        &self,
        repo: &dyn Repository<D>,
        graph: &mut CommitGraph<D>,
        id: CommitId,
    ) -> Result<Vec<D>, MergeError> {
        match path_from_snapshot(repo, graph, id).await? {
            Some(diffs) => Ok(self.system.squash(&diffs)),
            None => Err(MergeError::NoSnapshot(id)),
        }
    }

    /// Store the full state at `id` as a snapshot.
    pub async fn save_snapshot(
        &self,
        repo: &dyn Repository<D>,
        graph: &mut CommitGraph<D>,
        id: CommitId,
    ) -> Result<(), MergeError> {
        let diffs = self.checkout(repo, graph, id).await?;
        repo.save_snapshot(id, diffs).await?;
        Ok(())
    }
}
