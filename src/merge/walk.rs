//! Level-guided walks over the commit graph
//!
//! Commits are pulled into the `CommitGraph` arena as the walk reaches
//! them. A commit the repository reports as `NotFound` (pruned, or not
//! readable by us) ends the walk along that edge.

use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

use super::MergeError;
use crate::algebra::Diff;
use crate::config::MergeConfig;
use crate::graph::{CommitGraph, CommitId, GraphError};
use crate::repository::Repository;

/// A common ancestor and the diffs leading from it to each head.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeBase<D> {
    pub base: CommitId,
    /// Base state to the left head.
    pub left: Vec<D>,
    /// Base state to the right head.
    pub right: Vec<D>,
    /// The base is the empty state and both lists are full snapshots.
    pub from_snapshot: bool,
}

impl<D> MergeBase<D> {
    fn same(id: CommitId) -> Self {
        Self {
            base: id,
            left: Vec::new(),
            right: Vec::new(),
            from_snapshot: false,
        }
    }
}

/// Make sure `id` is in the arena. `None` if the repository cannot provide it.
pub(crate) async fn fetch<D: Diff>(
    repo: &dyn Repository<D>,
    graph: &mut CommitGraph<D>,
    id: CommitId,
) -> Result<Option<u64>, MergeError> {
    if let Some(level) = graph.level(&id) {
        return Ok(Some(level));
    }
    match repo.load_commit(id).await {
        Ok(commit) => {
            let level = commit.level();
            graph.insert(commit)?;
            Ok(Some(level))
        }
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Pull the unknown history behind `heads` into the arena in one transfer.
pub(crate) async fn prefetch<D: Diff>(
    repo: &dyn Repository<D>,
    graph: &mut CommitGraph<D>,
    heads: &BTreeSet<CommitId>,
) -> Result<(), MergeError> {
    let missing: BTreeSet<CommitId> = heads.iter().filter(|id| !graph.contains(id)).copied().collect();
    if missing.is_empty() {
        return Ok(());
    }
    let mut commits = repo.load_range(&missing, &graph.ids()).await?;
    commits.sort_by_key(|commit| (commit.level(), commit.id()));
    let count = commits.len();
    for commit in commits {
        graph.insert(commit)?;
    }
    log::debug!("Prefetched {} commits behind {} heads", count, missing.len());
    Ok(())
}

/// How the walk first reached a commit from one of its starting points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Start,
    Via(CommitId),
}

/// Diffs from `from` up to the walk's starting point, following the child
/// links the walk recorded.
fn rebuild_path<D: Diff>(
    graph: &CommitGraph<D>,
    from: CommitId,
    step_of: impl Fn(&CommitId) -> Option<Step>,
) -> Result<Vec<D>, MergeError> {
    let mut path = Vec::new();
    let mut node = from;
    while let Some(Step::Via(child)) = step_of(&node) {
        let edge = graph
            .get(&child)
            .and_then(|commit| commit.diffs_from(&node))
            .ok_or_else(|| GraphError::Malformed(format!("no edge from {} to {}", node, child)))?;
        path.extend(edge.iter().cloned());
        node = child;
    }
    Ok(path)
}

/// Find the highest common ancestor of `left` and `right`.
///
/// Walks parents, always expanding the highest-level commit first, and
/// remembers for every reached commit the child it was first reached
/// through from each head. The first commit popped having been reached
/// from both heads is the base; only its two paths are materialized.
/// Returns `None` when the reachable history holds no common ancestor.
pub(crate) async fn find_common_base<D: Diff>(
    repo: &dyn Repository<D>,
    graph: &mut CommitGraph<D>,
    left: CommitId,
    right: CommitId,
    config: &MergeConfig,
) -> Result<Option<MergeBase<D>>, MergeError> {
    if left == right {
        return Ok(Some(MergeBase::same(left)));
    }

    let bases = repo.get_heads_info().await?.bases;
    let mut steps: HashMap<CommitId, [Option<Step>; 2]> = HashMap::new();
    let mut queue: BinaryHeap<(u64, CommitId)> = BinaryHeap::new();

    for (side, head) in [left, right].into_iter().enumerate() {
        let Some(level) = fetch(repo, graph, head).await? else {
            log::warn!("Head {} is not readable", head);
            return Ok(None);
        };
        steps.entry(head).or_insert([None, None])[side] = Some(Step::Start);
        queue.push((level, head));
    }

    let mut visited = HashSet::new();
    while let Some((_, id)) = queue.pop() {
        if !visited.insert(id) {
            continue;
        }
        let reached = steps.get(&id).copied().unwrap_or([None, None]);
        if reached.iter().all(Option::is_some) {
            log::debug!("Base of {} and {} is {}", left, right, id);
            let to_left = rebuild_path(graph, id, |node| steps.get(node).and_then(|s| s[0]))?;
            let to_right = rebuild_path(graph, id, |node| steps.get(node).and_then(|s| s[1]))?;
            return Ok(Some(MergeBase {
                base: id,
                left: to_left,
                right: to_right,
                from_snapshot: false,
            }));
        }
        if let Some(limit) = config.max_walk_commits {
            if visited.len() > limit {
                log::debug!("Base search for {} and {} gave up after {} commits", left, right, limit);
                return Ok(None);
            }
        }

        let Some(commit) = graph.get(&id) else {
            continue;
        };
        let parents: Vec<CommitId> = commit.parent_ids().collect();

        for parent in parents {
            if bases.contains(&id) && !graph.contains(&parent) {
                continue;
            }
            let Some(level) = fetch(repo, graph, parent).await? else {
                log::debug!("Walk stops at unavailable commit {}", parent);
                continue;
            };
            let entry = steps.entry(parent).or_insert([None, None]);
            for (slot, from_child) in entry.iter_mut().zip(reached.iter()) {
                if slot.is_none() && from_child.is_some() {
                    *slot = Some(Step::Via(id));
                }
            }
            queue.push((level, parent));
        }
    }
    Ok(None)
}

/// Diffs from the empty state to `id`, built from the nearest snapshot.
pub(crate) async fn path_from_snapshot<D: Diff>(
    repo: &dyn Repository<D>,
    graph: &mut CommitGraph<D>,
    id: CommitId,
) -> Result<Option<Vec<D>>, MergeError> {
    let Some(level) = fetch(repo, graph, id).await? else {
        return Ok(None);
    };

    let mut steps: HashMap<CommitId, Step> = HashMap::new();
    steps.insert(id, Step::Start);
    let mut queue = BinaryHeap::new();
    queue.push((level, id));
    let mut visited = HashSet::new();

    while let Some((_, node)) = queue.pop() {
        if !visited.insert(node) {
            continue;
        }
        if let Some(mut diffs) = repo.load_snapshot(node).await? {
            log::debug!("State of {} rebuilt from snapshot at {}", id, node);
            diffs.extend(rebuild_path(graph, node, |at| steps.get(at).copied())?);
            return Ok(Some(diffs));
        }

        let Some(commit) = graph.get(&node) else {
            continue;
        };
        let parents: Vec<CommitId> = commit.parent_ids().collect();
        for parent in parents {
            let Some(parent_level) = fetch(repo, graph, parent).await? else {
                continue;
            };
            steps.entry(parent).or_insert(Step::Via(node));
            queue.push((parent_level, parent));
        }
    }
    Ok(None)
}
