//! In-memory arena of loaded commits
//!
//! Commits are keyed by id and link to parents by id only, so the graph
//! never builds reference cycles. It holds whatever part of the history has
//! been loaded so far; walks treat absent commits as the edge of what is
//! known.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;

use super::{Commit, CommitId, GraphError};

#[derive(Debug, Clone)]
pub struct CommitGraph<D> {
    commits: HashMap<CommitId, Commit<D>>,
}

impl<D: Clone> Default for CommitGraph<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Clone> CommitGraph<D> {
    pub fn new() -> Self {
        let mut commits = HashMap::new();
        commits.insert(CommitId::ROOT, Commit::root());
        Self { commits }
    }

    /// Add a commit. Re-inserting a known id is a no-op.
    ///
    /// Fails if the commit's level is not above every parent already present.
    pub fn insert(&mut self, commit: Commit<D>) -> Result<(), GraphError> {
        if self.commits.contains_key(&commit.id()) {
            return Ok(());
        }
        for parent in commit.parent_ids() {
            if let Some(parent_commit) = self.commits.get(&parent) {
                if commit.level() <= parent_commit.level() {
                    return Err(GraphError::LevelOrder {
                        commit: commit.id(),
                        level: commit.level(),
                        parent,
                        parent_level: parent_commit.level(),
                    });
                }
            }
        }
        self.commits.insert(commit.id(), commit);
        Ok(())
    }

    pub fn get(&self, id: &CommitId) -> Option<&Commit<D>> {
        self.commits.get(id)
    }

    pub fn contains(&self, id: &CommitId) -> bool {
        self.commits.contains_key(id)
    }

    pub fn level(&self, id: &CommitId) -> Option<u64> {
        self.commits.get(id).map(Commit::level)
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    /// Only the root is loaded.
    pub fn is_empty(&self) -> bool {
        self.commits.len() <= 1
    }

    pub fn ids(&self) -> BTreeSet<CommitId> {
        self.commits.keys().copied().collect()
    }

    /// Every loaded commit reachable from `id` through parent links, `id` excluded.
    pub fn ancestors(&self, id: &CommitId) -> HashSet<CommitId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<CommitId> = match self.commits.get(id) {
            Some(commit) => commit.parent_ids().collect(),
            None => return seen,
        };
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            if let Some(commit) = self.commits.get(&next) {
                stack.extend(commit.parent_ids());
            }
        }
        seen
    }

    pub fn is_ancestor(&self, ancestor: &CommitId, of: &CommitId) -> bool {
        self.ancestors(of).contains(ancestor)
    }

    /// Drop every head that is an ancestor of another head.
    ///
    /// Only relations visible among loaded commits are detected.
    pub fn exclude_parents(&self, heads: &BTreeSet<CommitId>) -> BTreeSet<CommitId> {
        let mut result = heads.clone();
        for head in heads {
            if !result.contains(head) {
                continue;
            }
            for ancestor in self.ancestors(head) {
                result.remove(&ancestor);
            }
        }
        result
    }

    /// Loaded commits reachable from `id` with no loaded parents.
    pub fn roots(&self, id: &CommitId) -> BTreeSet<CommitId> {
        let mut reachable = self.ancestors(id);
        reachable.insert(*id);
        reachable
            .into_iter()
            .filter(|candidate| match self.commits.get(candidate) {
                Some(commit) => commit.parent_ids().all(|p| !self.commits.contains_key(&p)),
                None => false,
            })
            .collect()
    }

    /// Graphviz rendering of the loaded graph, children pointing at parents.
    pub fn to_graphviz(&self) -> String {
        let mut ids: Vec<&CommitId> = self.commits.keys().collect();
        ids.sort_by_key(|id| (self.commits[*id].level(), **id));

        let mut out = String::from("digraph commits {\n");
        for id in ids {
            let commit = &self.commits[id];
            let _ = writeln!(out, "  \"{}\" [label=\"{} @{}\"];", id, id, commit.level());
            for parent in commit.parent_ids() {
                let _ = writeln!(out, "  \"{}\" -> \"{}\";", id, parent);
            }
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RawCommit;
    use crate::identity::{EncryptedData, SimKeyHash};
    use std::collections::BTreeMap;

    fn commit(parents: &[CommitId], level: u64, salt: i64) -> Commit<u32> {
        let sealed = EncryptedData {
            nonce: [0u8; 12],
            ciphertext: Vec::new(),
        };
        let raw = RawCommit {
            parents: parents.iter().map(|p| (*p, sealed.clone())).collect(),
            level,
            timestamp: salt,
            sim_key_hash: SimKeyHash::from_bytes([0u8; 32]),
        };
        let diffs: BTreeMap<CommitId, Vec<u32>> = parents.iter().map(|p| (*p, vec![])).collect();
        Commit::from_raw(raw, diffs).unwrap()
    }

    /// root <- a <- b, root <- c, {b, c} <- m
    fn diamond() -> (CommitGraph<u32>, [CommitId; 4]) {
        let mut graph = CommitGraph::new();
        let a = commit(&[CommitId::ROOT], 1, 1);
        let b = commit(&[a.id()], 2, 2);
        let c = commit(&[CommitId::ROOT], 1, 3);
        let m = commit(&[b.id(), c.id()], 3, 4);
        let ids = [a.id(), b.id(), c.id(), m.id()];
        for commit in [a, b, c, m] {
            graph.insert(commit).unwrap();
        }
        (graph, ids)
    }

    #[test]
    fn test_new_graph_holds_root() {
        let graph: CommitGraph<u32> = CommitGraph::new();
        assert!(graph.contains(&CommitId::ROOT));
        assert_eq!(graph.level(&CommitId::ROOT), Some(0));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_level_must_exceed_parent() {
        let mut graph = CommitGraph::new();
        let a = commit(&[CommitId::ROOT], 3, 1);
        let a_id = a.id();
        graph.insert(a).unwrap();

        let bad = commit(&[a_id], 3, 2);
        assert!(matches!(graph.insert(bad), Err(GraphError::LevelOrder { .. })));
    }

    #[test]
    fn test_ancestors_and_exclude_parents() {
        let (graph, [a, b, c, m]) = diamond();

        let ancestors = graph.ancestors(&m);
        assert!(ancestors.contains(&a) && ancestors.contains(&b) && ancestors.contains(&c));
        assert!(ancestors.contains(&CommitId::ROOT));
        assert!(graph.is_ancestor(&a, &b));
        assert!(!graph.is_ancestor(&c, &b));

        let heads: BTreeSet<CommitId> = [a, b, c].into_iter().collect();
        let tips = graph.exclude_parents(&heads);
        assert_eq!(tips, [b, c].into_iter().collect());

        let all: BTreeSet<CommitId> = [a, b, c, m].into_iter().collect();
        assert_eq!(graph.exclude_parents(&all), [m].into_iter().collect());
    }

    #[test]
    fn test_roots() {
        let (graph, [a, _, _, m]) = diamond();
        assert_eq!(graph.roots(&m), [CommitId::ROOT].into_iter().collect());

        // With the root forgotten, the level-1 commits become the roots
        let mut partial = CommitGraph::new();
        partial.commits.remove(&CommitId::ROOT);
        partial.insert(graph.get(&a).unwrap().clone()).unwrap();
        assert_eq!(partial.roots(&a), [a].into_iter().collect());
    }

    #[test]
    fn test_graphviz_lists_edges() {
        let (graph, [_, b, c, m]) = diamond();
        let dot = graph.to_graphviz();
        assert!(dot.starts_with("digraph commits {"));
        assert!(dot.contains(&format!("\"{}\" -> \"{}\";", m, b)));
        assert!(dot.contains(&format!("\"{}\" -> \"{}\";", m, c)));
    }
}
