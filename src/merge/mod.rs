//! Merge engine
//!
//! A pairwise merge runs through `FindBase → ComputeDiffs → Transform →
//! Squash → BuildMergeCommit`. More than two heads are folded pairwise
//! starting from a chosen head. A transform conflict aborts the merge and
//! is returned to the caller; it is never resolved by picking a side.

pub mod engine;
pub mod walk;

pub use engine::{MergeEngine, MergeOutcome, PairMerge};
pub use walk::MergeBase;

use std::fmt;
use thiserror::Error;

use crate::algebra::AlgebraError;
use crate::graph::{CommitId, GraphError};
use crate::repository::RepositoryError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergePhase {
    FindBase,
    ComputeDiffs,
    Transform,
    Squash,
    BuildMergeCommit,
    Done,
}

impl fmt::Display for MergePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergePhase::FindBase => "find-base",
            MergePhase::ComputeDiffs => "compute-diffs",
            MergePhase::Transform => "transform",
            MergePhase::Squash => "squash",
            MergePhase::BuildMergeCommit => "build-merge-commit",
            MergePhase::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Conflict merging {left} and {right}: {source}")]
    Conflict {
        left: CommitId,
        right: CommitId,
        source: AlgebraError,
    },

    #[error("No common base for {0} and {1}")]
    NoCommonBase(CommitId, CommitId),

    #[error("No snapshot reachable from {0}")]
    NoSnapshot(CommitId),

    #[error("Algebra error: {0}")]
    Algebra(#[from] AlgebraError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl MergeError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, MergeError::Conflict { .. })
    }
}
