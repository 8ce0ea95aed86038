//! Per-replica state façade
//!
//! A `StateManager` owns the materialized state of one replica, the local
//! edits not yet committed, and the commit the state reflects. Edits are
//! applied locally at once; `sync` commits them, merges with whatever the
//! repository holds, pushes and advances.

pub mod state_manager;

pub use state_manager::{StateManager, SyncReport};

use thiserror::Error;

use crate::algebra::AlgebraError;
use crate::graph::GraphError;
use crate::merge::MergeError;
use crate::repository::RepositoryError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Algebra error: {0}")]
    Algebra(#[from] AlgebraError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

impl SyncError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Merge(e) if e.is_conflict())
    }

    /// The node could not be reached; retrying later may succeed.
    pub fn is_transport(&self) -> bool {
        match self {
            SyncError::Repository(e) => e.is_transport(),
            SyncError::Merge(MergeError::Repository(e)) => e.is_transport(),
            _ => false,
        }
    }
}
