//! otgraph - operational-transformation sync over a content-addressed commit graph
//!
//! Replicas edit a local state through typed diffs (`algebra`), record them
//! as encrypted, hash-addressed commits (`graph`, `identity`), exchange them
//! through a storage node (`repository`), and converge by transforming
//! concurrent branches against each other (`merge`). `manager` ties this
//! together behind a per-replica façade.

pub mod algebra;
pub mod config;
pub mod document;
pub mod graph;
pub mod identity;
pub mod manager;
pub mod merge;
pub mod repository;

pub use algebra::{AlgebraError, Diff, OtState, OtSystem};
pub use config::{MergeConfig, SyncConfig};
pub use graph::{Commit, CommitGraph, CommitId};
pub use manager::{StateManager, SyncError, SyncReport};
pub use merge::{MergeEngine, MergeError};
pub use repository::{MemoryNode, NodeRepository, RemoteNode, Repository, RepositoryError};
