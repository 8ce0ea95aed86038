//! Operational-transformation algebra
//!
//! An `OtSystem` is an immutable registry of rules for one diff type:
//! emptiness, inversion, pairwise transform and pairwise squash, each
//! looked up by operation kind. List-level operations (`transform`,
//! `squash`, `invert_list`) are derived from the pairwise rules.
//!
//! Pairwise transform must satisfy the diamond property: for diffs `l` and
//! `r` issued on the same state,
//!
//! ```text
//!     S ── l ──> S_l ── result.left  ──> S'
//!     S ── r ──> S_r ── result.right ──> S'
//! ```
//!
//! both paths end in the same state `S'`.

mod state;
mod system;
mod transform;

pub use state::OtState;
pub use system::{Diff, OtSystem, OtSystemBuilder};
pub use transform::{Squashed, TransformResult};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlgebraError {
    #[error("Missing rule: {0}")]
    MissingRule(String),

    #[error("Transform conflict: {0}")]
    Conflict(String),
}
