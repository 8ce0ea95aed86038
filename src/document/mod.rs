//! Document domain: a set of values plus named fields
//!
//! - `DocumentOp`: insert/remove set elements, write a field (`prev` -> `next`)
//! - `DocumentState`: the materialized document
//! - `document_system`: transform/squash/invert rules for `DocumentOp`

pub mod operation;
pub mod state;
pub mod system;

pub use operation::{DocumentOp, OpKind, Value};
pub use state::DocumentState;
pub use system::{document_system, FieldPolicy};
