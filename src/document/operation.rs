//! Document values and the three document operations

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::algebra::Diff;

/// A value that can be stored in fields or as a set element.
///
/// Values are totally ordered so sets of them are deterministic and
/// concurrent field writes can be tie-broken.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn int(n: i64) -> Self {
        Value::Int(n)
    }

    pub fn bool(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentOp {
    /// Add an element to the document's set
    Insert(Value),

    /// Remove an element from the document's set
    Remove(Value),

    /// Change a named field. `None` means the field is unset.
    SetField {
        field: String,
        prev: Option<Value>,
        next: Option<Value>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    Insert,
    Remove,
    SetField,
}

impl Diff for DocumentOp {
    type Kind = OpKind;

    fn kind(&self) -> OpKind {
        match self {
            DocumentOp::Insert(_) => OpKind::Insert,
            DocumentOp::Remove(_) => OpKind::Remove,
            DocumentOp::SetField { .. } => OpKind::SetField,
        }
    }

    fn kinds() -> &'static [OpKind] {
        &[OpKind::Insert, OpKind::Remove, OpKind::SetField]
    }
}

impl DocumentOp {
    pub fn insert(element: Value) -> Self {
        DocumentOp::Insert(element)
    }

    pub fn remove(element: Value) -> Self {
        DocumentOp::Remove(element)
    }

    pub fn set_field(field: impl Into<String>, prev: Option<Value>, next: Option<Value>) -> Self {
        DocumentOp::SetField {
            field: field.into(),
            prev,
            next,
        }
    }
}
