use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{DocumentOp, Value};
use crate::algebra::OtState;

/// Materialized document: a set of elements plus named fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentState {
    pub elements: BTreeSet<Value>,
    pub fields: BTreeMap<String, Value>,
}

impl DocumentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, element: &Value) -> bool {
        self.elements.contains(element)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Diffs that build this state from the empty document.
    pub fn to_diffs(&self) -> Vec<DocumentOp> {
        let inserts = self.elements.iter().cloned().map(DocumentOp::Insert);
        let fields = self.fields.iter().map(|(name, value)| DocumentOp::SetField {
            field: name.clone(),
            prev: None,
            next: Some(value.clone()),
        });
        inserts.chain(fields).collect()
    }
}

impl OtState<DocumentOp> for DocumentState {
    fn init(&mut self) {
        self.elements.clear();
        self.fields.clear();
    }

    fn apply(&mut self, diff: &DocumentOp) {
        match diff {
            DocumentOp::Insert(element) => {
                self.elements.insert(element.clone());
            }
            DocumentOp::Remove(element) => {
                self.elements.remove(element);
            }
            DocumentOp::SetField { field, next, .. } => match next {
                Some(value) => {
                    self.fields.insert(field.clone(), value.clone());
                }
                None => {
                    self.fields.remove(field);
                }
            },
        }
    }

    fn prepare(&self, diff: DocumentOp) -> Option<DocumentOp> {
        match diff {
            DocumentOp::Insert(element) if self.contains(&element) => None,
            DocumentOp::Remove(element) if !self.contains(&element) => None,
            DocumentOp::SetField { field, next, .. } => {
                let prev = self.fields.get(&field).cloned();
                if prev == next {
                    return None;
                }
                Some(DocumentOp::SetField { field, prev, next })
            }
            other => Some(other),
        }
    }
}
