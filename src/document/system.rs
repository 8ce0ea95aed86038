use serde::{Deserialize, Serialize};

use super::{DocumentOp, OpKind};
use crate::algebra::{AlgebraError, OtSystem, Squashed, TransformResult};

/// How concurrent writes of different values to the same field are settled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPolicy {
    /// Report a conflict.
    #[default]
    Strict,
    /// Keep the greater value on both sides.
    GreaterWins,
}

fn kind_mismatch(left: &DocumentOp, right: &DocumentOp) -> AlgebraError {
    AlgebraError::Conflict(format!(
        "rule called with {:?} x {:?}",
        left, right
    ))
}

fn transform_elements(
    left: &DocumentOp,
    right: &DocumentOp,
) -> Result<TransformResult<DocumentOp>, AlgebraError> {
    use DocumentOp::*;
    match (left, right) {
        (Insert(a), Insert(b)) | (Remove(a), Remove(b)) if a == b => Ok(TransformResult::empty()),
        (Insert(a), Remove(b)) if a == b => Err(AlgebraError::Conflict(format!(
            "{:?} inserted and removed concurrently",
            a
        ))),
        (Insert(_) | Remove(_), Insert(_) | Remove(_)) => Ok(TransformResult::pass_through(left, right)),
        _ => Err(kind_mismatch(left, right)),
    }
}

fn transform_fields(
    policy: FieldPolicy,
    left: &DocumentOp,
    right: &DocumentOp,
) -> Result<TransformResult<DocumentOp>, AlgebraError> {
    let (
        DocumentOp::SetField {
            field,
            prev: left_prev,
            next: left_next,
        },
        DocumentOp::SetField {
            field: right_field,
            prev: right_prev,
            next: right_next,
        },
    ) = (left, right)
    else {
        return Err(kind_mismatch(left, right));
    };

    if field != right_field {
        return Ok(TransformResult::pass_through(left, right));
    }
    if left_next == right_next {
        return Ok(TransformResult::empty());
    }
    if left_prev != right_prev {
        return Err(AlgebraError::Conflict(format!(
            "field '{}' written from different previous values",
            field
        )));
    }

    match policy {
        FieldPolicy::Strict => Err(AlgebraError::Conflict(format!(
            "field '{}' set concurrently to {:?} and {:?}",
            field, left_next, right_next
        ))),
        FieldPolicy::GreaterWins if left_next > right_next => Ok(TransformResult::new(
            Vec::new(),
            vec![DocumentOp::set_field(field.clone(), right_next.clone(), left_next.clone())],
        )),
        FieldPolicy::GreaterWins => Ok(TransformResult::new(
            vec![DocumentOp::set_field(field.clone(), left_next.clone(), right_next.clone())],
            Vec::new(),
        )),
    }
}

/// The rule set for `DocumentOp` under the given field policy.
pub fn document_system(policy: FieldPolicy) -> Result<OtSystem<DocumentOp>, AlgebraError> {
    use OpKind::*;

    OtSystem::builder()
        .with_empty_predicate(Insert, |_| false)
        .with_empty_predicate(Remove, |_| false)
        .with_empty_predicate(SetField, |op| {
            matches!(op, DocumentOp::SetField { prev, next, .. } if prev == next)
        })
        .with_invert(Insert, |op| match op {
            DocumentOp::Insert(element) => vec![DocumentOp::Remove(element.clone())],
            other => vec![other.clone()],
        })
        .with_invert(Remove, |op| match op {
            DocumentOp::Remove(element) => vec![DocumentOp::Insert(element.clone())],
            other => vec![other.clone()],
        })
        .with_invert(SetField, |op| match op {
            DocumentOp::SetField { field, prev, next } => {
                vec![DocumentOp::set_field(field.clone(), next.clone(), prev.clone())]
            }
            other => vec![other.clone()],
        })
        .with_transform(Insert, Insert, transform_elements)
        .with_transform(Insert, Remove, transform_elements)
        .with_transform(Remove, Remove, transform_elements)
        .with_transform(Insert, SetField, |l, r| Ok(TransformResult::pass_through(l, r)))
        .with_transform(Remove, SetField, |l, r| Ok(TransformResult::pass_through(l, r)))
        .with_transform(SetField, SetField, move |l, r| transform_fields(policy, l, r))
        .with_squash(Insert, Remove, |first, second| match (first, second) {
            (DocumentOp::Insert(a), DocumentOp::Remove(b)) if a == b => Squashed::Cancelled,
            _ => Squashed::Distinct,
        })
        .with_squash(Remove, Insert, |first, second| match (first, second) {
            (DocumentOp::Remove(a), DocumentOp::Insert(b)) if a == b => Squashed::Cancelled,
            _ => Squashed::Distinct,
        })
        .with_squash(SetField, SetField, |first, second| match (first, second) {
            (
                DocumentOp::SetField { field, prev, .. },
                DocumentOp::SetField {
                    field: second_field,
                    next,
                    ..
                },
            ) if field == second_field => {
                Squashed::Combined(DocumentOp::set_field(field.clone(), prev.clone(), next.clone()))
            }
            _ => Squashed::Distinct,
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::OtState;
    use crate::document::{DocumentState, Value};

    fn x() -> Value {
        Value::string("x")
    }

    fn y() -> Value {
        Value::string("y")
    }

    fn with(ops: &[DocumentOp]) -> DocumentState {
        let mut state = DocumentState::new();
        state.apply_all(ops);
        state
    }

    #[test]
    fn test_system_builds_for_both_policies() {
        assert!(document_system(FieldPolicy::Strict).is_ok());
        assert!(document_system(FieldPolicy::GreaterWins).is_ok());
    }

    #[test]
    fn test_concurrent_inserts_diamond() {
        let system = document_system(FieldPolicy::Strict).unwrap();
        let start = DocumentState::new();
        let left = [DocumentOp::insert(x())];
        let right = [DocumentOp::insert(y())];

        assert!(system.diamond_holds(&start, &left, &right).unwrap());
        let result = system.transform(&left, &right).unwrap();
        assert_eq!(result.left, vec![DocumentOp::insert(y())]);
        assert_eq!(result.right, vec![DocumentOp::insert(x())]);
    }

    #[test]
    fn test_same_insert_collapses() {
        let system = document_system(FieldPolicy::Strict).unwrap();
        let op = [DocumentOp::insert(x())];
        assert_eq!(system.transform(&op, &op).unwrap(), TransformResult::empty());
    }

    #[test]
    fn test_insert_remove_same_element_conflicts() {
        let system = document_system(FieldPolicy::GreaterWins).unwrap();
        let err = system
            .transform(&[DocumentOp::insert(x())], &[DocumentOp::remove(x())])
            .unwrap_err();
        assert!(matches!(err, AlgebraError::Conflict(_)));

        // and the mirrored order
        assert!(system
            .transform(&[DocumentOp::remove(x())], &[DocumentOp::insert(x())])
            .is_err());
    }

    #[test]
    fn test_strict_field_conflict() {
        let system = document_system(FieldPolicy::Strict).unwrap();
        let left = [DocumentOp::set_field("title", None, Some(Value::string("a")))];
        let right = [DocumentOp::set_field("title", None, Some(Value::string("b")))];
        assert!(matches!(
            system.transform(&left, &right),
            Err(AlgebraError::Conflict(_))
        ));
    }

    #[test]
    fn test_strict_allows_different_fields_and_equal_values() {
        let system = document_system(FieldPolicy::Strict).unwrap();
        let start = DocumentState::new();
        let a = [DocumentOp::set_field("a", None, Some(Value::int(1)))];
        let b = [DocumentOp::set_field("b", None, Some(Value::int(2)))];
        assert!(system.diamond_holds(&start, &a, &b).unwrap());
        assert_eq!(system.transform(&a, &a).unwrap(), TransformResult::empty());
    }

    #[test]
    fn test_greater_wins_converges() {
        let system = document_system(FieldPolicy::GreaterWins).unwrap();
        let start = with(&[DocumentOp::set_field("n", None, Some(Value::int(0)))]);
        let left = [
            DocumentOp::set_field("n", Some(Value::int(0)), Some(Value::int(5))),
            DocumentOp::insert(x()),
            DocumentOp::set_field("n", Some(Value::int(5)), Some(Value::int(2))),
        ];
        let right = [DocumentOp::set_field("n", Some(Value::int(0)), Some(Value::int(3)))];

        assert!(system.diamond_holds(&start, &left, &right).unwrap());
        assert!(system.diamond_holds(&start, &right, &left).unwrap());

        let result = system.transform(&left, &right).unwrap();
        let mut merged = start.clone();
        merged.apply_all(&right);
        merged.apply_all(&result.right);
        // 5 beats 3, then the left branch's own later write to 2 still applies
        assert_eq!(merged.field("n"), Some(&Value::int(2)));
        assert!(merged.contains(&x()));

        let single = system
            .transform(&left[..1], &right)
            .unwrap();
        assert!(single.left.is_empty());
        assert_eq!(
            single.right,
            vec![DocumentOp::set_field("n", Some(Value::int(3)), Some(Value::int(5)))]
        );
    }

    #[test]
    fn test_invert_restores() {
        let system = document_system(FieldPolicy::Strict).unwrap();
        let start = with(&[DocumentOp::insert(y())]);
        let ops = vec![
            DocumentOp::insert(x()),
            DocumentOp::remove(y()),
            DocumentOp::set_field("f", None, Some(Value::Null)),
        ];

        let mut state = start.clone();
        state.apply_all(&ops);
        state.apply_all(&system.invert_list(&ops).unwrap());
        assert_eq!(state, start);
    }

    #[test]
    fn test_squash_rules() {
        let system = document_system(FieldPolicy::Strict).unwrap();
        let ops = vec![
            DocumentOp::insert(x()),
            DocumentOp::set_field("f", None, Some(Value::int(1))),
            DocumentOp::set_field("f", Some(Value::int(1)), Some(Value::int(2))),
            DocumentOp::remove(y()),
            DocumentOp::insert(y()),
        ];
        let squashed = system.squash(&ops);
        assert_eq!(
            squashed,
            vec![
                DocumentOp::insert(x()),
                DocumentOp::set_field("f", None, Some(Value::int(2))),
            ]
        );

        let start = with(&[DocumentOp::insert(y())]);
        let mut a = start.clone();
        a.apply_all(&ops);
        let mut b = start;
        b.apply_all(&squashed);
        assert_eq!(a, b);
        assert_eq!(system.squash(&squashed), squashed);
    }

    #[test]
    fn test_noop_field_write_is_empty() {
        let system = document_system(FieldPolicy::Strict).unwrap();
        assert!(system.is_empty(&DocumentOp::set_field("f", Some(Value::int(1)), Some(Value::int(1)))));
        assert!(!system.is_empty(&DocumentOp::insert(x())));
    }
}
