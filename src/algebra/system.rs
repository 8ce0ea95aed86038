use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use super::{AlgebraError, OtState, Squashed, TransformResult};

/// A diff type that an `OtSystem` can hold rules for.
///
/// Rules are dispatched on `Kind`, a cheap discriminant of the diff.
pub trait Diff: Clone + fmt::Debug + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;

    /// Every kind this diff type can take. `build` checks rule coverage against it.
    fn kinds() -> &'static [Self::Kind];
}

type EmptyRule<D> = Box<dyn Fn(&D) -> bool + Send + Sync>;
type InvertRule<D> = Box<dyn Fn(&D) -> Vec<D> + Send + Sync>;
type TransformRule<D> = Arc<dyn Fn(&D, &D) -> Result<TransformResult<D>, AlgebraError> + Send + Sync>;
type SquashRule<D> = Box<dyn Fn(&D, &D) -> Squashed<D> + Send + Sync>;

/// Collects rules before they are frozen into an `OtSystem`.
pub struct OtSystemBuilder<D: Diff> {
    empty: HashMap<D::Kind, EmptyRule<D>>,
    invert: HashMap<D::Kind, InvertRule<D>>,
    transform: HashMap<(D::Kind, D::Kind), TransformRule<D>>,
    squash: HashMap<(D::Kind, D::Kind), SquashRule<D>>,
}

impl<D: Diff> OtSystemBuilder<D> {
    fn new() -> Self {
        Self {
            empty: HashMap::new(),
            invert: HashMap::new(),
            transform: HashMap::new(),
            squash: HashMap::new(),
        }
    }

    pub fn with_empty_predicate<F>(mut self, kind: D::Kind, rule: F) -> Self
    where
        F: Fn(&D) -> bool + Send + Sync + 'static,
    {
        self.empty.insert(kind, Box::new(rule));
        self
    }

    pub fn with_invert<F>(mut self, kind: D::Kind, rule: F) -> Self
    where
        F: Fn(&D) -> Vec<D> + Send + Sync + 'static,
    {
        self.invert.insert(kind, Box::new(rule));
        self
    }

    /// Register the transform for `(left, right)`.
    ///
    /// The mirrored pair `(right, left)` is derived by swapping arguments and
    /// results, so each unordered pair of kinds needs one registration.
    pub fn with_transform<F>(mut self, left: D::Kind, right: D::Kind, rule: F) -> Self
    where
        F: Fn(&D, &D) -> Result<TransformResult<D>, AlgebraError> + Send + Sync + 'static,
    {
        let rule: TransformRule<D> = Arc::new(rule);
        if left != right {
            let forward = Arc::clone(&rule);
            self.transform.insert(
                (right, left),
                Arc::new(move |r: &D, l: &D| forward(l, r).map(TransformResult::swap)),
            );
        }
        self.transform.insert((left, right), rule);
        self
    }

    /// Register how `first` followed by `second` simplifies. Pairs without
    /// a rule are kept as they are.
    pub fn with_squash<F>(mut self, first: D::Kind, second: D::Kind, rule: F) -> Self
    where
        F: Fn(&D, &D) -> Squashed<D> + Send + Sync + 'static,
    {
        self.squash.insert((first, second), Box::new(rule));
        self
    }

    /// Freeze the rules. Every kind needs an empty predicate and an inverse,
    /// and every ordered pair of kinds needs a transform.
    pub fn build(self) -> Result<OtSystem<D>, AlgebraError> {
        let mut missing = Vec::new();
        for kind in D::kinds() {
            if !self.empty.contains_key(kind) {
                missing.push(format!("empty predicate for {:?}", kind));
            }
            if !self.invert.contains_key(kind) {
                missing.push(format!("invert for {:?}", kind));
            }
            for other in D::kinds() {
                if !self.transform.contains_key(&(*kind, *other)) {
                    missing.push(format!("transform {:?} x {:?}", kind, other));
                }
            }
        }
        if !missing.is_empty() {
            return Err(AlgebraError::MissingRule(missing.join(", ")));
        }

        log::debug!(
            "OT system ready: {} kinds, {} transform rules, {} squash rules",
            D::kinds().len(),
            self.transform.len(),
            self.squash.len()
        );

        Ok(OtSystem {
            empty: self.empty,
            invert: self.invert,
            transform: self.transform,
            squash: self.squash,
        })
    }
}

/// Immutable rule registry for one diff type. Share it behind an `Arc`.
pub struct OtSystem<D: Diff> {
    empty: HashMap<D::Kind, EmptyRule<D>>,
    invert: HashMap<D::Kind, InvertRule<D>>,
    transform: HashMap<(D::Kind, D::Kind), TransformRule<D>>,
    squash: HashMap<(D::Kind, D::Kind), SquashRule<D>>,
}

impl<D: Diff> OtSystem<D> {
    pub fn builder() -> OtSystemBuilder<D> {
        OtSystemBuilder::new()
    }

    /// True if applying `diff` leaves every state unchanged.
    pub fn is_empty(&self, diff: &D) -> bool {
        self.empty
            .get(&diff.kind())
            .map_or(false, |rule| rule(diff))
    }

    /// Diffs that undo `diff`.
    pub fn invert(&self, diff: &D) -> Result<Vec<D>, AlgebraError> {
        let rule = self
            .invert
            .get(&diff.kind())
            .ok_or_else(|| AlgebraError::MissingRule(format!("invert for {:?}", diff.kind())))?;
        Ok(rule(diff))
    }

    /// Undo a whole list: inverses of the diffs in reverse order.
    pub fn invert_list(&self, diffs: &[D]) -> Result<Vec<D>, AlgebraError> {
        let mut inverted = Vec::with_capacity(diffs.len());
        for diff in diffs.iter().rev() {
            inverted.extend(self.invert(diff)?);
        }
        Ok(inverted)
    }

    pub fn transform_pair(&self, left: &D, right: &D) -> Result<TransformResult<D>, AlgebraError> {
        let rule = self
            .transform
            .get(&(left.kind(), right.kind()))
            .ok_or_else(|| {
                AlgebraError::MissingRule(format!(
                    "transform {:?} x {:?}",
                    left.kind(),
                    right.kind()
                ))
            })?;
        rule(left, right)
    }

    /// Transform two concurrent diff lists issued on the same state.
    ///
    /// Each left diff is pushed through the whole right list in turn; the
    /// right list it leaves behind is what the next left diff meets.
    pub fn transform(&self, left: &[D], right: &[D]) -> Result<TransformResult<D>, AlgebraError> {
        match (left, right) {
            ([], []) => Ok(TransformResult::empty()),
            ([], _) => Ok(TransformResult::new(right.to_vec(), Vec::new())),
            (_, []) => Ok(TransformResult::new(Vec::new(), left.to_vec())),
            ([single], [first, rest @ ..]) => {
                let step = self.transform_pair(single, first)?;
                let tail = self.transform(&step.right, rest)?;
                let mut left_out = step.left;
                left_out.extend(tail.left);
                Ok(TransformResult::new(left_out, tail.right))
            }
            ([first, rest @ ..], _) => {
                let head = self.transform(std::slice::from_ref(first), right)?;
                let tail = self.transform(rest, &head.left)?;
                let mut right_out = head.right;
                right_out.extend(tail.right);
                Ok(TransformResult::new(tail.left, right_out))
            }
        }
    }

    /// Check the diamond property of `transform(left, right)` from `start`.
    pub fn diamond_holds<S>(&self, start: &S, left: &[D], right: &[D]) -> Result<bool, AlgebraError>
    where
        S: OtState<D> + Clone + PartialEq,
    {
        let result = self.transform(left, right)?;

        let mut via_left = start.clone();
        via_left.apply_all(left);
        via_left.apply_all(&result.left);

        let mut via_right = start.clone();
        via_right.apply_all(right);
        via_right.apply_all(&result.right);

        Ok(via_left == via_right)
    }

    pub fn squash_pair(&self, first: &D, second: &D) -> Squashed<D> {
        match self.squash.get(&(first.kind(), second.kind())) {
            Some(rule) => rule(first, second),
            None => Squashed::Distinct,
        }
    }

    /// Simplify a diff list without changing its effect.
    ///
    /// Empty diffs are dropped and adjacent pairs are combined until no
    /// neighbours simplify further, so squashing a squashed list returns it
    /// unchanged.
    pub fn squash(&self, diffs: &[D]) -> Vec<D> {
        let mut stack: Vec<D> = Vec::with_capacity(diffs.len());
        for diff in diffs {
            if self.is_empty(diff) {
                continue;
            }
            let mut current = diff.clone();
            loop {
                let Some(top) = stack.last() else {
                    stack.push(current);
                    break;
                };
                match self.squash_pair(top, &current) {
                    Squashed::Combined(combined) => {
                        stack.pop();
                        if self.is_empty(&combined) {
                            break;
                        }
                        current = combined;
                    }
                    Squashed::Cancelled => {
                        stack.pop();
                        break;
                    }
                    Squashed::Distinct => {
                        stack.push(current);
                        break;
                    }
                }
            }
        }
        stack
    }
}

impl<D: Diff> fmt::Debug for OtSystem<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtSystem")
            .field("kinds", &D::kinds())
            .field("transform_rules", &self.transform.len())
            .field("squash_rules", &self.squash.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Integer register: relative adds and absolute sets.
    #[derive(Clone, Debug, PartialEq)]
    enum CounterOp {
        Add(i64),
        Set { prev: i64, next: i64 },
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum CounterKind {
        Add,
        Set,
    }

    impl Diff for CounterOp {
        type Kind = CounterKind;

        fn kind(&self) -> CounterKind {
            match self {
                CounterOp::Add(_) => CounterKind::Add,
                CounterOp::Set { .. } => CounterKind::Set,
            }
        }

        fn kinds() -> &'static [CounterKind] {
            &[CounterKind::Add, CounterKind::Set]
        }
    }

    #[derive(Clone, Default, PartialEq)]
    struct Counter(i64);

    impl OtState<CounterOp> for Counter {
        fn init(&mut self) {
            self.0 = 0;
        }

        fn apply(&mut self, diff: &CounterOp) {
            match diff {
                CounterOp::Add(n) => self.0 += n,
                CounterOp::Set { next, .. } => self.0 = *next,
            }
        }
    }

    fn builder() -> OtSystemBuilder<CounterOp> {
        use CounterKind::*;
        OtSystem::builder()
            .with_empty_predicate(Add, |d| matches!(d, CounterOp::Add(0)))
            .with_empty_predicate(Set, |d| matches!(d, CounterOp::Set { prev, next } if prev == next))
            .with_invert(Add, |d| match d {
                CounterOp::Add(n) => vec![CounterOp::Add(-n)],
                other => vec![other.clone()],
            })
            .with_invert(Set, |d| match d {
                CounterOp::Set { prev, next } => vec![CounterOp::Set { prev: *next, next: *prev }],
                other => vec![other.clone()],
            })
            .with_transform(Add, Add, |l, r| Ok(TransformResult::pass_through(l, r)))
            .with_transform(Add, Set, |l, r| match (l, r) {
                (CounterOp::Add(n), CounterOp::Set { prev, next }) => Ok(TransformResult::new(
                    vec![CounterOp::Set { prev: prev + n, next: *next }],
                    vec![],
                )),
                _ => Err(AlgebraError::Conflict("kind mismatch".into())),
            })
            .with_transform(Set, Set, |l, r| match (l, r) {
                (CounterOp::Set { next: a, .. }, CounterOp::Set { next: b, .. }) => {
                    if a == b {
                        Ok(TransformResult::empty())
                    } else if a > b {
                        Ok(TransformResult::new(vec![], vec![CounterOp::Set { prev: *b, next: *a }]))
                    } else {
                        Ok(TransformResult::new(vec![CounterOp::Set { prev: *a, next: *b }], vec![]))
                    }
                }
                _ => Err(AlgebraError::Conflict("kind mismatch".into())),
            })
            .with_squash(Add, Add, |a, b| match (a, b) {
                (CounterOp::Add(x), CounterOp::Add(y)) if x + y == 0 => Squashed::Cancelled,
                (CounterOp::Add(x), CounterOp::Add(y)) => Squashed::Combined(CounterOp::Add(x + y)),
                _ => Squashed::Distinct,
            })
            .with_squash(Set, Set, |a, b| match (a, b) {
                (CounterOp::Set { prev, .. }, CounterOp::Set { next, .. }) => {
                    Squashed::Combined(CounterOp::Set { prev: *prev, next: *next })
                }
                _ => Squashed::Distinct,
            })
            .with_squash(Set, Add, |a, b| match (a, b) {
                (CounterOp::Set { prev, next }, CounterOp::Add(n)) => {
                    Squashed::Combined(CounterOp::Set { prev: *prev, next: next + n })
                }
                _ => Squashed::Distinct,
            })
    }

    fn system() -> OtSystem<CounterOp> {
        builder().build().unwrap()
    }

    fn run(start: i64, diffs: &[CounterOp]) -> i64 {
        let mut state = Counter(start);
        state.apply_all(diffs);
        state.0
    }

    fn assert_diamond(start: i64, left: &[CounterOp], right: &[CounterOp]) {
        assert!(
            system().diamond_holds(&Counter(start), left, right).unwrap(),
            "left={:?} right={:?}",
            left,
            right
        );
    }

    #[test]
    fn test_build_reports_missing_rules() {
        let err = OtSystem::<CounterOp>::builder()
            .with_empty_predicate(CounterKind::Add, |_| false)
            .build()
            .unwrap_err();
        match err {
            AlgebraError::MissingRule(msg) => {
                assert!(msg.contains("empty predicate for Set"));
                assert!(msg.contains("invert for Add"));
                assert!(msg.contains("transform Set x Add"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_mirrored_rule_is_derived() {
        let system = system();
        let set = CounterOp::Set { prev: 0, next: 10 };
        let add = CounterOp::Add(3);

        let forward = system.transform_pair(&add, &set).unwrap();
        let mirrored = system.transform_pair(&set, &add).unwrap();
        assert_eq!(mirrored, forward.swap());
    }

    #[test]
    fn test_pairwise_diamond() {
        use CounterOp::*;
        assert_diamond(0, &[Add(2)], &[Add(5)]);
        assert_diamond(1, &[Add(2)], &[Set { prev: 1, next: 9 }]);
        assert_diamond(1, &[Set { prev: 1, next: 9 }], &[Add(2)]);
        assert_diamond(1, &[Set { prev: 1, next: 4 }], &[Set { prev: 1, next: 9 }]);
        assert_diamond(1, &[Set { prev: 1, next: 4 }], &[Set { prev: 1, next: 4 }]);
    }

    #[test]
    fn test_list_diamond() {
        use CounterOp::*;
        let left = vec![Add(1), Set { prev: 1, next: 7 }, Add(2)];
        let right = vec![Add(5), Add(-2), Set { prev: 3, next: 2 }];
        assert_diamond(0, &left, &right);
        assert_diamond(0, &right, &left);
        assert_diamond(0, &left, &[]);
        assert_diamond(0, &[], &right);
    }

    #[test]
    fn test_empty_sides() {
        use CounterOp::*;
        let system = system();
        let ops = vec![Add(1), Add(2)];

        let r = system.transform(&[], &ops).unwrap();
        assert_eq!(r.left, ops);
        assert!(r.right.is_empty());

        let r = system.transform(&ops, &[]).unwrap();
        assert!(r.left.is_empty());
        assert_eq!(r.right, ops);

        assert_eq!(system.transform(&[], &[]).unwrap(), TransformResult::empty());
    }

    #[test]
    fn test_invert_list_undoes() {
        use CounterOp::*;
        let system = system();
        let diffs = vec![Add(4), Set { prev: 4, next: 10 }, Add(-3)];
        let mut state = Counter(0);
        state.apply_all(&diffs);
        state.apply_all(&system.invert_list(&diffs).unwrap());
        assert_eq!(state.0, 0);
    }

    #[test]
    fn test_squash_preserves_effect() {
        use CounterOp::*;
        let system = system();
        let diffs = vec![Add(1), Add(2), Set { prev: 3, next: 8 }, Add(2), Add(0), Set { prev: 10, next: 1 }];
        let squashed = system.squash(&diffs);
        assert_eq!(squashed, vec![Add(3), Set { prev: 3, next: 1 }]);
        assert_eq!(run(5, &diffs), run(5, &squashed));
    }

    #[test]
    fn test_squash_is_idempotent() {
        use CounterOp::*;
        let system = system();
        let diffs = vec![Add(1), Set { prev: 1, next: 2 }, Add(-1), Add(4), Set { prev: 5, next: 5 }];
        let once = system.squash(&diffs);
        assert_eq!(system.squash(&once), once);
    }

    #[test]
    fn test_squash_cancellation_and_empty() {
        use CounterOp::*;
        let system = system();
        assert!(system.squash(&[Add(3), Add(-3)]).is_empty());
        assert!(system.squash(&[Add(0), Set { prev: 2, next: 2 }]).is_empty());
        // Combined to an empty set
        assert!(system.squash(&[Set { prev: 1, next: 4 }, Set { prev: 4, next: 1 }]).is_empty());
    }

    #[test]
    fn test_unregistered_squash_pair_is_distinct() {
        use CounterOp::*;
        let system = system();
        assert_eq!(system.squash_pair(&Add(1), &Set { prev: 1, next: 2 }), Squashed::Distinct);
    }
}
