/// Outcome of transforming two concurrent diff lists.
///
/// `left` is applied on top of the left branch, `right` on top of the right
/// branch. Both lead to the same merged state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransformResult<D> {
    pub left: Vec<D>,
    pub right: Vec<D>,
}

impl<D> TransformResult<D> {
    pub fn new(left: Vec<D>, right: Vec<D>) -> Self {
        Self { left, right }
    }

    /// Both branches already reached the merged state.
    pub fn empty() -> Self {
        Self {
            left: Vec::new(),
            right: Vec::new(),
        }
    }

    /// Exchange the sides; used to derive the mirrored rule of a registered pair.
    pub fn swap(self) -> Self {
        Self {
            left: self.right,
            right: self.left,
        }
    }
}

impl<D: Clone> TransformResult<D> {
    /// Concurrent diffs that commute: each side applies the other's diff unchanged.
    pub fn pass_through(left: &D, right: &D) -> Self {
        Self {
            left: vec![right.clone()],
            right: vec![left.clone()],
        }
    }
}

/// Outcome of squashing two consecutive diffs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Squashed<D> {
    /// Replace both with one diff.
    Combined(D),
    /// The second undoes the first; drop both.
    Cancelled,
    /// No simplification; keep both.
    Distinct,
}
