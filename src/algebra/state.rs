/// A materialized state that diffs of type `D` apply to.
///
/// `apply` is infallible: diffs reaching a state have already been
/// transformed against everything concurrent with them.
pub trait OtState<D> {
    /// Reset to the empty state.
    fn init(&mut self);

    fn apply(&mut self, diff: &D);

    /// Rewrite a locally made diff so it describes exactly what applying it
    /// here changes, or `None` if it changes nothing. Diffs entering the
    /// history must be exact for inversion and squashing to hold.
    fn prepare(&self, diff: D) -> Option<D> {
        Some(diff)
    }

    fn apply_all(&mut self, diffs: &[D]) {
        for diff in diffs {
            self.apply(diff);
        }
    }
}
