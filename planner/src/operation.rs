//! An operation pairs what a step needs with what it does.

use crate::attributes::AttributeSet;
use std::fmt;

/// Dependencies that must hold in a state for the operation to run, and the
/// changes it makes to that state.
///
/// Dependencies express a *precondition*, not an invariant: after `apply`
/// the state may no longer satisfy them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Operation {
    pub dependencies: AttributeSet,
    pub changes: AttributeSet,
}

impl Operation {
    pub fn new(dependencies: AttributeSet, changes: AttributeSet) -> Operation {
        Operation { dependencies, changes }
    }

    /// Whether the operation can run in `state`.
    pub fn valid(&self, state: &AttributeSet) -> bool {
        state.contains_all(&self.dependencies)
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Apply the changes to `state` in place.
    pub fn modify(&self, state: &mut AttributeSet) {
        state.apply_changes(&self.changes);
    }

    /// A fresh state with the changes applied.
    pub fn apply(&self, state: &AttributeSet) -> AttributeSet {
        let mut result = state.clone();
        self.modify(&mut result);
        result
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] => [{}]", self.dependencies, self.changes)
    }
}
