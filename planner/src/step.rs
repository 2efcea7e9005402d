//! A test step is an operation with the metadata needed to plan and run it.

use crate::attributes::AttributeSet;
use crate::operation::Operation;
use std::fmt;

/// A reusable test step: what it needs, what it does, and what running it
/// costs.
///
/// Steps are never mutated once stored, except for the `required` flag.
/// Identity for dedup purposes is the `(short, dependencies)` pair, so a
/// multiplexed copy with rewritten dependencies is a distinct step even
/// though it shares its short identifier with its siblings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestStep {
    /// Short identifier, unique per dependency set.
    pub short: String,
    /// Human instructions for running the step by hand.
    pub description: String,
    /// Opaque automation script; empty when the step is manual.
    pub script: String,
    pub cost: u32,
    pub required: bool,
    pub op: Operation,
}

impl TestStep {
    pub fn new(short: impl Into<String>, op: Operation) -> TestStep {
        TestStep {
            short: short.into(),
            description: String::new(),
            script: String::new(),
            cost: 0,
            required: false,
            op,
        }
    }

    pub fn dependencies(&self) -> &AttributeSet {
        &self.op.dependencies
    }

    pub fn changes(&self) -> &AttributeSet {
        &self.op.changes
    }

    /// Whether `other` would replace this step when added to a store.
    pub fn same_identity(&self, other: &TestStep) -> bool {
        self.short == other.short && self.op.dependencies == other.op.dependencies
    }
}

impl fmt::Display for TestStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (cost {}): {}", self.short, self.cost, self.op)
    }
}
