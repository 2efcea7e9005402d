//! Compiles an ordered, cost-minimised test pass from a library of reusable
//! test steps and an explicit starting world-state.
//!
//! Each step declares preconditions (attributes required or forbidden in the
//! current state) and effects (attributes added or removed). Steps flagged
//! *required* must all appear in the produced plan; non-required helper steps
//! are inserted wherever they make the plan cheaper or feasible.
//!
//! Planning is a pure function of its inputs: the same [`StepStore`] and
//! initial state always yield the same [`Plan`].

pub mod attributes;
pub mod operation;
pub mod parsing;
pub mod session;
pub mod solve;
pub mod step;
pub mod store;

pub use attributes::{Attribute, AttributeSet};
pub use operation::Operation;
pub use parsing::{parse_step, ParseError, StepRecord};
pub use solve::{Cfg, Plan, Planner, PlannerError};
pub use step::TestStep;
pub use store::{StepId, StepStore};
