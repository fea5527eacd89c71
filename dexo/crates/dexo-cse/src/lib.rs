//! dexo-cse - Common-subexpression elimination
//!
//! Finds instructions whose result is already held in some register on every
//! path reaching them and replaces them with moves:
//!
//! - [`SharedState`]: whole-program method summaries, pure-method allowlist,
//!   barrier classification
//! - [`CommonSubexpressionElimination`]: per-method availability analysis and
//!   patching
//! - [`Location`] / [`Barrier`]: memory regions and the instructions writing them
//! - [`Stats`]: counters merged across methods

pub mod barrier;
pub mod engine;
pub mod location;
pub mod shared_state;
pub mod stats;
#[cfg(test)]
mod tests;

pub use barrier::{Barrier, BarrierTarget};
pub use engine::{CommonSubexpressionElimination, EarlierSetId, Forward};
pub use location::{ArrayKind, Location, LocationSet};
pub use shared_state::SharedState;
pub use stats::{MethodBarriersStats, Stats};
