//! Statistics
//!
//! [`Stats`] is produced by every per-method run and merged by the caller.
//! Counters add; the `max_*` fields keep the maximum. Both merges are
//! associative and commutative with `Stats::default()` as identity, so
//! per-method results can be folded in any order, including from rayon
//! reductions.

use dexo_ir::Opcode;
use std::collections::BTreeMap;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Counters of one or more forwarding runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Earlier instructions whose result was copied into a temporary
    pub results_captured: usize,
    /// Earlier puts whose stored value was copied into a temporary
    pub stores_captured: usize,
    /// Earlier `new-array`s whose size was copied into a temporary
    pub array_lengths_captured: usize,
    /// Later instructions replaced by a move
    pub instructions_eliminated: usize,
    /// Eliminated instructions per opcode
    pub eliminated_opcodes: BTreeMap<Opcode, usize>,
    /// Most value numbers any one method needed
    pub max_value_ids: usize,
    /// Methods reading more distinct locations than there are mask bits
    pub methods_using_other_tracked_location_bit: usize,
    /// Most fixpoint rounds any one method needed
    pub max_iterations: usize,
}

impl AddAssign<&Stats> for Stats {
    fn add_assign(&mut self, that: &Stats) {
        self.results_captured += that.results_captured;
        self.stores_captured += that.stores_captured;
        self.array_lengths_captured += that.array_lengths_captured;
        self.instructions_eliminated += that.instructions_eliminated;
        for (opcode, count) in &that.eliminated_opcodes {
            *self.eliminated_opcodes.entry(*opcode).or_insert(0) += count;
        }
        self.max_value_ids = self.max_value_ids.max(that.max_value_ids);
        self.methods_using_other_tracked_location_bit +=
            that.methods_using_other_tracked_location_bit;
        self.max_iterations = self.max_iterations.max(that.max_iterations);
    }
}

impl AddAssign for Stats {
    fn add_assign(&mut self, that: Stats) {
        *self += &that;
    }
}

impl Add for Stats {
    type Output = Stats;

    fn add(mut self, that: Stats) -> Stats {
        self += &that;
        self
    }
}

impl Sum for Stats {
    fn sum<I: Iterator<Item = Stats>>(iter: I) -> Stats {
        iter.fold(Stats::default(), Add::add)
    }
}

/// Results of the whole-program summary computation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodBarriersStats {
    /// Worklist rounds until no summary changed
    pub inlined_barriers_iterations: usize,
    /// Methods whose summary grew through their callees
    pub inlined_barriers_into_methods: usize,
    /// Methods found to only read memory and compute deterministically
    pub conditionally_pure_methods: usize,
}
