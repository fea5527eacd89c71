//! Per-method forwarding
//!
//! [`CommonSubexpressionElimination`] analyzes one method body against a
//! [`SharedState`] on construction. The forwards it finds can be inspected
//! and are applied by [`patch`](CommonSubexpressionElimination::patch).

mod analysis;
mod patch;
mod values;

use crate::shared_state::SharedState;
use crate::stats::Stats;
use analysis::Analyzer;
use dexo_ir::{ControlFlowGraph, InsnId};
use dexo_util::{define_idx, FxHashMap, IndexVec};
use std::collections::BTreeSet;

pub use values::ValueId;

define_idx!(
    /// Interned set of earlier instructions
    EarlierSetId
);

/// `later` recomputes a value held after each instruction of `earlier`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Forward {
    pub earlier: EarlierSetId,
    pub later: InsnId,
}

pub struct CommonSubexpressionElimination<'a> {
    shared_state: &'a SharedState,
    cfg: &'a mut ControlFlowGraph,
    forwards: Vec<Forward>,
    earlier_insns: IndexVec<EarlierSetId, BTreeSet<InsnId>>,
    stats: Stats,
}

impl<'a> CommonSubexpressionElimination<'a> {
    pub fn new(shared_state: &'a SharedState, cfg: &'a mut ControlFlowGraph) -> Self {
        let outcome = Analyzer::new(shared_state, cfg).run(cfg);

        let mut earlier_insns: IndexVec<EarlierSetId, BTreeSet<InsnId>> = IndexVec::new();
        let mut interned: FxHashMap<BTreeSet<InsnId>, EarlierSetId> = FxHashMap::default();
        let forwards = outcome
            .forwards
            .into_iter()
            .map(|found| {
                let earlier = *interned
                    .entry(found.earlier)
                    .or_insert_with_key(|set| earlier_insns.push(set.clone()));
                Forward {
                    earlier,
                    later: found.later,
                }
            })
            .collect();

        let stats = Stats {
            max_value_ids: outcome.value_ids,
            methods_using_other_tracked_location_bit: usize::from(outcome.uses_other_location_bit),
            max_iterations: outcome.iterations,
            ..Stats::default()
        };

        Self {
            shared_state,
            cfg,
            forwards,
            earlier_insns,
            stats,
        }
    }

    pub fn forwards(&self) -> &[Forward] {
        &self.forwards
    }

    pub fn earlier_insns(&self, set: EarlierSetId) -> &BTreeSet<InsnId> {
        &self.earlier_insns[set]
    }

    pub fn shared_state(&self) -> &SharedState {
        self.shared_state
    }

    pub fn get_stats(&self) -> &Stats {
        &self.stats
    }

    pub fn into_stats(self) -> Stats {
        self.stats
    }
}
