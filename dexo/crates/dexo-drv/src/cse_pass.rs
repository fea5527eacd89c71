//! Common-subexpression elimination as a pipeline pass

use crate::config::{CseConfig, PassConfig};
use crate::error::Result;
use crate::pass::{MetricsSink, Pass};
use dexo_cse::{CommonSubexpressionElimination, SharedState, Stats};
use dexo_ir::{MethodRef, Scope};
use rayon::prelude::*;

pub const CSE_PASS_NAME: &str = "CommonSubexpressionEliminationPass";

#[derive(Debug, Default)]
pub struct CommonSubexpressionEliminationPass {
    config: CseConfig,
    pure_methods: Vec<MethodRef>,
}

impl CommonSubexpressionEliminationPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> &CseConfig {
        &self.config
    }
}

impl Pass for CommonSubexpressionEliminationPass {
    fn name(&self) -> &'static str {
        CSE_PASS_NAME
    }

    fn bind_config(&mut self, config: &PassConfig) -> Result<()> {
        self.config = config.get(CSE_PASS_NAME)?;
        self.pure_methods = self.config.parse_pure_methods(CSE_PASS_NAME)?;
        Ok(())
    }

    fn run_pass(&mut self, scope: &mut Scope, metrics: &mut dyn MetricsSink) {
        let mut shared_state = SharedState::new(self.pure_methods.iter().cloned(), self.config.debug);
        let barrier_stats = shared_state.init_method_barriers(scope);
        let runtime_assertions = self.config.runtime_assertions;

        let stats: Stats = {
            let shared_state = &shared_state;
            scope
                .methods_mut()
                .as_mut_slice()
                .par_iter_mut()
                .filter_map(|method| {
                    let is_static = method.is_static();
                    let code = method.code.as_mut()?;
                    let reference = &method.reference;

                    let mut cse = CommonSubexpressionElimination::new(shared_state, code);
                    let changed = cse.patch(
                        is_static,
                        reference.owner(),
                        &reference.proto().params,
                        runtime_assertions,
                    );
                    if changed {
                        log::debug!("{}: {} forwards", reference, cse.forwards().len());
                    }
                    Some(cse.into_stats())
                })
                .sum()
        };
        shared_state.cleanup();

        log::info!(
            "{} instructions eliminated, {} results, {} stores and {} array lengths captured",
            stats.instructions_eliminated,
            stats.results_captured,
            stats.stores_captured,
            stats.array_lengths_captured
        );

        let counters = [
            ("results_captured", stats.results_captured),
            ("stores_captured", stats.stores_captured),
            ("array_lengths_captured", stats.array_lengths_captured),
            ("instructions_eliminated", stats.instructions_eliminated),
            ("max_value_ids", stats.max_value_ids),
            (
                "methods_using_other_tracked_location_bit",
                stats.methods_using_other_tracked_location_bit,
            ),
        ];
        for (name, value) in counters {
            metrics.incr_metric(name, value as i64);
        }
        for (opcode, count) in &stats.eliminated_opcodes {
            metrics.incr_metric(&format!("eliminated_opcode_{}", opcode.name()), *count as i64);
        }
        let supplementary = [
            ("max_iterations", stats.max_iterations),
            ("inlined_barriers_iterations", barrier_stats.inlined_barriers_iterations),
            ("inlined_barriers_into_methods", barrier_stats.inlined_barriers_into_methods),
            ("conditionally_pure_methods", barrier_stats.conditionally_pure_methods),
        ];
        for (name, value) in supplementary {
            metrics.incr_metric(name, value as i64);
        }
    }
}
