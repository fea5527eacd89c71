//! Whole-program read/write summaries
//!
//! Every method with code gets a [`MethodSummary`]: the locations it may
//! write, the locations it may read, and whether its result can differ
//! between two calls with equal arguments and equal memory. Summaries are
//! seeded from each body in parallel, then propagated from callees to
//! callers over call and override edges until nothing changes.

use crate::location::{Location, LocationSet};
use crate::stats::MethodBarriersStats;
use dexo_ir::{
    ClassHierarchy, DexMethod, FieldRef, Instruction, MethodId, MethodRef, MethodSearch, Opcode,
    OverrideGraph, Scope, Terminator, TypeRef,
};
use dexo_util::{FxHashSet, Idx, IndexVec};
use rayon::prelude::*;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct MethodSummary {
    pub writes: LocationSet,
    pub reads: LocationSet,
    pub nondeterministic: bool,
}

impl MethodSummary {
    fn general() -> Self {
        let mut summary = Self::default();
        summary.writes.insert(Location::GeneralMemoryBarrier);
        summary.reads.insert(Location::GeneralMemoryBarrier);
        summary.nondeterministic = true;
        summary
    }

    fn join(&mut self, other: &MethodSummary) {
        self.writes.extend(other.writes.iter().cloned());
        self.reads.extend(other.reads.iter().cloned());
        self.nondeterministic |= other.nondeterministic;
        self.normalize();
    }

    /// A set containing the general location needs nothing else
    fn normalize(&mut self) {
        for set in [&mut self.writes, &mut self.reads] {
            if set.len() > 1 && set.contains(&Location::GeneralMemoryBarrier) {
                set.clear();
                set.insert(Location::GeneralMemoryBarrier);
            }
        }
    }
}

/// Location of a field access: the resolved declaration, or the general
/// location when the field is volatile or cannot be resolved
pub(crate) fn field_location(hierarchy: &ClassHierarchy, field: &FieldRef) -> Location {
    match hierarchy.resolve_field(field) {
        Some(resolved) if !resolved.access.is_volatile() => Location::Field(resolved.reference),
        _ => Location::GeneralMemoryBarrier,
    }
}

/// Location read or written by a field or array access
pub(crate) fn access_location(hierarchy: &ClassHierarchy, insn: &Instruction) -> Option<Location> {
    let opcode = insn.opcode();
    if opcode.is_aget() || opcode.is_aput() {
        return Location::for_array_opcode(opcode);
    }
    if opcode.is_field_get() || opcode.is_field_put() {
        return Some(match insn.get_field() {
            Some(field) => field_location(hierarchy, field),
            None => Location::GeneralMemoryBarrier,
        });
    }
    None
}

/// Methods an invoke may execute
///
/// `None` when some target is unknown: unresolvable, without code in scope
/// and not abstract, or reached by a receiver type whose implementation is
/// outside the scope. Other abstract declarations never run and are left
/// out. With `exact` set, a virtual call is narrowed to the implementation
/// for that receiver type.
pub(crate) fn invoke_targets(
    hierarchy: &ClassHierarchy,
    overrides: &OverrideGraph,
    insn: &Instruction,
    exact: Option<&TypeRef>,
) -> Option<Vec<MethodId>> {
    let method = insn.get_method()?;
    let search = MethodSearch::for_opcode(insn.opcode())?;

    let narrowed = match exact.filter(|_| search.is_dynamic()) {
        Some(ty) if !hierarchy.contains(ty) || hierarchy.may_dispatch_out_of_scope(ty, method) => {
            return None;
        },
        Some(ty) => hierarchy.resolve_virtual_from(ty, method),
        None => None,
    };
    let candidates = match narrowed {
        // the receiver's implementation lives outside the scope
        Some(target) if hierarchy.method(target).access.is_abstract() => return None,
        Some(target) => vec![target],
        None => {
            let resolved = hierarchy.resolve_method(method, search)?;
            let mut candidates = vec![resolved];
            if search.is_dynamic() {
                if overrides.is_open(resolved) {
                    return None;
                }
                candidates.extend_from_slice(overrides.overriders(resolved));
            }
            candidates
        },
    };

    let mut targets = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let info = hierarchy.method(candidate);
        if info.has_code {
            targets.push(candidate);
        } else if !info.access.is_abstract() {
            return None;
        }
    }
    Some(targets)
}

/// Direct effects of one body plus the methods it calls
struct Seed {
    summary: MethodSummary,
    callees: Vec<MethodId>,
}

pub(crate) struct SummaryContext<'a> {
    pub hierarchy: &'a ClassHierarchy,
    pub overrides: &'a OverrideGraph,
    pub pure_methods: &'a FxHashSet<MethodRef>,
    pub safe_methods: &'a FxHashSet<MethodRef>,
}

impl SummaryContext<'_> {
    fn seed(&self, method: &DexMethod) -> Option<Seed> {
        let cfg = method.code.as_ref()?;
        let mut summary = MethodSummary::default();
        let mut callees = Vec::new();

        for (_, insn) in cfg.instructions() {
            let opcode = insn.opcode();
            if opcode.is_field_get() || opcode.is_aget() {
                match access_location(self.hierarchy, insn) {
                    Some(Location::GeneralMemoryBarrier) | None => {
                        summary.reads.insert(Location::GeneralMemoryBarrier);
                        summary.writes.insert(Location::GeneralMemoryBarrier);
                    },
                    Some(location) => {
                        summary.reads.insert(location);
                    },
                }
            } else if opcode.is_field_put() || opcode.is_aput() {
                let location = access_location(self.hierarchy, insn)
                    .unwrap_or(Location::GeneralMemoryBarrier);
                summary.writes.insert(location);
            } else if opcode.is_monitor() {
                summary.writes.insert(Location::GeneralMemoryBarrier);
                summary.nondeterministic = true;
            } else if opcode == Opcode::FillArrayData {
                summary.writes.insert(Location::GeneralMemoryBarrier);
            } else if opcode.is_invoke() {
                self.seed_invoke(insn, &mut summary, &mut callees);
            } else if matches!(
                opcode,
                Opcode::NewInstance | Opcode::NewArray | Opcode::FilledNewArray | Opcode::MoveException
            ) {
                summary.nondeterministic = true;
            }
        }
        if cfg
            .blocks()
            .iter()
            .any(|block| matches!(block.terminator, Terminator::Throw { .. }))
        {
            summary.nondeterministic = true;
        }

        summary.normalize();
        callees.sort_unstable();
        callees.dedup();
        Some(Seed { summary, callees })
    }

    fn seed_invoke(&self, insn: &Instruction, summary: &mut MethodSummary, callees: &mut Vec<MethodId>) {
        let Some(method) = insn.get_method() else {
            return;
        };
        if self.pure_methods.contains(method) {
            return;
        }
        if self.safe_methods.contains(method) {
            summary.nondeterministic = true;
            return;
        }
        match invoke_targets(self.hierarchy, self.overrides, insn, None) {
            Some(targets) => callees.extend(targets),
            None => summary.join(&MethodSummary::general()),
        }
    }
}

pub(crate) struct Summaries {
    pub summaries: IndexVec<MethodId, Option<MethodSummary>>,
    pub iterations: usize,
    pub grown: usize,
}

/// Seed every method and propagate to a fixpoint
pub(crate) fn compute(ctx: &SummaryContext<'_>, scope: &Scope) -> Summaries {
    let seeds: IndexVec<MethodId, Option<Seed>> = scope
        .methods()
        .as_slice()
        .par_iter()
        .map(|method| ctx.seed(method))
        .collect::<Vec<_>>()
        .into_iter()
        .collect();

    let mut callers: IndexVec<MethodId, Vec<MethodId>> =
        IndexVec::from_fn_n(|_| Vec::new(), seeds.len());
    for (caller, seed) in seeds.iter_enumerated() {
        for callee in seed.iter().flat_map(|seed| seed.callees.iter()) {
            callers[*callee].push(caller);
        }
    }

    let mut summaries: IndexVec<MethodId, Option<MethodSummary>> = seeds
        .iter()
        .map(|seed| seed.as_ref().map(|seed| seed.summary.clone()))
        .collect();

    let mut worklist: Vec<MethodId> = seeds
        .iter_enumerated()
        .filter(|(_, seed)| seed.is_some())
        .map(|(id, _)| id)
        .collect();
    let mut queued = vec![true; seeds.len()];
    let mut iterations = 0;

    while !worklist.is_empty() {
        iterations += 1;
        let mut next = Vec::new();
        for id in worklist {
            queued[id.index()] = false;
            let Some(seed) = &seeds[id] else {
                continue;
            };
            let mut summary = seed.summary.clone();
            for callee in &seed.callees {
                match &summaries[*callee] {
                    Some(callee_summary) => summary.join(callee_summary),
                    None => summary.join(&MethodSummary::general()),
                }
            }
            if summaries[id].as_ref() != Some(&summary) {
                summaries[id] = Some(summary);
                for caller in &callers[id] {
                    if !queued[caller.index()] {
                        queued[caller.index()] = true;
                        next.push(*caller);
                    }
                }
            }
        }
        next.sort_unstable();
        worklist = next;
    }

    let grown = seeds
        .iter()
        .zip(summaries.iter())
        .filter(|(seed, summary)| match (seed, summary) {
            (Some(seed), Some(summary)) => seed.summary.writes != summary.writes,
            _ => false,
        })
        .count();

    Summaries {
        summaries,
        iterations,
        grown,
    }
}

impl Summaries {
    pub fn stats(&self) -> MethodBarriersStats {
        MethodBarriersStats {
            inlined_barriers_iterations: self.iterations,
            inlined_barriers_into_methods: self.grown,
            conditionally_pure_methods: 0,
        }
    }
}
