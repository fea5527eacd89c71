//! Whole-program knowledge shared by all per-method runs
//!
//! [`SharedState`] is built once per pass. [`SharedState::init_method_barriers`]
//! computes per-method write summaries over the whole scope; after that the
//! state is only read, apart from the optional barrier log, so any number of
//! methods can be optimized against it in parallel.

mod summaries;

use crate::barrier::Barrier;
use crate::location::{Location, LocationSet};
use crate::stats::MethodBarriersStats;
use dexo_ir::{
    ClassHierarchy, Instruction, MethodId, MethodRef, MethodSearch, Opcode, OverrideGraph, Scope,
    TypeRef,
};
use dexo_util::{ConcurrentCounter, FxHashMap, FxHashSet, IndexVec};
use summaries::SummaryContext;

/// Methods without side effects whose result depends only on their
/// arguments
const DEFAULT_PURE_METHODS: &[&str] = &[
    "Ljava/lang/Boolean;.booleanValue:()Z",
    "Ljava/lang/Boolean;.valueOf:(Z)Ljava/lang/Boolean;",
    "Ljava/lang/Byte;.byteValue:()B",
    "Ljava/lang/Character;.charValue:()C",
    "Ljava/lang/Short;.shortValue:()S",
    "Ljava/lang/Integer;.intValue:()I",
    "Ljava/lang/Integer;.bitCount:(I)I",
    "Ljava/lang/Long;.longValue:()J",
    "Ljava/lang/Long;.bitCount:(J)I",
    "Ljava/lang/Float;.floatValue:()F",
    "Ljava/lang/Float;.floatToRawIntBits:(F)I",
    "Ljava/lang/Double;.doubleValue:()D",
    "Ljava/lang/Double;.doubleToRawLongBits:(D)J",
    "Ljava/lang/Math;.abs:(I)I",
    "Ljava/lang/Math;.abs:(J)J",
    "Ljava/lang/Math;.abs:(F)F",
    "Ljava/lang/Math;.abs:(D)D",
    "Ljava/lang/Math;.min:(II)I",
    "Ljava/lang/Math;.min:(JJ)J",
    "Ljava/lang/Math;.max:(II)I",
    "Ljava/lang/Math;.max:(JJ)J",
    "Ljava/lang/String;.length:()I",
    "Ljava/lang/String;.equals:(Ljava/lang/Object;)Z",
    "Ljava/lang/String;.hashCode:()I",
    "Ljava/lang/Object;.getClass:()Ljava/lang/Class;",
];

/// Methods whose side effects are confined to objects no tracked location
/// can observe, in addition to the pure methods
const DEFAULT_SAFE_METHODS: &[&str] = &[
    "Ljava/lang/Object;.<init>:()V",
    "Ljava/lang/Throwable;.<init>:()V",
    "Ljava/lang/Throwable;.<init>:(Ljava/lang/String;)V",
    "Ljava/lang/Exception;.<init>:()V",
    "Ljava/lang/Exception;.<init>:(Ljava/lang/String;)V",
    "Ljava/lang/RuntimeException;.<init>:()V",
    "Ljava/lang/RuntimeException;.<init>:(Ljava/lang/String;)V",
    "Ljava/lang/AssertionError;.<init>:(Ljava/lang/Object;)V",
];

/// Number of most frequent barriers written to the debug log on cleanup
const LOGGED_BARRIERS: usize = 20;

fn parse_builtin(list: &'static [&'static str]) -> impl Iterator<Item = MethodRef> {
    list.iter().map(|text| match text.parse() {
        Ok(method) => method,
        Err(err) => panic!("malformed built-in method {}: {}", text, err),
    })
}

/// Resolution structures, alive between initialization and cleanup
struct Program {
    hierarchy: ClassHierarchy,
    overrides: OverrideGraph,
}

pub struct SharedState {
    pure_methods: FxHashSet<MethodRef>,
    safe_methods: FxHashSet<MethodRef>,
    program: Option<Program>,
    /// `None` for methods without code
    write_summaries: IndexVec<MethodId, Option<LocationSet>>,
    conditionally_pure_methods: FxHashMap<MethodRef, LocationSet>,
    barriers: Option<ConcurrentCounter<Barrier>>,
    stats: MethodBarriersStats,
}

impl SharedState {
    /// Create a shared state
    ///
    /// `pure_methods` extends the built-in list of pure methods. With
    /// `log_barriers`, every barrier found while optimizing is counted and
    /// the most frequent ones are logged by [`cleanup`](Self::cleanup).
    pub fn new(pure_methods: impl IntoIterator<Item = MethodRef>, log_barriers: bool) -> Self {
        let pure_methods: FxHashSet<MethodRef> = parse_builtin(DEFAULT_PURE_METHODS)
            .chain(pure_methods)
            .collect();
        let safe_methods = pure_methods
            .iter()
            .cloned()
            .chain(parse_builtin(DEFAULT_SAFE_METHODS))
            .collect();
        Self {
            pure_methods,
            safe_methods,
            program: None,
            write_summaries: IndexVec::new(),
            conditionally_pure_methods: FxHashMap::default(),
            barriers: log_barriers.then(ConcurrentCounter::new),
            stats: MethodBarriersStats::default(),
        }
    }

    /// Compute method write summaries for the whole scope
    ///
    /// Must run once, before any per-method query.
    pub fn init_method_barriers(&mut self, scope: &Scope) -> MethodBarriersStats {
        assert!(self.program.is_none(), "method barriers initialized twice");
        let hierarchy = ClassHierarchy::build(scope);
        let overrides = OverrideGraph::build(&hierarchy);
        log::debug!(
            "{} classes, {} methods, {} override edges",
            scope.num_classes(),
            scope.methods().len(),
            overrides.num_edges()
        );

        let result = summaries::compute(
            &SummaryContext {
                hierarchy: &hierarchy,
                overrides: &overrides,
                pure_methods: &self.pure_methods,
                safe_methods: &self.safe_methods,
            },
            scope,
        );
        let mut stats = result.stats();

        for (id, summary) in result.summaries.iter_enumerated() {
            let Some(summary) = summary else {
                continue;
            };
            let info = hierarchy.method(id);
            let is_candidate = summary.writes.is_empty()
                && !summary.nondeterministic
                && !summary.reads.contains(&Location::GeneralMemoryBarrier)
                && !info.reference.proto().ret.is_void()
                && !info.reference.is_constructor()
                && !info.reference.is_static_initializer()
                && !(info.is_virtual() && !overrides.overriders(id).is_empty())
                && !self.pure_methods.contains(&info.reference);
            if is_candidate {
                log::trace!("conditionally pure: {}", info.reference);
                self.conditionally_pure_methods
                    .insert(info.reference.clone(), summary.reads.clone());
                self.pure_methods.insert(info.reference.clone());
                self.safe_methods.insert(info.reference.clone());
            }
        }
        stats.conditionally_pure_methods = self.conditionally_pure_methods.len();

        self.write_summaries = result
            .summaries
            .into_iter()
            .map(|summary| summary.map(|summary| summary.writes))
            .collect();
        self.program = Some(Program {
            hierarchy,
            overrides,
        });
        self.stats = stats;
        stats
    }

    fn program(&self) -> &Program {
        match &self.program {
            Some(program) => program,
            None => panic!("shared state queried outside of init_method_barriers .. cleanup"),
        }
    }

    /// Location read or written by a field or array access
    ///
    /// Volatile and unresolved fields map to the general location.
    pub fn access_location(&self, insn: &Instruction) -> Option<Location> {
        summaries::access_location(&self.program().hierarchy, insn)
    }

    /// Whether `insn` may write some location
    pub fn may_be_barrier(&self, insn: &Instruction, exact_virtual_scope: Option<&TypeRef>) -> bool {
        let opcode = insn.opcode();
        if opcode.is_monitor() || opcode == Opcode::FillArrayData {
            return true;
        }
        if opcode.is_field_put() || opcode.is_aput() {
            return true;
        }
        if opcode.is_invoke() {
            return !self.is_invoke_safe(insn, exact_virtual_scope);
        }
        if opcode.is_field_get() {
            return self.access_location(insn) == Some(Location::GeneralMemoryBarrier);
        }
        false
    }

    /// The callee has no effect on tracked locations
    pub fn is_invoke_safe(&self, insn: &Instruction, exact_virtual_scope: Option<&TypeRef>) -> bool {
        let Some(method) = insn.get_method() else {
            return false;
        };
        if self.safe_methods.contains(method) {
            return true;
        }
        let dynamic = MethodSearch::for_opcode(insn.opcode()).map_or(false, MethodSearch::is_dynamic);
        match exact_virtual_scope {
            Some(ty) if dynamic => {
                let hierarchy = &self.program().hierarchy;
                hierarchy
                    .resolve_virtual_from(ty, method)
                    .map_or(false, |id| self.safe_methods.contains(&hierarchy.method(id).reference))
            },
            _ => false,
        }
    }

    /// The single relevant location an invoke may write, or the general
    /// location when it writes several relevant ones or cannot be analyzed
    fn invoke_written_location(
        &self,
        insn: &Instruction,
        exact_virtual_scope: Option<&TypeRef>,
        read_locations: &LocationSet,
    ) -> Option<Location> {
        let program = self.program();
        let Some(targets) = summaries::invoke_targets(
            &program.hierarchy,
            &program.overrides,
            insn,
            exact_virtual_scope,
        ) else {
            return Some(Location::GeneralMemoryBarrier);
        };

        let mut relevant: Option<&Location> = None;
        for target in targets {
            let Some(writes) = &self.write_summaries[target] else {
                return Some(Location::GeneralMemoryBarrier);
            };
            if writes.contains(&Location::GeneralMemoryBarrier) {
                return Some(Location::GeneralMemoryBarrier);
            }
            for location in writes.iter().filter(|l| read_locations.contains(*l)) {
                match relevant {
                    Some(seen) if seen != location => return Some(Location::GeneralMemoryBarrier),
                    _ => relevant = Some(location),
                }
            }
        }
        relevant.cloned()
    }

    /// Whether a non-safe invoke writes any location in `read_locations`
    pub fn is_invoke_a_barrier(
        &self,
        insn: &Instruction,
        exact_virtual_scope: Option<&TypeRef>,
        read_locations: &LocationSet,
    ) -> bool {
        self.invoke_written_location(insn, exact_virtual_scope, read_locations)
            .is_some()
    }

    /// The location `insn` writes that matters to a method reading
    /// `read_locations`
    ///
    /// `None` if `insn` writes nothing relevant. The general location means
    /// everything must be assumed overwritten.
    pub fn get_relevant_written_location(
        &self,
        insn: &Instruction,
        exact_virtual_scope: Option<&TypeRef>,
        read_locations: &LocationSet,
    ) -> Option<Location> {
        if !self.may_be_barrier(insn, exact_virtual_scope) {
            return None;
        }
        let opcode = insn.opcode();
        if opcode.is_invoke() {
            self.invoke_written_location(insn, exact_virtual_scope, read_locations)
        } else if opcode.is_field_put() || opcode.is_aput() {
            self.access_location(insn)
                .filter(|location| location.is_general() || read_locations.contains(location))
        } else {
            Some(Location::GeneralMemoryBarrier)
        }
    }

    /// The invoked method reference is known to be pure
    pub fn has_pure_method(&self, insn: &Instruction) -> bool {
        insn.get_method()
            .map_or(false, |method| self.pure_methods.contains(method))
    }

    /// Read set of the conditionally-pure method an invoke calls, if its only
    /// possible target is one
    pub fn conditionally_pure_read_locations(&self, insn: &Instruction) -> Option<&LocationSet> {
        if let Some(reads) = insn
            .get_method()
            .and_then(|method| self.get_read_locations_of_conditionally_pure_method(method))
        {
            return Some(reads);
        }
        if self.conditionally_pure_methods.is_empty() {
            return None;
        }
        let program = self.program();
        let targets =
            summaries::invoke_targets(&program.hierarchy, &program.overrides, insn, None)?;
        match targets.as_slice() {
            [target] => self.get_read_locations_of_conditionally_pure_method(
                &program.hierarchy.method(*target).reference,
            ),
            _ => None,
        }
    }

    pub fn get_read_locations_of_conditionally_pure_method(
        &self,
        method: &MethodRef,
    ) -> Option<&LocationSet> {
        self.conditionally_pure_methods.get(method)
    }

    /// Count one occurrence of `barrier`; no-op unless barrier logging is on
    pub fn log_barrier(&self, barrier: Barrier) {
        if let Some(barriers) = &self.barriers {
            barriers.increment(barrier);
        }
    }

    /// Barriers counted so far, most frequent first; `None` unless barrier
    /// logging is on. The log is dropped by [`cleanup`](Self::cleanup).
    pub fn barrier_counts(&self) -> Option<Vec<(Barrier, usize)>> {
        self.barriers.as_ref().map(ConcurrentCounter::snapshot)
    }

    /// Drop whole-program structures once every method is done
    pub fn cleanup(&mut self) {
        if let Some(barriers) = self.barriers.take() {
            let snapshot = barriers.snapshot();
            log::debug!(
                "{} barrier occurrences over {} distinct barriers",
                barriers.total(),
                snapshot.len()
            );
            for (barrier, count) in snapshot.iter().take(LOGGED_BARRIERS) {
                log::debug!("  {:>8}  {}", count, barrier);
            }
        }
        self.program = None;
    }

    pub fn stats(&self) -> MethodBarriersStats {
        self.stats
    }

    pub fn is_pure(&self, method: &MethodRef) -> bool {
        self.pure_methods.contains(method)
    }
}
