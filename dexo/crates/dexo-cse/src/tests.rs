//! dexo-cse crate tests
//!
//! Forwarding scenarios run against a small program: plain repeated reads,
//! barriers of every kind, joins, loops, exception edges, and the patched
//! bodies they produce.

use crate::*;
use dexo_ir::*;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn ty(s: &str) -> TypeRef {
    TypeRef::new(s)
}

fn method(s: &str) -> MethodRef {
    s.parse().unwrap()
}

fn field(s: &str) -> FieldRef {
    s.parse().unwrap()
}

const X: &str = "LFoo;.x:I";
const Y: &str = "LFoo;.y:I";
const VOL: &str = "LFoo;.vol:I";
const COUNT: &str = "LFoo;.count:I";
const BIG: &str = "LFoo;.big:J";
const UNKNOWN: &str = "LExt;.run:()V";

fn writer(is_static: bool, target: &str) -> Option<ControlFlowGraph> {
    let mut b = CfgBuilder::new();
    if !is_static {
        b.load_param(RegKind::Object, Reg(0));
    }
    b.const_(Reg(1), 1);
    b.sput(Opcode::SPut, Reg(1), &field(target));
    b.ret(None);
    Some(b.build())
}

fn empty_body(is_static: bool) -> Option<ControlFlowGraph> {
    let mut b = CfgBuilder::new();
    if !is_static {
        b.load_param(RegKind::Object, Reg(0));
    }
    b.ret(None);
    Some(b.build())
}

/// `LFoo;` holds the fields read by the methods under test, `LBase;.touch`
/// writes `LFoo;.count` while its override in `LQuiet;` does nothing,
/// `LBar;.bumpBoth` writes `LFoo;.count` and `LBar;.total`, and
/// `LFoo;.getX` only reads `LFoo;.x`
fn program() -> Scope {
    let mut scope = Scope::new();
    let object = ty("Ljava/lang/Object;");
    scope.add_class(DexClass::new(object.clone(), None));
    for class in ["LFoo;", "LBar;", "LBase;"] {
        scope.add_class(DexClass::new(ty(class), Some(object.clone())));
    }
    scope.add_class(DexClass::new(ty("LQuiet;"), Some(ty("LBase;"))));

    scope.add_field(field(X), AccessFlags::NONE);
    scope.add_field(field(Y), AccessFlags::NONE);
    scope.add_field(field(VOL), AccessFlags::VOLATILE);
    scope.add_field(field(COUNT), AccessFlags::STATIC);
    scope.add_field(field(BIG), AccessFlags::STATIC);
    scope.add_field(field("LBar;.total:I"), AccessFlags::STATIC);

    scope.add_method(method("LBase;.touch:()V"), AccessFlags::PUBLIC, writer(false, COUNT));
    scope.add_method(method("LQuiet;.touch:()V"), AccessFlags::PUBLIC, empty_body(false));
    scope.add_method(
        method("LBar;.bump:()V"),
        AccessFlags::PUBLIC | AccessFlags::STATIC,
        writer(true, "LBar;.total:I"),
    );
    scope.add_method(
        method("LBar;.bumpCount:()V"),
        AccessFlags::PUBLIC | AccessFlags::STATIC,
        writer(true, COUNT),
    );

    let mut b = CfgBuilder::new();
    b.const_(Reg(0), 1);
    b.sput(Opcode::SPut, Reg(0), &field(COUNT));
    b.sput(Opcode::SPut, Reg(0), &field("LBar;.total:I"));
    b.ret(None);
    scope.add_method(
        method("LBar;.bumpBoth:()V"),
        AccessFlags::PUBLIC | AccessFlags::STATIC,
        Some(b.build()),
    );

    let mut b = CfgBuilder::new();
    b.load_param(RegKind::Object, Reg(0));
    b.iget(Opcode::IGet, Reg(1), Reg(0), &field(X));
    b.ret(Some(Reg(1)));
    scope.add_method(method("LFoo;.getX:()I"), AccessFlags::PUBLIC, Some(b.build()));
    scope
}

fn shared_state(pure_methods: &[&str]) -> SharedState {
    let mut shared = SharedState::new(pure_methods.iter().map(|m| method(m)), false);
    shared.init_method_barriers(&program());
    shared
}

fn forwards(shared: &SharedState, cfg: &mut ControlFlowGraph) -> Vec<(BTreeSet<InsnId>, InsnId)> {
    let cse = CommonSubexpressionElimination::new(shared, cfg);
    cse.forwards()
        .iter()
        .map(|forward| (cse.earlier_insns(forward.earlier).clone(), forward.later))
        .collect()
}

/// `v1 = this.x; <between>; v2 = this.x`
fn two_reads(between: impl FnOnce(&mut CfgBuilder)) -> (ControlFlowGraph, InsnId, InsnId) {
    let mut b = CfgBuilder::new();
    b.load_param(RegKind::Object, Reg(0));
    let first = b.iget(Opcode::IGet, Reg(1), Reg(0), &field(X));
    between(&mut b);
    let second = b.iget(Opcode::IGet, Reg(2), Reg(0), &field(X));
    b.ret(Some(Reg(2)));
    (b.build(), first, second)
}

// ==================== Straight-line scenarios ====================

#[test]
fn test_repeated_field_read_is_forwarded() {
    let shared = shared_state(&[]);
    let (mut cfg, first, second) = two_reads(|_| {});

    let mut cse = CommonSubexpressionElimination::new(&shared, &mut cfg);
    assert_eq!(cse.forwards().len(), 1);
    let forward = cse.forwards()[0];
    assert_eq!(forward.later, second);
    assert_eq!(cse.earlier_insns(forward.earlier), &BTreeSet::from([first]));

    assert!(cse.patch(false, &ty("LFoo;"), &[], false));
    let stats = cse.get_stats().clone();
    assert_eq!(stats.results_captured, 1);
    assert_eq!(stats.instructions_eliminated, 1);
    assert_eq!(stats.eliminated_opcodes.get(&Opcode::IGet), Some(&1));
    assert_eq!(stats.stores_captured, 0);
    assert_eq!(stats.max_iterations, 2);

    // iget v1; move t, v1; move v2, t
    let insns = &cfg.block(cfg.entry()).insns;
    assert_eq!(insns.len(), 4);
    assert_eq!(insns[2].opcode(), Opcode::Move);
    assert_eq!(insns[2].srcs(), &[Reg(1)]);
    let temp = insns[2].dest().unwrap();
    assert_eq!(insns[3].opcode(), Opcode::Move);
    assert_eq!(insns[3].dest(), Some(Reg(2)));
    assert_eq!(insns[3].srcs(), &[temp]);
}

#[test]
fn test_unknown_call_blocks_forwarding() {
    let shared = shared_state(&[]);
    let (mut cfg, _, _) = two_reads(|b| {
        b.invoke(Opcode::InvokeStatic, None, &method(UNKNOWN), &[]);
    });
    assert!(forwards(&shared, &mut cfg).is_empty());

    let mut cse = CommonSubexpressionElimination::new(&shared, &mut cfg);
    assert!(!cse.patch(false, &ty("LFoo;"), &[], false));
}

#[test]
fn test_pure_call_is_transparent() {
    let peek = "LExt;.peek:()I";
    let between = |b: &mut CfgBuilder| {
        b.invoke(Opcode::InvokeStatic, Some(Reg(3)), &method(peek), &[]);
    };

    let (mut cfg, _, _) = two_reads(between);
    assert!(forwards(&shared_state(&[]), &mut cfg).is_empty());

    let (mut cfg, _, second) = two_reads(between);
    let found = forwards(&shared_state(&[peek]), &mut cfg);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].1, second);
}

#[test]
fn test_pure_calls_compare_arguments() {
    let shared = shared_state(&[]);
    let abs = method("Ljava/lang/Math;.abs:(I)I");
    let mut b = CfgBuilder::new();
    b.load_param(RegKind::Normal, Reg(0));
    b.load_param(RegKind::Normal, Reg(1));
    let first = b.invoke(Opcode::InvokeStatic, Some(Reg(2)), &abs, &[Reg(0)]);
    let same = b.invoke(Opcode::InvokeStatic, Some(Reg(3)), &abs, &[Reg(0)]);
    b.invoke(Opcode::InvokeStatic, Some(Reg(4)), &abs, &[Reg(1)]);
    b.ret(Some(Reg(4)));
    let mut cfg = b.build();

    assert_eq!(forwards(&shared, &mut cfg), vec![(BTreeSet::from([first]), same)]);

    let mut cse = CommonSubexpressionElimination::new(&shared, &mut cfg);
    assert!(cse.patch(true, &ty("LFoo;"), &[ty("I"), ty("I")], false));
    assert_eq!(
        cse.get_stats().eliminated_opcodes.get(&Opcode::InvokeStatic),
        Some(&1)
    );
}

#[test]
fn test_commutative_operands_are_canonical() {
    let shared = shared_state(&[]);
    let mut b = CfgBuilder::new();
    b.load_param(RegKind::Normal, Reg(0));
    b.load_param(RegKind::Normal, Reg(1));
    b.binop(Opcode::AddInt, Reg(2), Reg(0), Reg(1));
    let swapped = b.binop(Opcode::AddInt, Reg(3), Reg(1), Reg(0));
    b.binop(Opcode::SubInt, Reg(4), Reg(0), Reg(1));
    b.binop(Opcode::SubInt, Reg(5), Reg(1), Reg(0));
    b.ret(None);
    let mut cfg = b.build();

    let found = forwards(&shared, &mut cfg);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].1, swapped);
}

#[test]
fn test_constants_and_moves_are_not_forwarded() {
    let shared = shared_state(&[]);
    let mut b = CfgBuilder::new();
    b.const_(Reg(0), 3);
    b.const_(Reg(1), 3);
    b.move_(Opcode::Move, Reg(2), Reg(0));
    b.move_(Opcode::Move, Reg(3), Reg(0));
    // equal constants still make equal operands
    b.binop(Opcode::MulInt, Reg(4), Reg(0), Reg(0));
    let product = b.binop(Opcode::MulInt, Reg(5), Reg(1), Reg(3));
    b.ret(None);
    let mut cfg = b.build();

    let found = forwards(&shared, &mut cfg);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].1, product);
}

#[test]
fn test_store_is_captured() {
    let shared = shared_state(&[]);
    let mut b = CfgBuilder::new();
    b.load_param(RegKind::Object, Reg(0));
    b.load_param(RegKind::Normal, Reg(1));
    let put = b.iput(Opcode::IPut, Reg(1), Reg(0), &field(X));
    let get = b.iget(Opcode::IGet, Reg(2), Reg(0), &field(X));
    b.ret(Some(Reg(2)));
    let mut cfg = b.build();

    assert_eq!(forwards(&shared, &mut cfg), vec![(BTreeSet::from([put]), get)]);

    let mut cse = CommonSubexpressionElimination::new(&shared, &mut cfg);
    assert!(cse.patch(false, &ty("LFoo;"), &[ty("I")], false));
    assert_eq!(cse.get_stats().stores_captured, 1);
    assert_eq!(cse.get_stats().results_captured, 0);

    // move t, v1 lands before the put
    let insns = &cfg.block(cfg.entry()).insns;
    assert_eq!(insns[2].opcode(), Opcode::Move);
    assert_eq!(insns[2].srcs(), &[Reg(1)]);
    assert_eq!(insns[3].id(), put);
}

#[test]
fn test_store_to_another_field_keeps_reads() {
    let shared = shared_state(&[]);
    let (mut cfg, _, _) = two_reads(|b| {
        b.const_(Reg(5), 0);
        b.iput(Opcode::IPut, Reg(5), Reg(0), &field(Y));
    });
    assert_eq!(forwards(&shared, &mut cfg).len(), 1);

    let (mut cfg, _, _) = two_reads(|b| {
        b.const_(Reg(5), 0);
        b.iput(Opcode::IPut, Reg(5), Reg(6), &field(X));
    });
    assert!(forwards(&shared, &mut cfg).is_empty());
}

#[test]
fn test_new_array_length_is_captured() {
    let shared = shared_state(&[]);
    let mut b = CfgBuilder::new();
    b.load_param(RegKind::Normal, Reg(0));
    let alloc = b.new_array(Reg(1), Reg(0), &ty("[I"));
    let length = b.array_length(Reg(2), Reg(1));
    b.ret(Some(Reg(2)));
    let mut cfg = b.build();

    assert_eq!(forwards(&shared, &mut cfg), vec![(BTreeSet::from([alloc]), length)]);

    let mut cse = CommonSubexpressionElimination::new(&shared, &mut cfg);
    assert!(cse.patch(true, &ty("LFoo;"), &[ty("I")], false));
    assert_eq!(cse.get_stats().array_lengths_captured, 1);
    let insns = &cfg.block(cfg.entry()).insns;
    assert_eq!(insns[1].opcode(), Opcode::Move);
    assert_eq!(insns[1].srcs(), &[Reg(0)]);
    assert_eq!(insns[2].id(), alloc);
}

#[test]
fn test_volatile_read_is_a_barrier() {
    let shared = shared_state(&[]);
    let (mut cfg, _, _) = two_reads(|b| {
        b.iget(Opcode::IGet, Reg(3), Reg(0), &field(VOL));
    });
    assert!(forwards(&shared, &mut cfg).is_empty());
}

#[test]
fn test_monitor_is_a_barrier() {
    let shared = shared_state(&[]);
    let (mut cfg, _, _) = two_reads(|b| {
        b.monitor(Opcode::MonitorEnter, Reg(0));
    });
    assert!(forwards(&shared, &mut cfg).is_empty());
}

// ==================== Whole-program summaries ====================

#[test]
fn test_disjoint_callee_writes_are_not_barriers() {
    let shared = shared_state(&[]);
    let reads_around = |callee: &str| {
        let mut b = CfgBuilder::new();
        b.sget(Opcode::SGet, Reg(0), &field(COUNT));
        b.invoke(Opcode::InvokeStatic, None, &method(callee), &[]);
        b.sget(Opcode::SGet, Reg(1), &field(COUNT));
        b.ret(Some(Reg(1)));
        b.build()
    };

    assert_eq!(forwards(&shared, &mut reads_around("LBar;.bump:()V")).len(), 1);
    assert!(forwards(&shared, &mut reads_around("LBar;.bumpCount:()V")).is_empty());
}

#[test]
fn test_exact_receiver_narrows_virtual_call() {
    let shared = shared_state(&[]);
    let touch = method("LBase;.touch:()V");

    let mut b = CfgBuilder::new();
    b.load_param(RegKind::Object, Reg(0));
    b.new_instance(Reg(1), &ty("LQuiet;"));
    b.sget(Opcode::SGet, Reg(2), &field(COUNT));
    b.invoke(Opcode::InvokeVirtual, None, &touch, &[Reg(1)]);
    b.sget(Opcode::SGet, Reg(3), &field(COUNT));
    b.ret(Some(Reg(3)));
    assert_eq!(forwards(&shared, &mut b.build()).len(), 1);

    let mut b = CfgBuilder::new();
    b.load_param(RegKind::Object, Reg(0));
    b.sget(Opcode::SGet, Reg(2), &field(COUNT));
    b.invoke(Opcode::InvokeVirtual, None, &touch, &[Reg(0)]);
    b.sget(Opcode::SGet, Reg(3), &field(COUNT));
    b.ret(Some(Reg(3)));
    assert!(forwards(&shared, &mut b.build()).is_empty());
}

#[test]
fn test_conditionally_pure_call_is_forwarded() {
    let shared = shared_state(&[]);
    assert_eq!(shared.stats().conditionally_pure_methods, 1);
    let get_x = method("LFoo;.getX:()I");
    assert!(shared.is_pure(&get_x));

    let mut b = CfgBuilder::new();
    b.load_param(RegKind::Object, Reg(0));
    let first = b.invoke(Opcode::InvokeVirtual, Some(Reg(1)), &get_x, &[Reg(0)]);
    let second = b.invoke(Opcode::InvokeVirtual, Some(Reg(2)), &get_x, &[Reg(0)]);
    b.const_(Reg(3), 7);
    b.iput(Opcode::IPut, Reg(3), Reg(0), &field(X));
    b.invoke(Opcode::InvokeVirtual, Some(Reg(4)), &get_x, &[Reg(0)]);
    b.ret(Some(Reg(4)));
    let mut cfg = b.build();

    assert_eq!(forwards(&shared, &mut cfg), vec![(BTreeSet::from([first]), second)]);
}

#[test]
fn test_shared_state_barrier_queries() {
    let shared = shared_state(&[]);
    let reads = LocationSet::from([Location::Field(field(COUNT))]);
    let call = |callee: &str| {
        Instruction::new(InsnId(0), Opcode::InvokeStatic).with_method(method(callee))
    };

    assert!(!shared.is_invoke_a_barrier(&call("LBar;.bump:()V"), None, &reads));
    assert!(shared.is_invoke_a_barrier(&call("LBar;.bumpCount:()V"), None, &reads));
    assert_eq!(
        shared.get_relevant_written_location(&call(UNKNOWN), None, &reads),
        Some(Location::GeneralMemoryBarrier)
    );
    assert!(shared.is_invoke_safe(&call("Ljava/lang/Object;.<init>:()V"), None));

    let monitor = Instruction::new(InsnId(1), Opcode::MonitorExit).with_srcs([Reg(0)]);
    assert!(shared.may_be_barrier(&monitor, None));
    let add = Instruction::new(InsnId(2), Opcode::AddInt)
        .with_dest(Reg(2))
        .with_srcs([Reg(0), Reg(1)]);
    assert!(!shared.may_be_barrier(&add, None));
    assert_eq!(
        shared.get_read_locations_of_conditionally_pure_method(&method("LFoo;.getX:()I")),
        Some(&LocationSet::from([Location::Field(field(X))]))
    );
}

#[test]
fn test_several_written_locations_collapse_to_general() {
    let shared = shared_state(&[]);
    let bump_both = Instruction::new(InsnId(0), Opcode::InvokeStatic)
        .with_method(method("LBar;.bumpBoth:()V"));
    let count = Location::Field(field(COUNT));
    let total = Location::Field(field("LBar;.total:I"));

    let both = LocationSet::from([count.clone(), total]);
    assert_eq!(
        shared.get_relevant_written_location(&bump_both, None, &both),
        Some(Location::GeneralMemoryBarrier)
    );
    let one = LocationSet::from([count.clone()]);
    assert_eq!(shared.get_relevant_written_location(&bump_both, None, &one), Some(count));
    let none = LocationSet::from([Location::Field(field(X))]);
    assert_eq!(shared.get_relevant_written_location(&bump_both, None, &none), None);
}

/// Interface `LI;` declares `m` and its only implementor `LImpl;` either
/// inherits it from `LLib;`, which is not in scope, or implements it itself
fn library_program(implemented_in_scope: bool) -> Scope {
    let mut scope = Scope::new();
    let object = ty("Ljava/lang/Object;");
    scope.add_class(DexClass::new(object.clone(), None));
    scope.add_class(
        DexClass::new(ty("LI;"), Some(object.clone()))
            .with_access(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT),
    );
    let parent = if implemented_in_scope { object.clone() } else { ty("LLib;") };
    scope.add_class(DexClass::new(ty("LImpl;"), Some(parent)).with_interfaces(vec![ty("LI;")]));
    scope.add_class(DexClass::new(ty("LG;"), Some(object)));
    scope.add_field(field("LG;.s:I"), AccessFlags::STATIC);

    scope.add_method(method("LI;.m:()V"), AccessFlags::PUBLIC | AccessFlags::ABSTRACT, None);
    if implemented_in_scope {
        scope.add_method(method("LImpl;.m:()V"), AccessFlags::PUBLIC, empty_body(false));
    }

    // reads LG;.s around a call of m, a candidate for conditional purity
    let mut b = CfgBuilder::new();
    b.load_param(RegKind::Object, Reg(0));
    b.invoke(Opcode::InvokeInterface, None, &method("LI;.m:()V"), &[Reg(0)]);
    b.sget(Opcode::SGet, Reg(1), &field("LG;.s:I"));
    b.ret(Some(Reg(1)));
    scope.add_method(
        method("LG;.peek:(LI;)I"),
        AccessFlags::PUBLIC | AccessFlags::STATIC,
        Some(b.build()),
    );
    scope
}

/// `sget LG;.s; invoke-interface LI;.m; sget LG;.s`, with the receiver
/// allocated as `LImpl;` when `exact`
fn reads_around_interface_call(exact: bool) -> ControlFlowGraph {
    let mut b = CfgBuilder::new();
    b.load_param(RegKind::Object, Reg(0));
    let receiver = if exact {
        b.new_instance(Reg(3), &ty("LImpl;"));
        Reg(3)
    } else {
        Reg(0)
    };
    b.sget(Opcode::SGet, Reg(1), &field("LG;.s:I"));
    b.invoke(Opcode::InvokeInterface, None, &method("LI;.m:()V"), &[receiver]);
    b.sget(Opcode::SGet, Reg(2), &field("LG;.s:I"));
    b.ret(Some(Reg(2)));
    b.build()
}

#[test]
fn test_implementation_outside_scope_is_a_barrier() {
    let mut shared = SharedState::new([], false);
    shared.init_method_barriers(&library_program(false));

    let call = Instruction::new(InsnId(0), Opcode::InvokeInterface)
        .with_srcs([Reg(0)])
        .with_method(method("LI;.m:()V"));
    let reads = LocationSet::from([Location::Field(field("LG;.s:I"))]);
    assert_eq!(
        shared.get_relevant_written_location(&call, None, &reads),
        Some(Location::GeneralMemoryBarrier)
    );
    assert_eq!(
        shared.get_relevant_written_location(&call, Some(&ty("LImpl;")), &reads),
        Some(Location::GeneralMemoryBarrier)
    );

    assert!(forwards(&shared, &mut reads_around_interface_call(false)).is_empty());
    assert!(forwards(&shared, &mut reads_around_interface_call(true)).is_empty());

    // callers inherit the unknown effects
    assert!(!shared.is_pure(&method("LG;.peek:(LI;)I")));
    assert_eq!(shared.stats().conditionally_pure_methods, 0);
}

#[test]
fn test_implementation_in_scope_is_not_a_barrier() {
    let mut shared = SharedState::new([], false);
    shared.init_method_barriers(&library_program(true));

    assert_eq!(forwards(&shared, &mut reads_around_interface_call(false)).len(), 1);
    assert_eq!(forwards(&shared, &mut reads_around_interface_call(true)).len(), 1);
    assert!(shared.is_pure(&method("LG;.peek:(LI;)I")));
}

fn unknown_call_barrier() -> Barrier {
    Barrier {
        opcode: Opcode::InvokeStatic,
        target: BarrierTarget::Method(method(UNKNOWN)),
    }
}

fn logging_shared_state() -> SharedState {
    let mut shared = SharedState::new([], true);
    shared.init_method_barriers(&program());
    shared
}

#[test]
fn test_barrier_log_counts_each_instruction_once() {
    let mut shared = logging_shared_state();
    assert_eq!(shared.barrier_counts(), Some(Vec::new()));

    let (mut cfg, _, _) = loop_reading(|b| {
        b.invoke(Opcode::InvokeStatic, None, &method(UNKNOWN), &[]);
    });
    let cse = CommonSubexpressionElimination::new(&shared, &mut cfg);
    assert!(cse.get_stats().max_iterations >= 2);
    drop(cse);

    assert_eq!(shared.barrier_counts(), Some(vec![(unknown_call_barrier(), 1)]));
    shared.cleanup();
    assert_eq!(shared.barrier_counts(), None);
}

#[test]
fn test_barrier_log_without_logging_is_empty() {
    let shared = shared_state(&[]);
    let (mut cfg, _, _) = loop_reading(|b| {
        b.invoke(Opcode::InvokeStatic, None, &method(UNKNOWN), &[]);
    });
    forwards(&shared, &mut cfg);
    assert_eq!(shared.barrier_counts(), None);
}

#[test]
fn test_barrier_log_is_shared_across_threads() {
    use rayon::prelude::*;

    let shared = logging_shared_state();
    let mut bodies: Vec<ControlFlowGraph> = Vec::new();
    for _ in 0..3 {
        let (cfg, _, _) = loop_reading(|b| {
            b.invoke(Opcode::InvokeStatic, None, &method(UNKNOWN), &[]);
        });
        bodies.push(cfg);
    }
    for _ in 0..2 {
        let (cfg, _, _) = two_reads(|b| {
            b.monitor(Opcode::MonitorEnter, Reg(0));
        });
        bodies.push(cfg);
    }

    bodies.par_iter_mut().for_each(|cfg| {
        CommonSubexpressionElimination::new(&shared, cfg);
    });

    let monitor = Barrier {
        opcode: Opcode::MonitorEnter,
        target: BarrierTarget::None,
    };
    assert_eq!(
        shared.barrier_counts(),
        Some(vec![(unknown_call_barrier(), 3), (monitor, 2)])
    );
}

#[test]
#[should_panic(expected = "outside of init_method_barriers")]
fn test_queries_after_cleanup_panic() {
    let mut shared = shared_state(&[]);
    shared.cleanup();
    let get = Instruction::new(InsnId(0), Opcode::SGet)
        .with_dest(Reg(0))
        .with_field(field(COUNT));
    shared.access_location(&get);
}

// ==================== Control flow ====================

/// `v1 = this.x` in the entry, then a loop reading `this.x` and running
/// `body` on every trip
fn loop_reading(body: impl FnOnce(&mut CfgBuilder)) -> (ControlFlowGraph, InsnId, InsnId) {
    let mut b = CfgBuilder::new();
    let head = b.new_block();
    let exit = b.new_block();

    b.load_param(RegKind::Object, Reg(0));
    let before = b.iget(Opcode::IGet, Reg(1), Reg(0), &field(X));
    b.goto(head);

    b.set_current_block(head);
    let inside = b.iget(Opcode::IGet, Reg(2), Reg(0), &field(X));
    body(&mut b);
    b.if_(IfOp::Eqz, &[Reg(2)], head, exit);

    b.set_current_block(exit);
    b.ret(Some(Reg(2)));
    (b.build(), before, inside)
}

#[test]
fn test_loop_without_barrier_forwards() {
    let shared = shared_state(&[]);
    let (mut cfg, before, inside) = loop_reading(|_| {});
    assert_eq!(forwards(&shared, &mut cfg), vec![(BTreeSet::from([before]), inside)]);
}

#[test]
fn test_barrier_in_loop_body_blocks_forwarding() {
    let shared = shared_state(&[]);
    let (mut cfg, _, _) = loop_reading(|b| {
        b.invoke(Opcode::InvokeStatic, None, &method(UNKNOWN), &[]);
    });
    let cse = CommonSubexpressionElimination::new(&shared, &mut cfg);
    assert!(cse.forwards().is_empty());
    assert!(cse.get_stats().max_iterations >= 2);
}

#[test]
fn test_loop_carried_values_are_not_confused() {
    // v1 = new Object[]; loop { v2 = v1.length; v1 = new Object[v2] }
    let shared = shared_state(&[]);
    let mut b = CfgBuilder::new();
    let head = b.new_block();
    let exit = b.new_block();
    b.const_(Reg(0), 4);
    b.new_array(Reg(1), Reg(0), &ty("[Ljava/lang/Object;"));
    b.goto(head);

    b.set_current_block(head);
    b.array_length(Reg(2), Reg(1));
    b.new_array(Reg(1), Reg(2), &ty("[Ljava/lang/Object;"));
    b.array_length(Reg(3), Reg(1));
    b.if_(IfOp::Eqz, &[Reg(3)], head, exit);

    b.set_current_block(exit);
    b.ret(None);
    let mut cfg = b.build();

    // only the length right after the inner allocation is known
    let found = forwards(&shared, &mut cfg);
    assert_eq!(found.len(), 1);
    let block = &cfg.block(head).insns;
    assert_eq!(found[0], (BTreeSet::from([block[1].id()]), block[2].id()));
}

#[test]
fn test_join_merges_earlier_instructions() {
    let shared = shared_state(&[]);
    let mut b = CfgBuilder::new();
    let left = b.new_block();
    let right = b.new_block();
    let join = b.new_block();

    b.load_param(RegKind::Object, Reg(0));
    b.load_param(RegKind::Normal, Reg(1));
    b.if_(IfOp::Eqz, &[Reg(1)], left, right);
    b.set_current_block(left);
    let from_left = b.iget(Opcode::IGet, Reg(2), Reg(0), &field(X));
    b.goto(join);
    b.set_current_block(right);
    let from_right = b.iget(Opcode::IGet, Reg(3), Reg(0), &field(X));
    b.goto(join);
    b.set_current_block(join);
    let later = b.iget(Opcode::IGet, Reg(4), Reg(0), &field(X));
    b.ret(Some(Reg(4)));
    let mut cfg = b.build();

    assert_eq!(
        forwards(&shared, &mut cfg),
        vec![(BTreeSet::from([from_left, from_right]), later)]
    );

    let mut cse = CommonSubexpressionElimination::new(&shared, &mut cfg);
    assert!(cse.patch(false, &ty("LFoo;"), &[ty("I")], false));
    assert_eq!(cse.get_stats().results_captured, 2);
    assert_eq!(cse.get_stats().instructions_eliminated, 1);

    // both sides feed the same temporary
    let temp_of = |block: BlockId| cfg.block(block).insns[1].dest();
    assert_eq!(temp_of(left), temp_of(right));
    assert!(forwards(&shared, &mut cfg).is_empty());
}

#[test]
fn test_join_without_agreement_drops_value() {
    let shared = shared_state(&[]);
    let mut b = CfgBuilder::new();
    let left = b.new_block();
    let right = b.new_block();
    let join = b.new_block();

    b.load_param(RegKind::Object, Reg(0));
    b.load_param(RegKind::Normal, Reg(1));
    b.if_(IfOp::Eqz, &[Reg(1)], left, right);
    b.set_current_block(left);
    b.iget(Opcode::IGet, Reg(2), Reg(0), &field(X));
    b.goto(join);
    b.set_current_block(right);
    b.goto(join);
    b.set_current_block(join);
    b.iget(Opcode::IGet, Reg(4), Reg(0), &field(X));
    b.ret(Some(Reg(4)));

    assert!(forwards(&shared, &mut b.build()).is_empty());
}

/// `v1 = this.x`, then a protected block reading `this.y` and running
/// `body`, with a handler reading `this.x` again
fn handler_reading(body: impl FnOnce(&mut CfgBuilder)) -> (ControlFlowGraph, InsnId, InsnId) {
    let mut b = CfgBuilder::new();
    let protected = b.new_block();
    let handler = b.new_block();

    b.load_param(RegKind::Object, Reg(0));
    let before = b.iget(Opcode::IGet, Reg(1), Reg(0), &field(X));
    b.goto(protected);

    b.set_current_block(protected);
    b.iget(Opcode::IGet, Reg(2), Reg(0), &field(Y));
    body(&mut b);
    b.catch(None, handler);
    b.ret(None);

    b.set_current_block(handler);
    b.move_exception(Reg(3));
    let in_handler = b.iget(Opcode::IGet, Reg(4), Reg(0), &field(X));
    b.ret(Some(Reg(4)));
    (b.build(), before, in_handler)
}

#[test]
fn test_handler_sees_state_at_throwing_points() {
    let shared = shared_state(&[]);
    let (mut cfg, before, in_handler) = handler_reading(|_| {});
    assert_eq!(forwards(&shared, &mut cfg), vec![(BTreeSet::from([before]), in_handler)]);

    let (mut cfg, _, _) = handler_reading(|b| {
        b.invoke(Opcode::InvokeStatic, None, &method(UNKNOWN), &[]);
    });
    assert!(forwards(&shared, &mut cfg).is_empty());
}

// ==================== Patching ====================

#[test]
fn test_runtime_assertion_checks_forwarded_value() {
    let shared = shared_state(&[]);
    let (mut cfg, _, second) = two_reads(|_| {});
    let mut cse = CommonSubexpressionElimination::new(&shared, &mut cfg);
    assert!(cse.patch(false, &ty("LFoo;"), &[], true));

    assert_eq!(cfg.blocks().len(), 3);
    let entry = cfg.block(cfg.entry());
    let Terminator::If {
        op,
        srcs,
        then_block,
        else_block,
    } = &entry.terminator
    else {
        panic!("expected a check, got {}", entry.terminator);
    };
    assert_eq!(*op, IfOp::Ne);
    assert_eq!(srcs[0], Reg(2));

    // the recomputation reads the field again into the compared register
    let recompute = entry.insns.last().unwrap();
    assert_eq!(recompute.opcode(), Opcode::IGet);
    assert_ne!(recompute.id(), second);
    assert_eq!(recompute.dest(), Some(srcs[1]));

    let throw = cfg.block(*then_block);
    assert!(throw.handlers.is_empty());
    assert!(matches!(throw.terminator, Terminator::Throw { .. }));
    assert_eq!(throw.insns[0].get_type(), Some(&ty("Ljava/lang/AssertionError;")));
    assert_eq!(
        throw.insns[1].payload(),
        &Payload::String("CSE mismatch in LFoo;".into())
    );
    assert_eq!(
        cfg.block(*else_block).terminator,
        Terminator::Return { src: Some(Reg(2)) }
    );
}

#[test]
fn test_runtime_assertion_on_wide_value_uses_cmp_long() {
    let shared = shared_state(&[]);
    let mut b = CfgBuilder::new();
    b.sget(Opcode::SGetWide, Reg(0), &field(BIG));
    b.sget(Opcode::SGetWide, Reg(2), &field(BIG));
    b.ret(Some(Reg(2)));
    let mut cfg = b.build();

    let mut cse = CommonSubexpressionElimination::new(&shared, &mut cfg);
    assert!(cse.patch(true, &ty("LFoo;"), &[], true));

    let entry = cfg.block(cfg.entry());
    let opcodes: Vec<Opcode> = entry.insns.iter().map(Instruction::opcode).collect();
    assert_eq!(
        opcodes,
        vec![
            Opcode::SGetWide,
            Opcode::MoveWide,
            Opcode::MoveWide,
            Opcode::SGetWide,
            Opcode::CmpLong
        ]
    );
    assert!(matches!(
        entry.terminator,
        Terminator::If { op: IfOp::Nez, .. }
    ));
}

#[test]
fn test_patch_is_idempotent() {
    let shared = shared_state(&[]);
    let (mut cfg, _, _) = two_reads(|_| {});
    let mut cse = CommonSubexpressionElimination::new(&shared, &mut cfg);
    assert!(cse.patch(false, &ty("LFoo;"), &[], false));

    let mut cse = CommonSubexpressionElimination::new(&shared, &mut cfg);
    assert!(cse.forwards().is_empty());
    assert!(!cse.patch(false, &ty("LFoo;"), &[], false));
}

#[test]
#[should_panic(expected = "does not match its signature")]
fn test_param_prologue_mismatch_panics() {
    let shared = shared_state(&[]);
    let (mut cfg, _, _) = two_reads(|_| {});
    let mut cse = CommonSubexpressionElimination::new(&shared, &mut cfg);
    cse.patch(true, &ty("LFoo;"), &[], false);
}

#[test]
fn test_many_locations_share_the_last_bit() {
    let mut scope = program();
    for i in 0..70 {
        scope.add_field(field(&format!("LBar;.f{:02}:I", i)), AccessFlags::STATIC);
    }
    let mut shared = SharedState::new([], false);
    shared.init_method_barriers(&scope);

    // sorted by name, f63 and later share the last bit
    let f = |i: usize| field(&format!("LBar;.f{:02}:I", i));
    let mut b = CfgBuilder::new();
    for i in 0..70 {
        b.sget(Opcode::SGet, Reg(i as u32), &f(i));
    }
    b.const_(Reg(100), 1);
    b.sput(Opcode::SPut, Reg(100), &f(64));
    let kept = b.sget(Opcode::SGet, Reg(101), &f(0));
    b.sget(Opcode::SGet, Reg(102), &f(63));
    b.ret(None);
    let mut cfg = b.build();

    let cse = CommonSubexpressionElimination::new(&shared, &mut cfg);
    assert_eq!(cse.forwards().len(), 1);
    assert_eq!(cse.forwards()[0].later, kept);
    assert_eq!(cse.get_stats().methods_using_other_tracked_location_bit, 1);
    assert!(cse.get_stats().max_value_ids >= 70);
}

// ==================== Properties ====================

#[derive(Debug, Clone, Copy)]
enum Step {
    GetX,
    GetY,
    PutX,
    Call,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::GetX),
        Just(Step::GetY),
        Just(Step::PutX),
        Just(Step::Call)
    ]
}

proptest! {
    /// A read is forwarded exactly when the same location was read or
    /// written before it with no call in between
    #[test]
    fn prop_no_forward_across_barriers(steps in prop::collection::vec(arb_step(), 0..24)) {
        let shared = shared_state(&[]);
        let mut b = CfgBuilder::new();
        b.load_param(RegKind::Object, Reg(0));
        b.load_param(RegKind::Normal, Reg(1));

        let (mut known_x, mut known_y) = (false, false);
        let mut expected = 0;
        for (i, step) in steps.iter().enumerate() {
            let dest = Reg(2 + i as u32);
            match step {
                Step::GetX => {
                    expected += usize::from(known_x);
                    known_x = true;
                    b.iget(Opcode::IGet, dest, Reg(0), &field(X));
                },
                Step::GetY => {
                    expected += usize::from(known_y);
                    known_y = true;
                    b.iget(Opcode::IGet, dest, Reg(0), &field(Y));
                },
                Step::PutX => {
                    known_x = true;
                    b.iput(Opcode::IPut, Reg(1), Reg(0), &field(X));
                },
                Step::Call => {
                    known_x = false;
                    known_y = false;
                    b.invoke(Opcode::InvokeStatic, None, &method(UNKNOWN), &[]);
                },
            }
        }
        b.ret(None);
        let mut cfg = b.build();

        let mut cse = CommonSubexpressionElimination::new(&shared, &mut cfg);
        prop_assert_eq!(cse.forwards().len(), expected);
        cse.patch(false, &ty("LFoo;"), &[ty("I")], false);
        prop_assert_eq!(cse.get_stats().instructions_eliminated, expected);
        prop_assert!(forwards(&shared, &mut cfg).is_empty());
    }
}
