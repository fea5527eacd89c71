//! Rewriting the body for the forwards found

use super::{CommonSubexpressionElimination, EarlierSetId};
use dexo_ir::{
    BasicBlock, BlockId, IfOp, InsnId, Instruction, MethodRef, Opcode, Reg, RegKind, Terminator,
    TypeRef,
};
use dexo_util::{FxHashMap, IndexVec};
use std::collections::BTreeMap;

const ASSERTION_ERROR: &str = "Ljava/lang/AssertionError;";
const ASSERTION_ERROR_INIT: &str = "Ljava/lang/AssertionError;.<init>:(Ljava/lang/Object;)V";

/// A later instruction that became `move dest, temp`
struct Replaced {
    move_id: InsnId,
    original: Instruction,
    kind: RegKind,
}

impl CommonSubexpressionElimination<'_> {
    /// Apply all forwards
    ///
    /// Every earlier instruction copies its result (or, for puts and
    /// `new-array`, the stored value or size operand) into a temporary shared
    /// by its earlier set; every later instruction becomes a move from that
    /// temporary. With `runtime_assertions` each replaced instruction is
    /// recomputed and checked against the forwarded value. Returns whether
    /// the body changed.
    pub fn patch(
        &mut self,
        is_static: bool,
        declaring_type: &TypeRef,
        arg_types: &[TypeRef],
        runtime_assertions: bool,
    ) -> bool {
        self.check_param_prologue(is_static, declaring_type, arg_types);
        if self.forwards.is_empty() {
            return false;
        }
        log::trace!("before forwarding in {}:\n{}", declaring_type, self.cfg);

        let temps = self.allocate_temps();

        let mut captures: BTreeMap<InsnId, Vec<(Reg, RegKind)>> = BTreeMap::new();
        for (set, earlier) in self.earlier_insns.iter_enumerated() {
            for insn in earlier {
                captures.entry(*insn).or_default().push(temps[set]);
            }
        }
        for (earlier, temps) in captures {
            self.capture(earlier, &temps);
        }

        let mut replaced = Vec::with_capacity(self.forwards.len());
        for forward in self.forwards.clone() {
            let (temp, kind) = temps[forward.earlier];
            let (block, pos) = self.locate(forward.later);
            let mov = self
                .cfg
                .create_insn(Opcode::move_for(kind))
                .with_srcs([temp]);
            let original = &mut self.cfg.block_mut(block).insns[pos];
            let Some(dest) = original.dest() else {
                panic!("forwarded instruction {} has no result", original);
            };
            let mov = mov.with_dest(dest);
            let move_id = mov.id();
            let original = std::mem::replace(original, mov);

            self.stats.instructions_eliminated += 1;
            *self.stats.eliminated_opcodes.entry(original.opcode()).or_insert(0) += 1;
            replaced.push(Replaced {
                move_id,
                original,
                kind,
            });
        }

        if runtime_assertions {
            let mut throw_block = None;
            for replaced in &replaced {
                self.insert_runtime_assertion(replaced, declaring_type, &mut throw_block);
            }
        }
        log::trace!("after forwarding in {}:\n{}", declaring_type, self.cfg);
        true
    }

    /// The leading `load-param*` instructions must match the signature
    fn check_param_prologue(&self, is_static: bool, declaring_type: &TypeRef, arg_types: &[TypeRef]) {
        let receiver = (!is_static).then_some(RegKind::Object);
        let expected: Vec<Opcode> = receiver
            .into_iter()
            .chain(arg_types.iter().map(|ty| match ty.reg_kind() {
                Some(kind) => kind,
                None => panic!("void parameter type in a method of {}", declaring_type),
            }))
            .map(Opcode::load_param_for)
            .collect();
        let actual: Vec<Opcode> = self.cfg.param_insns().map(Instruction::opcode).collect();
        assert_eq!(
            actual, expected,
            "parameter prologue of a method in {} does not match its signature",
            declaring_type
        );
    }

    /// One temporary per earlier set, of the kind of the values it carries
    fn allocate_temps(&mut self) -> IndexVec<EarlierSetId, (Reg, RegKind)> {
        let mut kinds: FxHashMap<EarlierSetId, RegKind> = FxHashMap::default();
        for forward in &self.forwards {
            let (block, pos) = self.locate(forward.later);
            let insn = &self.cfg.block(block).insns[pos];
            let Some(kind) = insn.result_kind() else {
                panic!("forwarded instruction {} has no result", insn);
            };
            if let Some(seen) = kinds.insert(forward.earlier, kind) {
                assert_eq!(seen, kind, "earlier set shared by values of different kinds");
            }
        }
        self.earlier_insns
            .indices()
            .map(|set| match kinds.get(&set) {
                Some(kind) => (self.cfg.allocate_temp(), *kind),
                None => panic!("earlier set without forwards"),
            })
            .collect()
    }

    fn locate(&self, insn: InsnId) -> (BlockId, usize) {
        match self.cfg.find_insn(insn) {
            Some(found) => found,
            None => panic!("instruction {} not found in the body", insn),
        }
    }

    /// Copy the value an earlier instruction provides into `temps`
    fn capture(&mut self, earlier: InsnId, temps: &[(Reg, RegKind)]) {
        let (block, pos) = self.locate(earlier);
        let insn = &self.cfg.block(block).insns[pos];
        let opcode = insn.opcode();

        let (src, at) = if opcode.is_field_put() || opcode.is_aput() {
            self.stats.stores_captured += 1;
            (insn.src(0), pos)
        } else if opcode == Opcode::NewArray {
            self.stats.array_lengths_captured += 1;
            (insn.src(0), pos)
        } else {
            self.stats.results_captured += 1;
            let Some(dest) = insn.dest() else {
                panic!("earlier instruction {} has no result", insn);
            };
            (dest, pos + 1)
        };

        let moves: Vec<Instruction> = temps
            .iter()
            .map(|(temp, kind)| {
                self.cfg
                    .create_insn(Opcode::move_for(*kind))
                    .with_dest(*temp)
                    .with_srcs([src])
            })
            .collect();
        self.cfg.block_mut(block).insns.splice(at..at, moves);
    }

    /// Recompute the replaced instruction after its move and branch to a
    /// throwing block on mismatch
    fn insert_runtime_assertion(
        &mut self,
        replaced: &Replaced,
        declaring_type: &TypeRef,
        throw_block: &mut Option<BlockId>,
    ) {
        let opcode = replaced.original.opcode();
        if opcode.is_invoke() && replaced.kind == RegKind::Object {
            return;
        }
        let Some(forwarded) = replaced.original.dest() else {
            return;
        };

        let check = self.cfg.allocate_temp();
        let mut recompute = self.cfg.duplicate_insn(&replaced.original);
        recompute.set_dest(Some(check));
        let mut inserted = vec![recompute];
        let (op, srcs) = match replaced.kind {
            RegKind::Wide => {
                let cmp = self.cfg.allocate_temp();
                inserted.push(
                    self.cfg
                        .create_insn(Opcode::CmpLong)
                        .with_dest(cmp)
                        .with_srcs([forwarded, check]),
                );
                (IfOp::Nez, vec![cmp])
            },
            RegKind::Normal | RegKind::Object => (IfOp::Ne, vec![forwarded, check]),
        };

        let throw_block = *throw_block.get_or_insert_with(|| self.create_throw_block(declaring_type));

        let (block, pos) = self.locate(replaced.move_id);
        let last = pos + inserted.len();
        self.cfg
            .block_mut(block)
            .insns
            .splice(pos + 1..pos + 1, inserted);
        let rest = self.cfg.split_block_after(block, last);
        self.cfg.block_mut(block).terminator = Terminator::If {
            op,
            srcs,
            then_block: throw_block,
            else_block: rest,
        };
    }

    /// Block throwing an `AssertionError` naming the declaring type
    fn create_throw_block(&mut self, declaring_type: &TypeRef) -> BlockId {
        let error_type: TypeRef = TypeRef::new(ASSERTION_ERROR);
        let init: MethodRef = match ASSERTION_ERROR_INIT.parse() {
            Ok(method) => method,
            Err(err) => panic!("malformed built-in method {}: {}", ASSERTION_ERROR_INIT, err),
        };
        let error = self.cfg.allocate_temp();
        let message = self.cfg.allocate_temp();

        let insns = vec![
            self.cfg
                .create_insn(Opcode::NewInstance)
                .with_dest(error)
                .with_type(error_type),
            self.cfg
                .create_insn(Opcode::ConstString)
                .with_dest(message)
                .with_string(&format!("CSE mismatch in {}", declaring_type)),
            self.cfg
                .create_insn(Opcode::InvokeDirect)
                .with_srcs([error, message])
                .with_method(init),
        ];

        let id = self.cfg.add_block();
        *self.cfg.block_mut(id) = BasicBlock {
            id,
            insns,
            terminator: Terminator::Throw { src: error },
            handlers: Vec::new(),
        };
        id
    }
}
