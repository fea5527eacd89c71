//! Method body builder
//!
//! Used by tests, benchmarks and front ends to assemble a
//! [`ControlFlowGraph`] block by block.

use crate::cfg::{BlockId, CatchHandler, ControlFlowGraph, IfOp, Terminator};
use crate::instruction::{InsnId, Instruction, Reg};
use crate::opcode::Opcode;
use crate::types::{FieldRef, MethodRef, RegKind, TypeRef};

/// CFG Builder
pub struct CfgBuilder {
    pub cfg: ControlFlowGraph,
    pub current_block: BlockId,
}

impl CfgBuilder {
    pub fn new() -> Self {
        let cfg = ControlFlowGraph::new();
        let current_block = cfg.entry();
        Self { cfg, current_block }
    }

    pub fn new_block(&mut self) -> BlockId {
        self.cfg.add_block()
    }

    pub fn set_current_block(&mut self, block: BlockId) {
        self.current_block = block;
    }

    /// Append a fully formed instruction to the current block
    pub fn emit(&mut self, insn: Instruction) -> InsnId {
        self.cfg.push_insn(self.current_block, insn)
    }

    /// Append an instruction built from `opcode` by `f`
    pub fn insn(&mut self, opcode: Opcode, f: impl FnOnce(Instruction) -> Instruction) -> InsnId {
        let insn = f(self.cfg.create_insn(opcode));
        self.emit(insn)
    }

    pub fn load_param(&mut self, kind: RegKind, dest: Reg) -> InsnId {
        self.insn(Opcode::load_param_for(kind), |i| i.with_dest(dest))
    }

    pub fn const_(&mut self, dest: Reg, literal: i64) -> InsnId {
        self.insn(Opcode::Const, |i| i.with_dest(dest).with_literal(literal))
    }

    pub fn const_wide(&mut self, dest: Reg, literal: i64) -> InsnId {
        self.insn(Opcode::ConstWide, |i| i.with_dest(dest).with_literal(literal))
    }

    pub fn move_(&mut self, opcode: Opcode, dest: Reg, src: Reg) -> InsnId {
        debug_assert!(opcode.is_move());
        self.insn(opcode, |i| i.with_dest(dest).with_srcs([src]))
    }

    pub fn iget(&mut self, opcode: Opcode, dest: Reg, obj: Reg, field: &FieldRef) -> InsnId {
        debug_assert!(opcode.is_iget());
        self.insn(opcode, |i| {
            i.with_dest(dest).with_srcs([obj]).with_field(field.clone())
        })
    }

    pub fn iput(&mut self, opcode: Opcode, value: Reg, obj: Reg, field: &FieldRef) -> InsnId {
        debug_assert!(opcode.is_iput());
        self.insn(opcode, |i| i.with_srcs([value, obj]).with_field(field.clone()))
    }

    pub fn sget(&mut self, opcode: Opcode, dest: Reg, field: &FieldRef) -> InsnId {
        debug_assert!(opcode.is_sget());
        self.insn(opcode, |i| i.with_dest(dest).with_field(field.clone()))
    }

    pub fn sput(&mut self, opcode: Opcode, value: Reg, field: &FieldRef) -> InsnId {
        debug_assert!(opcode.is_sput());
        self.insn(opcode, |i| i.with_srcs([value]).with_field(field.clone()))
    }

    pub fn aget(&mut self, opcode: Opcode, dest: Reg, array: Reg, index: Reg) -> InsnId {
        debug_assert!(opcode.is_aget());
        self.insn(opcode, |i| i.with_dest(dest).with_srcs([array, index]))
    }

    pub fn aput(&mut self, opcode: Opcode, value: Reg, array: Reg, index: Reg) -> InsnId {
        debug_assert!(opcode.is_aput());
        self.insn(opcode, |i| i.with_srcs([value, array, index]))
    }

    pub fn invoke(
        &mut self,
        opcode: Opcode,
        dest: Option<Reg>,
        method: &MethodRef,
        args: &[Reg],
    ) -> InsnId {
        debug_assert!(opcode.is_invoke());
        self.insn(opcode, |i| {
            let i = i.with_srcs(args.iter().copied()).with_method(method.clone());
            match dest {
                Some(dest) => i.with_dest(dest),
                None => i,
            }
        })
    }

    pub fn binop(&mut self, opcode: Opcode, dest: Reg, lhs: Reg, rhs: Reg) -> InsnId {
        debug_assert!(opcode.is_binop() || opcode.is_cmp());
        self.insn(opcode, |i| i.with_dest(dest).with_srcs([lhs, rhs]))
    }

    pub fn binop_lit(&mut self, opcode: Opcode, dest: Reg, src: Reg, literal: i64) -> InsnId {
        debug_assert!(opcode.is_binop_lit());
        self.insn(opcode, |i| i.with_dest(dest).with_srcs([src]).with_literal(literal))
    }

    pub fn unop(&mut self, opcode: Opcode, dest: Reg, src: Reg) -> InsnId {
        debug_assert!(opcode.is_unop());
        self.insn(opcode, |i| i.with_dest(dest).with_srcs([src]))
    }

    pub fn new_instance(&mut self, dest: Reg, ty: &TypeRef) -> InsnId {
        self.insn(Opcode::NewInstance, |i| i.with_dest(dest).with_type(ty.clone()))
    }

    pub fn new_array(&mut self, dest: Reg, size: Reg, ty: &TypeRef) -> InsnId {
        self.insn(Opcode::NewArray, |i| {
            i.with_dest(dest).with_srcs([size]).with_type(ty.clone())
        })
    }

    pub fn array_length(&mut self, dest: Reg, array: Reg) -> InsnId {
        self.insn(Opcode::ArrayLength, |i| i.with_dest(dest).with_srcs([array]))
    }

    pub fn check_cast(&mut self, dest: Reg, src: Reg, ty: &TypeRef) -> InsnId {
        self.insn(Opcode::CheckCast, |i| {
            i.with_dest(dest).with_srcs([src]).with_type(ty.clone())
        })
    }

    pub fn monitor(&mut self, opcode: Opcode, obj: Reg) -> InsnId {
        debug_assert!(opcode.is_monitor());
        self.insn(opcode, |i| i.with_srcs([obj]))
    }

    pub fn move_exception(&mut self, dest: Reg) -> InsnId {
        self.insn(Opcode::MoveException, |i| i.with_dest(dest))
    }

    pub fn terminator(&mut self, terminator: Terminator) {
        self.cfg.block_mut(self.current_block).terminator = terminator;
    }

    pub fn goto(&mut self, target: BlockId) {
        self.terminator(Terminator::Goto { target });
    }

    pub fn if_(&mut self, op: IfOp, srcs: &[Reg], then_block: BlockId, else_block: BlockId) {
        self.terminator(Terminator::If {
            op,
            srcs: srcs.to_vec(),
            then_block,
            else_block,
        });
    }

    pub fn ret(&mut self, src: Option<Reg>) {
        self.terminator(Terminator::Return { src });
    }

    pub fn throw(&mut self, src: Reg) {
        self.terminator(Terminator::Throw { src });
    }

    /// Route exceptions raised in the current block to `target`
    pub fn catch(&mut self, catch_type: Option<TypeRef>, target: BlockId) {
        self.cfg
            .block_mut(self.current_block)
            .handlers
            .push(CatchHandler { catch_type, target });
    }

    pub fn build(mut self) -> ControlFlowGraph {
        self.cfg.recompute_registers_size();
        self.cfg
    }
}

impl Default for CfgBuilder {
    fn default() -> Self {
        Self::new()
    }
}
