//! Control flow graph of a method body
//!
//! A body is a set of basic blocks indexed by [`BlockId`]. Each block holds
//! straight-line [`Instruction`]s followed by one [`Terminator`]. Exception
//! handlers are attached per block: every throwing instruction of the block,
//! and a `throw` terminator, may transfer control to each handler in order.

use crate::instruction::{InsnId, Instruction, Reg};
use crate::opcode::Opcode;
use crate::types::TypeRef;
use dexo_util::{define_idx, FxHashSet, IndexVec};
use std::fmt;

define_idx!(
    /// Basic block id
    BlockId
);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Comparison of an `if-*` terminator
///
/// The `*z` forms compare their single source against zero / null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IfOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
    Eqz,
    Nez,
    Ltz,
    Gez,
    Gtz,
    Lez,
}

impl IfOp {
    pub fn name(self) -> &'static str {
        match self {
            IfOp::Eq => "if-eq",
            IfOp::Ne => "if-ne",
            IfOp::Lt => "if-lt",
            IfOp::Ge => "if-ge",
            IfOp::Gt => "if-gt",
            IfOp::Le => "if-le",
            IfOp::Eqz => "if-eqz",
            IfOp::Nez => "if-nez",
            IfOp::Ltz => "if-ltz",
            IfOp::Gez => "if-gez",
            IfOp::Gtz => "if-gtz",
            IfOp::Lez => "if-lez",
        }
    }

    pub fn is_zero_test(self) -> bool {
        matches!(
            self,
            IfOp::Eqz | IfOp::Nez | IfOp::Ltz | IfOp::Gez | IfOp::Gtz | IfOp::Lez
        )
    }
}

/// Block terminator
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Goto {
        target: BlockId,
    },
    If {
        op: IfOp,
        srcs: Vec<Reg>,
        then_block: BlockId,
        else_block: BlockId,
    },
    Switch {
        src: Reg,
        targets: Vec<(i32, BlockId)>,
        default: BlockId,
    },
    Return {
        src: Option<Reg>,
    },
    Throw {
        src: Reg,
    },
    Unreachable,
}

impl Terminator {
    /// Normal (non-exceptional) successor blocks
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            Terminator::Goto { target } => vec![*target],
            Terminator::If {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Switch {
                targets, default, ..
            } => {
                let mut result: Vec<BlockId> = targets.iter().map(|(_, id)| *id).collect();
                result.push(*default);
                result
            },
            Terminator::Return { .. } | Terminator::Throw { .. } | Terminator::Unreachable => {
                vec![]
            },
        }
    }

    pub fn srcs(&self) -> Vec<Reg> {
        match self {
            Terminator::If { srcs, .. } => srcs.clone(),
            Terminator::Switch { src, .. } | Terminator::Throw { src } => vec![*src],
            Terminator::Return { src } => src.iter().copied().collect(),
            Terminator::Goto { .. } | Terminator::Unreachable => vec![],
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Goto { target } => write!(f, "goto {}", target),
            Terminator::If {
                op,
                srcs,
                then_block,
                else_block,
            } => {
                write!(f, "{}", op.name())?;
                for src in srcs {
                    write!(f, " {},", src)?;
                }
                write!(f, " {} else {}", then_block, else_block)
            },
            Terminator::Switch {
                src,
                targets,
                default,
            } => {
                write!(f, "switch {} [", src)?;
                for (key, target) in targets {
                    write!(f, "{} => {}, ", key, target)?;
                }
                write!(f, "_ => {}]", default)
            },
            Terminator::Return { src: Some(src) } => write!(f, "return {}", src),
            Terminator::Return { src: None } => write!(f, "return-void"),
            Terminator::Throw { src } => write!(f, "throw {}", src),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Exception handler attached to a block
#[derive(Debug, Clone, PartialEq)]
pub struct CatchHandler {
    /// Caught type, `None` for catch-all
    pub catch_type: Option<TypeRef>,
    pub target: BlockId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub insns: Vec<Instruction>,
    pub terminator: Terminator,
    pub handlers: Vec<CatchHandler>,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            insns: Vec::new(),
            terminator: Terminator::Unreachable,
            handlers: Vec::new(),
        }
    }

    /// True if some instruction or the terminator may raise an exception
    pub fn may_throw(&self) -> bool {
        matches!(self.terminator, Terminator::Throw { .. })
            || self.insns.iter().any(|insn| insn.opcode().may_throw())
    }
}

/// Method body
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFlowGraph {
    blocks: IndexVec<BlockId, BasicBlock>,
    entry: BlockId,
    registers_size: u32,
    next_insn_id: u32,
}

impl ControlFlowGraph {
    /// Empty graph with a single entry block
    pub fn new() -> Self {
        let mut blocks = IndexVec::new();
        let entry = blocks.push(BasicBlock::new(BlockId(0)));
        Self {
            blocks,
            entry,
            registers_size: 0,
            next_insn_id: 0,
        }
    }

    #[inline]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn set_entry(&mut self, entry: BlockId) {
        self.entry = entry;
    }

    #[inline]
    pub fn blocks(&self) -> &IndexVec<BlockId, BasicBlock> {
        &self.blocks
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id]
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = self.blocks.next_index();
        self.blocks.push(BasicBlock::new(id))
    }

    /// Number of registers used by the body; every register is below it
    #[inline]
    pub fn registers_size(&self) -> u32 {
        self.registers_size
    }

    /// Fresh register above every register currently in use
    pub fn allocate_temp(&mut self) -> Reg {
        let reg = Reg(self.registers_size);
        self.registers_size += 1;
        reg
    }

    /// Grow `registers_size` to cover every register mentioned in the body
    pub fn recompute_registers_size(&mut self) {
        let mut size = self.registers_size;
        for block in &self.blocks {
            let regs = block
                .insns
                .iter()
                .flat_map(|insn| insn.dest().into_iter().chain(insn.srcs().iter().copied()))
                .chain(block.terminator.srcs());
            for reg in regs {
                size = size.max(reg.0 + 1);
            }
        }
        self.registers_size = size;
    }

    /// Create an instruction with a fresh id; the caller places it
    pub fn create_insn(&mut self, opcode: Opcode) -> Instruction {
        let id = InsnId(self.next_insn_id);
        self.next_insn_id += 1;
        Instruction::new(id, opcode)
    }

    /// Copy of `insn` under a fresh id
    pub fn duplicate_insn(&mut self, insn: &Instruction) -> Instruction {
        let mut copy = insn.clone();
        copy.id = InsnId(self.next_insn_id);
        self.next_insn_id += 1;
        copy
    }

    /// Append an instruction at the end of `block`
    pub fn push_insn(&mut self, block: BlockId, insn: Instruction) -> InsnId {
        let id = insn.id();
        self.blocks[block].insns.push(insn);
        id
    }

    /// Normal successors of `block`
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.blocks[block].terminator.targets()
    }

    /// Handler blocks reachable by an exception raised in `block`
    pub fn throw_successors(&self, block: BlockId) -> Vec<BlockId> {
        let block = &self.blocks[block];
        if !block.may_throw() {
            return Vec::new();
        }
        block.handlers.iter().map(|handler| handler.target).collect()
    }

    /// Predecessors of every block over normal and exceptional edges,
    /// deduplicated, in block order
    pub fn predecessors(&self) -> IndexVec<BlockId, Vec<BlockId>> {
        let mut preds: IndexVec<BlockId, Vec<BlockId>> =
            IndexVec::from_fn_n(|_| Vec::new(), self.blocks.len());
        for id in self.blocks.indices() {
            for succ in self.successors(id).into_iter().chain(self.throw_successors(id)) {
                if !preds[succ].contains(&id) {
                    preds[succ].push(id);
                }
            }
        }
        preds
    }

    /// Blocks reachable from the entry, in reverse postorder
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = FxHashSet::default();
        let mut postorder = Vec::with_capacity(self.blocks.len());
        // (block, successors still to visit)
        let mut stack: Vec<(BlockId, Vec<BlockId>)> = Vec::new();

        visited.insert(self.entry);
        stack.push((self.entry, self.all_successors_reversed(self.entry)));

        while let Some((block, pending)) = stack.last_mut() {
            match pending.pop() {
                Some(succ) => {
                    if visited.insert(succ) {
                        let succs = self.all_successors_reversed(succ);
                        stack.push((succ, succs));
                    }
                },
                None => {
                    postorder.push(*block);
                    stack.pop();
                },
            }
        }

        postorder.reverse();
        postorder
    }

    fn all_successors_reversed(&self, block: BlockId) -> Vec<BlockId> {
        let mut succs = self.successors(block);
        succs.extend(self.throw_successors(block));
        succs.reverse();
        succs
    }

    /// Locate an instruction by id
    pub fn find_insn(&self, id: InsnId) -> Option<(BlockId, usize)> {
        self.blocks.iter_enumerated().find_map(|(block_id, block)| {
            block
                .insns
                .iter()
                .position(|insn| insn.id() == id)
                .map(|pos| (block_id, pos))
        })
    }

    /// All instructions, block by block
    pub fn instructions(&self) -> impl Iterator<Item = (BlockId, &Instruction)> + '_ {
        self.blocks
            .iter_enumerated()
            .flat_map(|(id, block)| block.insns.iter().map(move |insn| (id, insn)))
    }

    /// Leading `load-param*` instructions of the entry block
    pub fn param_insns(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.blocks[self.entry]
            .insns
            .iter()
            .take_while(|insn| insn.opcode().is_load_param())
    }

    /// Split `block` after the instruction at `pos`
    ///
    /// The instructions following `pos` and the terminator move to a new
    /// block, which inherits the handlers; `block` falls through to it with a
    /// `goto`. Returns the new block.
    pub fn split_block_after(&mut self, block: BlockId, pos: usize) -> BlockId {
        let new_id = self.add_block();
        let old = &mut self.blocks[block];
        assert!(pos < old.insns.len(), "split position {} out of range in {}", pos, block);

        let tail = old.insns.split_off(pos + 1);
        let terminator = std::mem::replace(&mut old.terminator, Terminator::Goto { target: new_id });
        let handlers = old.handlers.clone();

        let new_block = &mut self.blocks[new_id];
        new_block.insns = tail;
        new_block.terminator = terminator;
        new_block.handlers = handlers;
        new_id
    }

    /// Number of instructions in the body
    pub fn num_insns(&self) -> usize {
        self.blocks.iter().map(|block| block.insns.len()).sum()
    }
}

impl Default for ControlFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ControlFlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            write!(f, "{}:", block.id)?;
            if block.id == self.entry {
                write!(f, " (entry)")?;
            }
            writeln!(f)?;
            for insn in &block.insns {
                writeln!(f, "  {}", insn)?;
            }
            writeln!(f, "  {}", block.terminator)?;
            for handler in &block.handlers {
                match &handler.catch_type {
                    Some(ty) => writeln!(f, "  catch {} => {}", ty, handler.target)?,
                    None => writeln!(f, "  catch-all => {}", handler.target)?,
                }
            }
        }
        Ok(())
    }
}
