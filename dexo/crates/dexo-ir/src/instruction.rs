//! Straight-line instructions
//!
//! Registers are virtual and width-agnostic: a wide value occupies a single
//! [`Reg`], never a register pair. An instruction that produces a value names
//! its destination directly (there is no separate `move-result`).

use crate::opcode::Opcode;
use crate::types::{FieldRef, MethodRef, RegKind, TypeRef};
use dexo_util::define_idx;
use std::fmt;
use std::sync::Arc;

/// A virtual register
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reg(pub u32);

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

define_idx!(
    /// Identity of an instruction within one method body
    ///
    /// Ids survive block splitting and instruction insertion, so they can be
    /// recorded during analysis and looked up again while patching.
    InsnId
);

impl fmt::Display for InsnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Immediate operand of an instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Payload {
    None,
    /// Integer literal, raw bits for floating point constants
    Literal(i64),
    String(Arc<str>),
    Type(TypeRef),
    Field(FieldRef),
    Method(MethodRef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub(crate) id: InsnId,
    opcode: Opcode,
    dest: Option<Reg>,
    srcs: Vec<Reg>,
    payload: Payload,
}

impl Instruction {
    /// Create an instruction; normally reached through
    /// [`ControlFlowGraph::create_insn`](crate::ControlFlowGraph::create_insn)
    /// which hands out the id.
    pub fn new(id: InsnId, opcode: Opcode) -> Self {
        Self {
            id,
            opcode,
            dest: None,
            srcs: Vec::new(),
            payload: Payload::None,
        }
    }

    pub fn with_dest(mut self, dest: Reg) -> Self {
        self.dest = Some(dest);
        self
    }

    pub fn with_srcs(mut self, srcs: impl IntoIterator<Item = Reg>) -> Self {
        self.srcs = srcs.into_iter().collect();
        self
    }

    pub fn with_literal(mut self, literal: i64) -> Self {
        self.payload = Payload::Literal(literal);
        self
    }

    pub fn with_string(mut self, s: &str) -> Self {
        self.payload = Payload::String(Arc::from(s));
        self
    }

    pub fn with_type(mut self, ty: TypeRef) -> Self {
        self.payload = Payload::Type(ty);
        self
    }

    pub fn with_field(mut self, field: FieldRef) -> Self {
        self.payload = Payload::Field(field);
        self
    }

    pub fn with_method(mut self, method: MethodRef) -> Self {
        self.payload = Payload::Method(method);
        self
    }

    #[inline]
    pub fn id(&self) -> InsnId {
        self.id
    }

    #[inline]
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    #[inline]
    pub fn dest(&self) -> Option<Reg> {
        self.dest
    }

    #[inline]
    pub fn srcs(&self) -> &[Reg] {
        &self.srcs
    }

    /// The `i`-th source register
    ///
    /// # Panics
    ///
    /// Panics if the instruction has fewer than `i + 1` sources.
    #[inline]
    pub fn src(&self, i: usize) -> Reg {
        self.srcs[i]
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn set_dest(&mut self, dest: Option<Reg>) {
        self.dest = dest;
    }

    pub fn set_src(&mut self, i: usize, reg: Reg) {
        self.srcs[i] = reg;
    }

    pub fn literal(&self) -> Option<i64> {
        match self.payload {
            Payload::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    pub fn get_type(&self) -> Option<&TypeRef> {
        match &self.payload {
            Payload::Type(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn get_field(&self) -> Option<&FieldRef> {
        match &self.payload {
            Payload::Field(field) => Some(field),
            _ => None,
        }
    }

    pub fn get_method(&self) -> Option<&MethodRef> {
        match &self.payload {
            Payload::Method(method) => Some(method),
            _ => None,
        }
    }

    /// Register class of the value written to `dest`
    ///
    /// `None` for instructions without a result, including invokes of
    /// methods returning `V`.
    pub fn result_kind(&self) -> Option<RegKind> {
        if self.dest.is_none() {
            return None;
        }
        match self.get_method() {
            Some(method) if self.opcode.is_invoke() => method.proto().ret.reg_kind(),
            _ => self.opcode.fixed_result_kind(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        let mut sep = " ";
        if let Some(dest) = self.dest {
            write!(f, "{}{}", sep, dest)?;
            sep = ", ";
        }
        for src in &self.srcs {
            write!(f, "{}{}", sep, src)?;
            sep = ", ";
        }
        match &self.payload {
            Payload::None => Ok(()),
            Payload::Literal(lit) => write!(f, "{}#{}", sep, lit),
            Payload::String(s) => write!(f, "{}{:?}", sep, s),
            Payload::Type(ty) => write!(f, "{}{}", sep, ty),
            Payload::Field(field) => write!(f, "{}{}", sep, field),
            Payload::Method(method) => write!(f, "{}{}", sep, method),
        }
    }
}
