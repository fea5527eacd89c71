//! Barrier identities, used to count which instructions invalidate values

use dexo_ir::{FieldRef, Instruction, MethodRef, Opcode, Payload};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BarrierTarget {
    None,
    Field(FieldRef),
    Method(MethodRef),
}

/// An opcode together with the member it refers to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Barrier {
    pub opcode: Opcode,
    pub target: BarrierTarget,
}

impl Barrier {
    pub fn from_insn(insn: &Instruction) -> Self {
        let target = match insn.payload() {
            Payload::Field(field) => BarrierTarget::Field(field.clone()),
            Payload::Method(method) => BarrierTarget::Method(method.clone()),
            _ => BarrierTarget::None,
        };
        Self {
            opcode: insn.opcode(),
            target,
        }
    }
}

impl fmt::Display for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            BarrierTarget::None => write!(f, "{}", self.opcode),
            BarrierTarget::Field(field) => write!(f, "{} {}", self.opcode, field),
            BarrierTarget::Method(method) => write!(f, "{} {}", self.opcode, method),
        }
    }
}
