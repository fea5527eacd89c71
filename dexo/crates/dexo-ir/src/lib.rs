//! dexo-ir - Register bytecode representation
//!
//! Programs are a [`Scope`] of classes whose methods carry a
//! [`ControlFlowGraph`] body of register [`Instruction`]s. Whole-program
//! structure is answered by [`ClassHierarchy`] and [`OverrideGraph`], both
//! owned snapshots built from a scope.

pub mod builder;
pub mod cfg;
pub mod error;
pub mod hierarchy;
pub mod instruction;
pub mod opcode;
pub mod override_graph;
pub mod scope;
pub mod types;

pub use builder::CfgBuilder;
pub use cfg::{BasicBlock, BlockId, CatchHandler, ControlFlowGraph, IfOp, Terminator};
pub use error::{ParseError, ParseResult};
pub use hierarchy::{ClassHierarchy, MethodInfo, MethodSearch, ResolvedField};
pub use instruction::{InsnId, Instruction, Payload, Reg};
pub use opcode::Opcode;
pub use override_graph::OverrideGraph;
pub use scope::{AccessFlags, DexClass, DexField, DexMethod, MethodId, Scope};
pub use types::{FieldRef, MethodRef, Proto, RegKind, TypeRef};
