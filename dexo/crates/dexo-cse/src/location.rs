//! Memory locations
//!
//! A [`Location`] is the unit of alias tracking: two accesses may alias only
//! if they have the same location, and a write to
//! [`Location::GeneralMemoryBarrier`] may alias everything.

use dexo_ir::{FieldRef, Opcode};
use std::collections::BTreeSet;
use std::fmt;

/// Component class of an array access
///
/// `aget`/`aput` serve both `int` and `float` arrays, so they share
/// [`ArrayKind::Int`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArrayKind {
    Int,
    Byte,
    Char,
    Wide,
    Short,
    Object,
    Boolean,
}

impl ArrayKind {
    pub fn for_opcode(opcode: Opcode) -> Option<ArrayKind> {
        use Opcode::*;
        Some(match opcode {
            AGet | APut => ArrayKind::Int,
            AGetByte | APutByte => ArrayKind::Byte,
            AGetChar | APutChar => ArrayKind::Char,
            AGetWide | APutWide => ArrayKind::Wide,
            AGetShort | APutShort => ArrayKind::Short,
            AGetObject | APutObject => ArrayKind::Object,
            AGetBoolean | APutBoolean => ArrayKind::Boolean,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            ArrayKind::Int => "int",
            ArrayKind::Byte => "byte",
            ArrayKind::Char => "char",
            ArrayKind::Wide => "wide",
            ArrayKind::Short => "short",
            ArrayKind::Object => "object",
            ArrayKind::Boolean => "boolean",
        }
    }
}

/// Something an instruction can read or write
///
/// The derived order puts the general barrier first, then array components
/// in [`ArrayKind`] order, then fields by owner, name and type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Location {
    GeneralMemoryBarrier,
    ArrayComponent(ArrayKind),
    /// A resolved, non-volatile field
    Field(FieldRef),
}

impl Location {
    /// Location of an array access opcode
    pub fn for_array_opcode(opcode: Opcode) -> Option<Location> {
        ArrayKind::for_opcode(opcode).map(Location::ArrayComponent)
    }

    pub fn is_general(&self) -> bool {
        matches!(self, Location::GeneralMemoryBarrier)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::GeneralMemoryBarrier => f.write_str("general-memory-barrier"),
            Location::ArrayComponent(kind) => write!(f, "array-component-{}", kind.name()),
            Location::Field(field) => write!(f, "{}", field),
        }
    }
}

/// Sorted set of locations
pub type LocationSet = BTreeSet<Location>;
