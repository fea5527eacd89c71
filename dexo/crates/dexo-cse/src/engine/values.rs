//! Value numbering
//!
//! A value number names a value independently of the register holding it.
//! Numbers of computations are hash-consed from the opcode, the operand
//! numbers and the immediate operand, so equal computations get equal
//! numbers. Everything else gets a *leaf* number tied to a program point:
//!
//! - `Positional(insn)`: the result of an instruction that is not a function
//!   of its operands (allocation, parameters, impure calls)
//! - `Merge(block, reg)`: the value of a register at entry to a block whose
//!   predecessors disagree on it
//! - `Clobbered(insn, reg)`: the value a register held when `insn` changed
//!   the memory its number was computed from
//!
//! A leaf number is reused each time control passes its program point, so
//! inside a loop it stands for a different concrete value on every trip.
//! Each value carries a mask of the program points of the leaves it is built
//! from; passing a program point again retires every value whose mask
//! contains it. Points get mask bits in order of first use; past 64 points
//! bits are shared, which only retires more than needed.

use dexo_ir::{BlockId, InsnId, Opcode, Payload, Reg, TypeRef};
use dexo_util::{define_idx, FxHashMap, IndexVec};

define_idx!(
    /// Value number
    ValueId
);

/// Mask bits of the locations a value was read from
pub(crate) type LocationMask = u64;

/// Mask bits of program points
pub(crate) type PointMask = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Point {
    Insn(InsnId),
    BlockEntry(BlockId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ValueKey {
    Expr {
        opcode: Opcode,
        srcs: Vec<ValueId>,
        payload: Payload,
    },
    Positional(InsnId),
    Merge(BlockId, Reg),
    Clobbered(InsnId, Reg),
}

#[derive(Debug, Clone)]
pub(crate) struct ValueInfo {
    /// Locations the value depends on, transitively
    pub locations: LocationMask,
    /// Program points of the leaves the value is built from
    pub points: PointMask,
    /// Exact runtime type, when known from an allocation
    pub exact_type: Option<TypeRef>,
}

#[derive(Debug, Default)]
pub(crate) struct ValueTable {
    ids: FxHashMap<ValueKey, ValueId>,
    values: IndexVec<ValueId, ValueInfo>,
    points: FxHashMap<Point, PointMask>,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn info(&self, id: ValueId) -> &ValueInfo {
        &self.values[id]
    }

    /// Bit of a program point some value was built from, 0 if none was
    pub fn point(&self, point: Point) -> PointMask {
        self.points.get(&point).copied().unwrap_or(0)
    }

    fn assign_point(&mut self, point: Point) -> PointMask {
        let next = 1 << (self.points.len() % PointMask::BITS as usize);
        *self.points.entry(point).or_insert(next)
    }

    fn intern(&mut self, key: ValueKey, make: impl FnOnce(&mut Self) -> ValueInfo) -> ValueId {
        if let Some(id) = self.ids.get(&key) {
            return *id;
        }
        let info = make(self);
        let id = self.values.push(info);
        self.ids.insert(key, id);
        id
    }

    /// Number of a computation over operand numbers
    ///
    /// `own` holds the bits of the location the computation itself reads.
    /// Operands of commutative opcodes are put in canonical order.
    pub fn expr(
        &mut self,
        opcode: Opcode,
        mut srcs: Vec<ValueId>,
        payload: Payload,
        own: LocationMask,
    ) -> ValueId {
        if opcode.is_commutative() {
            srcs.sort_unstable();
        }
        let key = ValueKey::Expr {
            opcode,
            srcs: srcs.clone(),
            payload,
        };
        self.intern(key, |table| {
            let mut info = ValueInfo {
                locations: own,
                points: 0,
                exact_type: None,
            };
            for src in &srcs {
                let src = table.info(*src);
                info.locations |= src.locations;
                info.points |= src.points;
            }
            info
        })
    }

    pub fn positional(&mut self, insn: InsnId, exact_type: Option<TypeRef>) -> ValueId {
        self.intern(ValueKey::Positional(insn), |table| ValueInfo {
            locations: 0,
            points: table.assign_point(Point::Insn(insn)),
            exact_type,
        })
    }

    /// Merged register values may be built from anything, so they are
    /// retired by every barrier
    pub fn merge(&mut self, block: BlockId, reg: Reg) -> ValueId {
        self.intern(ValueKey::Merge(block, reg), |table| ValueInfo {
            locations: LocationMask::MAX,
            points: table.assign_point(Point::BlockEntry(block)),
            exact_type: None,
        })
    }

    pub fn clobbered(&mut self, insn: InsnId, reg: Reg, exact_type: Option<TypeRef>) -> ValueId {
        self.intern(ValueKey::Clobbered(insn, reg), |table| ValueInfo {
            locations: 0,
            points: table.assign_point(Point::Insn(insn)),
            exact_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_computations_share_numbers() {
        let mut table = ValueTable::new();
        let a = table.positional(InsnId(0), None);
        let b = table.positional(InsnId(1), None);
        assert_ne!(a, b);
        assert_eq!(table.positional(InsnId(0), None), a);

        let x = table.expr(Opcode::AddInt, vec![a, b], Payload::None, 0);
        let y = table.expr(Opcode::AddInt, vec![b, a], Payload::None, 0);
        assert_eq!(x, y);

        let s = table.expr(Opcode::SubInt, vec![a, b], Payload::None, 0);
        let t = table.expr(Opcode::SubInt, vec![b, a], Payload::None, 0);
        assert_ne!(s, t);
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_masks_are_transitive() {
        let mut table = ValueTable::new();
        let obj = table.positional(InsnId(3), None);
        let get = table.expr(Opcode::IGet, vec![obj], Payload::Literal(0), 0b100);
        let neg = table.expr(Opcode::NegInt, vec![get], Payload::None, 0);

        assert_eq!(table.info(neg).locations, 0b100);
        assert_eq!(table.info(neg).points, table.point(Point::Insn(InsnId(3))));
        let merged = table.merge(BlockId(1), Reg(0));
        assert_eq!(table.info(merged).locations, u64::MAX);
    }

    #[test]
    fn test_points_get_distinct_bits() {
        let mut table = ValueTable::new();
        assert_eq!(table.point(Point::Insn(InsnId(0))), 0);
        for i in 0..64 {
            table.positional(InsnId(i), None);
        }
        let all = (0..64).fold(0, |mask, i| mask | table.point(Point::Insn(InsnId(i))));
        assert_eq!(all, PointMask::MAX);

        // shared once the bits run out, and stable on reuse
        let clobbered = table.clobbered(InsnId(99), Reg(0), None);
        let late = table.info(clobbered).points;
        assert_eq!(late, table.point(Point::Insn(InsnId(0))));
        let positional = table.positional(InsnId(99), None);
        assert_eq!(table.info(positional).points, late);
    }
}
