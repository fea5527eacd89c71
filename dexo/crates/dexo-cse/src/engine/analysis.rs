//! Forward availability analysis
//!
//! The abstract state maps registers to value numbers and available value
//! numbers to the instructions that computed them. States meet by
//! intersection; a value reaching a join from several computations keeps
//! all of them as its earlier instructions.

use super::values::{LocationMask, Point, ValueId, ValueTable};
use crate::barrier::Barrier;
use crate::location::{Location, LocationSet};
use crate::shared_state::SharedState;
use dexo_ir::{BlockId, ControlFlowGraph, Instruction, InsnId, Opcode, Payload, Reg, Terminator, TypeRef};
use dexo_util::{FxHashMap, IndexVec};
use std::collections::{BTreeMap, BTreeSet};

/// Mask bits available for individual locations; the last bit is shared
const TRACKED_LOCATION_BITS: usize = 63;

const OTHER_LOCATION_BIT: LocationMask = 1 << TRACKED_LOCATION_BITS;

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct State {
    regs: BTreeMap<Reg, ValueId>,
    available: FxHashMap<ValueId, BTreeSet<InsnId>>,
}

impl State {
    /// Meet `other` into `acc`, dropping registers the two disagree on
    fn meet_into(acc: &mut Option<State>, other: &State) {
        let Some(state) = acc else {
            *acc = Some(other.clone());
            return;
        };
        state.regs.retain(|reg, value| other.regs.get(reg) == Some(value));
        state.available.retain(|value, defs| match other.available.get(value) {
            Some(other_defs) => {
                defs.extend(other_defs.iter().copied());
                true
            },
            None => false,
        });
    }
}

/// States at the end of a block
#[derive(Debug, Clone, PartialEq)]
struct BlockOut {
    normal: State,
    /// Meet of the states at every point the block may throw to a handler
    exceptional: Option<State>,
}

/// A later instruction recomputing a value available from `earlier`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FoundForward {
    pub earlier: BTreeSet<InsnId>,
    pub later: InsnId,
}

pub(crate) struct Outcome {
    pub forwards: Vec<FoundForward>,
    pub value_ids: usize,
    pub iterations: usize,
    pub uses_other_location_bit: bool,
}

pub(crate) struct Analyzer<'a> {
    shared: &'a SharedState,
    read_locations: LocationSet,
    location_bits: FxHashMap<Location, LocationMask>,
    uses_other_location_bit: bool,
    values: ValueTable,
}

impl<'a> Analyzer<'a> {
    pub fn new(shared: &'a SharedState, cfg: &ControlFlowGraph) -> Self {
        let mut read_locations = LocationSet::new();
        for (_, insn) in cfg.instructions() {
            let opcode = insn.opcode();
            if opcode.is_field_get() || opcode.is_aget() {
                if let Some(location) = shared.access_location(insn).filter(|l| !l.is_general()) {
                    read_locations.insert(location);
                }
            } else if opcode.is_invoke() {
                if let Some(reads) = shared.conditionally_pure_read_locations(insn) {
                    read_locations.extend(reads.iter().filter(|l| !l.is_general()).cloned());
                }
            }
        }

        let location_bits = read_locations
            .iter()
            .enumerate()
            .map(|(i, location)| {
                let bit = if i < TRACKED_LOCATION_BITS { 1 << i } else { OTHER_LOCATION_BIT };
                (location.clone(), bit)
            })
            .collect();

        Self {
            shared,
            uses_other_location_bit: read_locations.len() > TRACKED_LOCATION_BITS,
            read_locations,
            location_bits,
            values: ValueTable::new(),
        }
    }

    fn location_mask(&self, location: &Location) -> LocationMask {
        match location {
            Location::GeneralMemoryBarrier => LocationMask::MAX,
            _ => self.location_bits.get(location).copied().unwrap_or(0),
        }
    }

    /// Run to a fixpoint, then replay once to collect forwards
    pub fn run(mut self, cfg: &ControlFlowGraph) -> Outcome {
        let rpo = cfg.reverse_postorder();
        let preds = cfg.predecessors();
        let mut outs: IndexVec<BlockId, Option<BlockOut>> =
            IndexVec::from_fn_n(|_| None, cfg.blocks().len());

        let mut iterations = 0;
        loop {
            iterations += 1;
            let mut changed = false;
            for block in &rpo {
                let Some(entry) = self.entry_state(cfg, *block, &preds[*block], &outs) else {
                    continue;
                };
                let out = self.analyze_block(cfg, *block, entry, None);
                if outs[*block].as_ref() != Some(&out) {
                    outs[*block] = Some(out);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut forwards = Vec::new();
        for block in &rpo {
            if let Some(entry) = self.entry_state(cfg, *block, &preds[*block], &outs) {
                self.analyze_block(cfg, *block, entry, Some(&mut forwards));
            }
        }
        log::trace!(
            "{} blocks, {} value numbers, {} rounds, {} forwards",
            rpo.len(),
            self.values.len(),
            iterations,
            forwards.len()
        );

        Outcome {
            forwards,
            value_ids: self.values.len(),
            iterations,
            uses_other_location_bit: self.uses_other_location_bit,
        }
    }

    /// Meet of the states flowing into `block`, `None` while no predecessor
    /// has been reached
    fn entry_state(
        &mut self,
        cfg: &ControlFlowGraph,
        block: BlockId,
        preds: &[BlockId],
        outs: &IndexVec<BlockId, Option<BlockOut>>,
    ) -> Option<State> {
        let method_entry = State::default();
        let mut inputs: Vec<&State> = Vec::new();
        if block == cfg.entry() {
            inputs.push(&method_entry);
        }
        for pred in preds {
            let Some(out) = &outs[*pred] else {
                continue;
            };
            if cfg.successors(*pred).contains(&block) {
                inputs.push(&out.normal);
            }
            if let Some(exceptional) = &out.exceptional {
                if cfg.throw_successors(*pred).contains(&block) {
                    inputs.push(exceptional);
                }
            }
        }
        let (first, rest) = inputs.split_first()?;

        let point = self.values.point(Point::BlockEntry(block));
        let mut state = State::default();
        for (reg, value) in &first.regs {
            let mut agreed = true;
            let mut everywhere = true;
            for other in rest {
                match other.regs.get(reg) {
                    Some(v) => agreed &= v == value,
                    None => everywhere = false,
                }
            }
            if !everywhere {
                continue;
            }
            let value = if agreed && self.values.info(*value).points & point == 0 {
                *value
            } else {
                self.values.merge(block, *reg)
            };
            state.regs.insert(*reg, value);
        }
        for (value, defs) in &first.available {
            if self.values.info(*value).points & point != 0 {
                continue;
            }
            let mut defs = defs.clone();
            let everywhere = rest.iter().all(|other| match other.available.get(value) {
                Some(other_defs) => {
                    defs.extend(other_defs.iter().copied());
                    true
                },
                None => false,
            });
            if everywhere {
                state.available.insert(*value, defs);
            }
        }
        Some(state)
    }

    fn analyze_block(
        &mut self,
        cfg: &ControlFlowGraph,
        block: BlockId,
        mut state: State,
        mut forwards: Option<&mut Vec<FoundForward>>,
    ) -> BlockOut {
        let block = cfg.block(block);
        let has_handlers = !block.handlers.is_empty();
        let mut exceptional = None;

        for insn in &block.insns {
            let value = self.forwardable_value(&state, insn);
            let available = value.and_then(|value| state.available.get(&value));
            if let (Some(forwards), Some(earlier)) = (forwards.as_deref_mut(), available) {
                forwards.push(FoundForward {
                    earlier: earlier.clone(),
                    later: insn.id(),
                });
            }
            let is_available = available.is_some();

            self.apply_barrier(&mut state, insn, value, forwards.is_some());
            if has_handlers && insn.opcode().may_throw() {
                State::meet_into(&mut exceptional, &state);
            }
            self.define(&mut state, insn, value, is_available);
            self.capture(&mut state, insn);
        }
        if has_handlers && matches!(block.terminator, Terminator::Throw { .. }) {
            State::meet_into(&mut exceptional, &state);
        }

        BlockOut {
            normal: state,
            exceptional,
        }
    }

    /// Value number of the result of a forwardable instruction, `None` if
    /// the instruction cannot be forwarded or some operand is unknown
    fn forwardable_value(&mut self, state: &State, insn: &Instruction) -> Option<ValueId> {
        insn.dest()?;
        let srcs = insn
            .srcs()
            .iter()
            .map(|reg| state.regs.get(reg).copied())
            .collect::<Option<Vec<_>>>()?;
        let opcode = insn.opcode();

        if opcode.is_field_get() || opcode.is_aget() {
            let location = self.shared.access_location(insn)?;
            if location.is_general() {
                return None;
            }
            let own = self.location_mask(&location);
            let payload = match location {
                Location::Field(field) => Payload::Field(field),
                _ => Payload::None,
            };
            return Some(self.values.expr(opcode, srcs, payload, own));
        }
        if opcode.is_invoke() {
            let own = if let Some(reads) = self.shared.conditionally_pure_read_locations(insn) {
                reads.iter().fold(0, |mask, location| mask | self.location_mask(location))
            } else if self.shared.has_pure_method(insn) {
                0
            } else {
                return None;
            };
            return Some(self.values.expr(opcode, srcs, insn.payload().clone(), own));
        }
        let computes = opcode.is_unop()
            || opcode.is_binop()
            || opcode.is_binop_lit()
            || opcode.is_cmp()
            || matches!(opcode, Opcode::InstanceOf | Opcode::ArrayLength);
        if computes {
            return Some(self.values.expr(opcode, srcs, insn.payload().clone(), 0));
        }
        None
    }

    /// Instructions whose result gets a fresh leaf number
    fn defines_leaf(insn: &Instruction, value: Option<ValueId>) -> bool {
        let opcode = insn.opcode();
        insn.dest().is_some()
            && value.is_none()
            && !opcode.is_move()
            && !opcode.is_const()
            && opcode != Opcode::CheckCast
    }

    fn exact_virtual_scope(&self, state: &State, insn: &Instruction) -> Option<TypeRef> {
        if !matches!(insn.opcode(), Opcode::InvokeVirtual | Opcode::InvokeInterface) {
            return None;
        }
        let receiver = state.regs.get(insn.srcs().first()?)?;
        self.values.info(*receiver).exact_type.clone()
    }

    /// Retire what `insn` may overwrite, along with the values built on the
    /// previous occurrence of the leaf it is about to define
    fn apply_barrier(&mut self, state: &mut State, insn: &Instruction, value: Option<ValueId>, log: bool) {
        let exact = self.exact_virtual_scope(state, insn);
        let written = self
            .shared
            .get_relevant_written_location(insn, exact.as_ref(), &self.read_locations);
        if log && written.is_some() {
            self.shared.log_barrier(Barrier::from_insn(insn));
        }

        let locations = written.as_ref().map_or(0, |location| self.location_mask(location));
        if locations == 0 && !Self::defines_leaf(insn, value) {
            return;
        }
        let points = self.values.point(Point::Insn(insn.id()));

        let retired = |values: &ValueTable, value: &ValueId| {
            let info = values.info(*value);
            info.locations & locations != 0 || info.points & points != 0
        };
        state.available.retain(|value, _| !retired(&self.values, value));
        let clobbered: Vec<(Reg, ValueId)> = state
            .regs
            .iter()
            .filter(|(_, value)| retired(&self.values, value))
            .map(|(reg, value)| (*reg, *value))
            .collect();
        for (reg, value) in clobbered {
            let exact_type = self.values.info(value).exact_type.clone();
            let clobbered = self.values.clobbered(insn.id(), reg, exact_type);
            state.regs.insert(reg, clobbered);
        }
    }

    fn define(&mut self, state: &mut State, insn: &Instruction, value: Option<ValueId>, is_available: bool) {
        let Some(dest) = insn.dest() else {
            return;
        };
        let opcode = insn.opcode();
        let defined = if let Some(value) = value {
            if !is_available {
                state.available.insert(value, BTreeSet::from([insn.id()]));
            }
            Some(value)
        } else if opcode.is_move() || opcode == Opcode::CheckCast {
            state.regs.get(&insn.src(0)).copied()
        } else if opcode.is_const() {
            Some(self.values.expr(opcode, Vec::new(), insn.payload().clone(), 0))
        } else {
            let exact_type = match opcode {
                Opcode::NewInstance | Opcode::NewArray | Opcode::FilledNewArray => insn.get_type().cloned(),
                _ => None,
            };
            Some(self.values.positional(insn.id(), exact_type))
        };
        match defined {
            Some(value) => state.regs.insert(dest, value),
            None => state.regs.remove(&dest),
        };
    }

    /// Make values stored or allocated by `insn` available to later reads
    fn capture(&mut self, state: &mut State, insn: &Instruction) {
        let opcode = insn.opcode();
        if opcode.is_field_put() || opcode.is_aput() {
            let Some(location) = self.shared.access_location(insn) else {
                return;
            };
            if !self.read_locations.contains(&location) {
                return;
            }
            let Some(get) = opcode.put_to_get() else {
                return;
            };
            // the stored value comes first, the address follows
            let Some(srcs) = insn.srcs()[1..]
                .iter()
                .map(|reg| state.regs.get(reg).copied())
                .collect::<Option<Vec<_>>>()
            else {
                return;
            };
            let own = self.location_mask(&location);
            let payload = match location {
                Location::Field(field) => Payload::Field(field),
                _ => Payload::None,
            };
            let value = self.values.expr(get, srcs, payload, own);
            state.available.insert(value, BTreeSet::from([insn.id()]));
        } else if opcode == Opcode::NewArray {
            let Some(array) = insn.dest().and_then(|dest| state.regs.get(&dest).copied()) else {
                return;
            };
            let value = self.values.expr(Opcode::ArrayLength, vec![array], Payload::None, 0);
            state.available.insert(value, BTreeSet::from([insn.id()]));
        }
    }
}
