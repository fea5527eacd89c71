//! Override graph
//!
//! Maps every virtual method to the methods that may run in its place when
//! a call dispatches on a receiver of some subtype. A method is *open* when
//! some concrete receiver type in scope dispatches it to code outside the
//! scope; its overriders are then not the complete set of targets.

use crate::hierarchy::ClassHierarchy;
use crate::scope::MethodId;
use dexo_util::{FxHashMap, FxHashSet, Idx};

#[derive(Debug, Default)]
pub struct OverrideGraph {
    overriders: FxHashMap<MethodId, Vec<MethodId>>,
    open: FxHashSet<MethodId>,
}

impl OverrideGraph {
    pub fn build(hierarchy: &ClassHierarchy) -> Self {
        let mut overriders = FxHashMap::default();
        let mut open = FxHashSet::default();
        for index in 0..hierarchy.num_methods() {
            let id = MethodId::from_usize(index);
            let info = hierarchy.method(id);
            if !info.is_virtual() {
                continue;
            }
            let owner = info.reference.owner();
            let subtypes = hierarchy.subtypes(owner);
            if std::iter::once(owner)
                .chain(subtypes.iter())
                .any(|ty| hierarchy.may_dispatch_out_of_scope(ty, &info.reference))
            {
                open.insert(id);
            }
            let mut found: Vec<MethodId> = subtypes
                .iter()
                .filter_map(|sub| hierarchy.resolve_virtual_from(sub, &info.reference))
                .filter(|other| *other != id)
                .collect();
            if found.is_empty() {
                continue;
            }
            found.sort_unstable();
            found.dedup();
            overriders.insert(id, found);
        }
        Self { overriders, open }
    }

    /// Some receiver of `method` may run an implementation outside the scope
    pub fn is_open(&self, method: MethodId) -> bool {
        self.open.contains(&method)
    }

    /// Methods that override `method` in some subtype, sorted by id
    pub fn overriders(&self, method: MethodId) -> &[MethodId] {
        self.overriders.get(&method).map_or(&[], Vec::as_slice)
    }

    /// Total number of override edges
    pub fn num_edges(&self) -> usize {
        self.overriders.values().map(Vec::len).sum()
    }
}
