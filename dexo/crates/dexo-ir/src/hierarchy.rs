//! Class hierarchy and member resolution
//!
//! [`ClassHierarchy`] is an owned, read-only snapshot of the type structure
//! of a [`Scope`]. It does not borrow the scope, so method bodies can be
//! mutated while resolution queries are being answered.

use crate::opcode::Opcode;
use crate::scope::{AccessFlags, MethodId, Scope};
use crate::types::{FieldRef, MethodRef, TypeRef};
use dexo_util::{FxHashMap, FxHashSet, IndexVec};
use std::collections::VecDeque;

/// How an invoke looks up its callee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodSearch {
    Direct,
    Static,
    Virtual,
    Super,
    Interface,
}

impl MethodSearch {
    pub fn for_opcode(opcode: Opcode) -> Option<MethodSearch> {
        match opcode {
            Opcode::InvokeDirect => Some(MethodSearch::Direct),
            Opcode::InvokeStatic => Some(MethodSearch::Static),
            Opcode::InvokeVirtual => Some(MethodSearch::Virtual),
            Opcode::InvokeSuper => Some(MethodSearch::Super),
            Opcode::InvokeInterface => Some(MethodSearch::Interface),
            _ => None,
        }
    }

    /// Calls using this search may dispatch to overriding methods
    pub fn is_dynamic(self) -> bool {
        matches!(self, MethodSearch::Virtual | MethodSearch::Interface)
    }
}

/// A field reference resolved to its declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub reference: FieldRef,
    pub access: AccessFlags,
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub reference: MethodRef,
    pub access: AccessFlags,
    pub has_code: bool,
}

impl MethodInfo {
    /// Participates in virtual dispatch
    pub fn is_virtual(&self) -> bool {
        !self.access.is_static()
            && !self.access.is_private()
            && !self.reference.is_constructor()
            && !self.reference.is_static_initializer()
    }
}

#[derive(Debug)]
struct ClassNode {
    access: AccessFlags,
    super_class: Option<TypeRef>,
    interfaces: Vec<TypeRef>,
    fields: Vec<ResolvedField>,
    methods: Vec<MethodId>,
}

#[derive(Debug)]
pub struct ClassHierarchy {
    classes: FxHashMap<TypeRef, ClassNode>,
    /// Direct subclasses and implementors, in scope order
    children: FxHashMap<TypeRef, Vec<TypeRef>>,
    methods: IndexVec<MethodId, MethodInfo>,
}

impl ClassHierarchy {
    pub fn build(scope: &Scope) -> Self {
        let mut classes = FxHashMap::default();
        let mut children: FxHashMap<TypeRef, Vec<TypeRef>> = FxHashMap::default();

        for class in scope.classes() {
            let parents = class.super_class.iter().chain(class.interfaces.iter());
            for parent in parents {
                children.entry(parent.clone()).or_default().push(class.ty.clone());
            }
            classes.insert(
                class.ty.clone(),
                ClassNode {
                    access: class.access,
                    super_class: class.super_class.clone(),
                    interfaces: class.interfaces.clone(),
                    fields: class
                        .fields
                        .iter()
                        .map(|f| ResolvedField {
                            reference: f.reference.clone(),
                            access: f.access,
                        })
                        .collect(),
                    methods: class.methods.clone(),
                },
            );
        }

        let methods = scope
            .methods()
            .iter()
            .map(|m| MethodInfo {
                reference: m.reference.clone(),
                access: m.access,
                has_code: m.code.is_some(),
            })
            .collect();

        Self {
            classes,
            children,
            methods,
        }
    }

    pub fn contains(&self, ty: &TypeRef) -> bool {
        self.classes.contains_key(ty)
    }

    pub fn method(&self, id: MethodId) -> &MethodInfo {
        &self.methods[id]
    }

    pub fn num_methods(&self) -> usize {
        self.methods.len()
    }

    /// `ty` followed by its superclasses, as far as they are in scope
    fn super_chain<'a>(&'a self, ty: &'a TypeRef) -> impl Iterator<Item = &'a TypeRef> + 'a {
        let mut seen = FxHashSet::default();
        let mut next = Some(ty);
        std::iter::from_fn(move || {
            let current = next.take()?;
            if !seen.insert(current) {
                return None;
            }
            let node = self.classes.get(current)?;
            next = node.super_class.as_ref();
            Some(current)
        })
    }

    /// Resolve a field reference to the declaration it denotes
    ///
    /// Looks in the owner, then its superinterfaces, then up the superclass
    /// chain. `None` if no declaration is in scope.
    pub fn resolve_field(&self, field: &FieldRef) -> Option<ResolvedField> {
        let mut visited = FxHashSet::default();
        self.resolve_field_in(field.owner(), field, &mut visited)
    }

    fn resolve_field_in<'a>(
        &'a self,
        ty: &'a TypeRef,
        field: &FieldRef,
        visited: &mut FxHashSet<&'a TypeRef>,
    ) -> Option<ResolvedField> {
        if !visited.insert(ty) {
            return None;
        }
        let node = self.classes.get(ty)?;
        let declared = node
            .fields
            .iter()
            .find(|f| f.reference.name() == field.name() && f.reference.ty() == field.ty());
        if let Some(declared) = declared {
            return Some(declared.clone());
        }
        for iface in &node.interfaces {
            if let Some(found) = self.resolve_field_in(iface, field, visited) {
                return Some(found);
            }
        }
        let parent = node.super_class.as_ref()?;
        self.resolve_field_in(parent, field, visited)
    }

    /// Method declared directly in `ty` with the signature of `method`
    pub fn find_declared_method(&self, ty: &TypeRef, method: &MethodRef) -> Option<MethodId> {
        let node = self.classes.get(ty)?;
        node.methods
            .iter()
            .copied()
            .find(|id| self.methods[*id].reference.same_signature(method))
    }

    /// Resolve the callee of an invoke
    pub fn resolve_method(&self, method: &MethodRef, search: MethodSearch) -> Option<MethodId> {
        match search {
            MethodSearch::Direct => self.find_declared_method(method.owner(), method),
            MethodSearch::Static => self
                .super_chain(method.owner())
                .find_map(|ty| self.find_declared_method(ty, method))
                .filter(|id| self.methods[*id].access.is_static()),
            MethodSearch::Virtual | MethodSearch::Super => {
                self.resolve_virtual_from(method.owner(), method)
            },
            MethodSearch::Interface => self
                .find_in_interfaces(method.owner(), method)
                .or_else(|| {
                    let object = TypeRef::new("Ljava/lang/Object;");
                    self.find_declared_method(&object, method)
                }),
        }
    }

    /// The implementation a virtual call of `method` runs on a receiver of
    /// exact type `ty`
    pub fn resolve_virtual_from(&self, ty: &TypeRef, method: &MethodRef) -> Option<MethodId> {
        let from_classes = self.super_chain(ty).find_map(|t| {
            self.find_declared_method(t, method)
                .filter(|id| self.methods[*id].is_virtual())
        });
        if from_classes.is_some() {
            return from_classes;
        }
        // default methods
        let chain: Vec<&TypeRef> = self.super_chain(ty).collect();
        chain
            .into_iter()
            .find_map(|t| self.find_in_interfaces(t, method))
    }

    /// Whether a virtual call of `method` on a receiver of exact type `ty`
    /// may run code that is not in scope
    ///
    /// True for a concrete class whose implementation resolves to an
    /// abstract declaration or to nothing, and for one whose superclass
    /// chain leaves the scope before a class declares `method`: an unknown
    /// superclass may implement it or override an inherited default.
    pub fn may_dispatch_out_of_scope(&self, ty: &TypeRef, method: &MethodRef) -> bool {
        if !self.is_concrete(ty) {
            return false;
        }
        let from_classes = self.super_chain(ty).find_map(|t| {
            self.find_declared_method(t, method)
                .filter(|id| self.methods[*id].is_virtual())
        });
        if let Some(id) = from_classes {
            return self.methods[id].access.is_abstract();
        }
        if self.leaves_scope(ty) {
            return true;
        }
        self.resolve_virtual_from(ty, method)
            .map_or(true, |id| self.methods[id].access.is_abstract())
    }

    /// A class that can be instantiated
    pub fn is_concrete(&self, ty: &TypeRef) -> bool {
        self.classes
            .get(ty)
            .map_or(false, |node| !node.access.is_interface() && !node.access.is_abstract())
    }

    /// Some superclass of `ty` is missing from the scope
    fn leaves_scope(&self, ty: &TypeRef) -> bool {
        self.super_chain(ty)
            .last()
            .and_then(|last| self.classes.get(last))
            .map_or(true, |node| node.super_class.is_some())
    }

    /// Breadth-first search of `ty` and its superinterfaces, preferring a
    /// declaration with code
    fn find_in_interfaces(&self, ty: &TypeRef, method: &MethodRef) -> Option<MethodId> {
        let mut queue = VecDeque::from([ty]);
        let mut visited = FxHashSet::default();
        let mut fallback = None;
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let Some(node) = self.classes.get(current) else {
                continue;
            };
            if let Some(id) = self.find_declared_method(current, method) {
                if self.methods[id].has_code {
                    return Some(id);
                }
                fallback.get_or_insert(id);
            }
            queue.extend(node.interfaces.iter());
        }
        fallback
    }

    /// Every transitive subtype of `ty` (subclasses and implementors),
    /// excluding `ty` itself, in a deterministic order
    pub fn subtypes(&self, ty: &TypeRef) -> Vec<TypeRef> {
        let mut result = Vec::new();
        let mut visited = FxHashSet::default();
        visited.insert(ty);
        let mut queue = VecDeque::from([ty]);
        while let Some(current) = queue.pop_front() {
            for child in self.children.get(current).into_iter().flatten() {
                if visited.insert(child) {
                    result.push(child.clone());
                    queue.push_back(child);
                }
            }
        }
        result
    }

    pub fn is_interface(&self, ty: &TypeRef) -> bool {
        self.classes
            .get(ty)
            .map_or(false, |node| node.access.is_interface())
    }
}
