//! Classes, members and the whole-program scope

use crate::cfg::ControlFlowGraph;
use crate::types::{FieldRef, MethodRef, TypeRef};
use dexo_util::{define_idx, FxHashMap, IndexVec};
use indexmap::IndexMap;
use std::fmt;
use std::ops::BitOr;

/// Access flags of a class or member
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessFlags(pub u32);

impl AccessFlags {
    pub const NONE: AccessFlags = AccessFlags(0);
    pub const PUBLIC: AccessFlags = AccessFlags(0x1);
    pub const PRIVATE: AccessFlags = AccessFlags(0x2);
    pub const PROTECTED: AccessFlags = AccessFlags(0x4);
    pub const STATIC: AccessFlags = AccessFlags(0x8);
    pub const FINAL: AccessFlags = AccessFlags(0x10);
    pub const SYNCHRONIZED: AccessFlags = AccessFlags(0x20);
    pub const VOLATILE: AccessFlags = AccessFlags(0x40);
    pub const NATIVE: AccessFlags = AccessFlags(0x100);
    pub const INTERFACE: AccessFlags = AccessFlags(0x200);
    pub const ABSTRACT: AccessFlags = AccessFlags(0x400);
    pub const CONSTRUCTOR: AccessFlags = AccessFlags(0x10000);

    #[inline]
    pub fn contains(self, other: AccessFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    pub fn is_private(self) -> bool {
        self.contains(Self::PRIVATE)
    }

    pub fn is_volatile(self) -> bool {
        self.contains(Self::VOLATILE)
    }

    pub fn is_abstract(self) -> bool {
        self.contains(Self::ABSTRACT)
    }

    pub fn is_interface(self) -> bool {
        self.contains(Self::INTERFACE)
    }

    pub fn is_final(self) -> bool {
        self.contains(Self::FINAL)
    }
}

impl BitOr for AccessFlags {
    type Output = AccessFlags;

    fn bitor(self, rhs: AccessFlags) -> AccessFlags {
        AccessFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for AccessFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessFlags({:#x})", self.0)
    }
}

define_idx!(
    /// Index of a method in the [`Scope`] method table
    MethodId
);

#[derive(Debug, Clone)]
pub struct DexField {
    pub reference: FieldRef,
    pub access: AccessFlags,
}

#[derive(Debug, Clone)]
pub struct DexMethod {
    pub reference: MethodRef,
    pub access: AccessFlags,
    /// Body; `None` for abstract, native and external methods
    pub code: Option<ControlFlowGraph>,
}

impl DexMethod {
    pub fn is_static(&self) -> bool {
        self.access.is_static()
    }

    /// Participates in virtual dispatch
    pub fn is_virtual(&self) -> bool {
        !self.access.is_static()
            && !self.access.is_private()
            && !self.reference.is_constructor()
            && !self.reference.is_static_initializer()
    }
}

#[derive(Debug, Clone)]
pub struct DexClass {
    pub ty: TypeRef,
    pub super_class: Option<TypeRef>,
    pub interfaces: Vec<TypeRef>,
    pub access: AccessFlags,
    pub fields: Vec<DexField>,
    pub methods: Vec<MethodId>,
}

impl DexClass {
    pub fn new(ty: TypeRef, super_class: Option<TypeRef>) -> Self {
        Self {
            ty,
            super_class,
            interfaces: Vec::new(),
            access: AccessFlags::PUBLIC,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn with_interfaces(mut self, interfaces: Vec<TypeRef>) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn with_access(mut self, access: AccessFlags) -> Self {
        self.access = access;
        self
    }

    pub fn is_interface(&self) -> bool {
        self.access.is_interface()
    }
}

/// Every class of the program being optimized
///
/// Classes are kept in insertion order, so iterating a scope is
/// deterministic. Methods live in one flat table indexed by [`MethodId`],
/// which lets a pass hand out disjoint mutable borrows of method bodies.
#[derive(Debug, Default)]
pub struct Scope {
    classes: IndexMap<TypeRef, DexClass>,
    methods: IndexVec<MethodId, DexMethod>,
    method_ids: FxHashMap<MethodRef, MethodId>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a class
    ///
    /// # Panics
    ///
    /// Panics if a class of the same type was already added.
    pub fn add_class(&mut self, class: DexClass) {
        let ty = class.ty.clone();
        let previous = self.classes.insert(ty.clone(), class);
        assert!(previous.is_none(), "duplicate class {}", ty);
    }

    /// Declare a field on its owner class
    ///
    /// # Panics
    ///
    /// Panics if the owner class is not in the scope.
    pub fn add_field(&mut self, reference: FieldRef, access: AccessFlags) {
        let class = match self.classes.get_mut(reference.owner()) {
            Some(class) => class,
            None => panic!("field {} added before its class", reference),
        };
        class.fields.push(DexField { reference, access });
    }

    /// Declare a method on its owner class
    ///
    /// # Panics
    ///
    /// Panics if the owner class is not in the scope or the method was
    /// already declared.
    pub fn add_method(
        &mut self,
        reference: MethodRef,
        access: AccessFlags,
        code: Option<ControlFlowGraph>,
    ) -> MethodId {
        assert!(
            !self.method_ids.contains_key(&reference),
            "duplicate method {}",
            reference
        );
        let id = self.methods.push(DexMethod {
            reference: reference.clone(),
            access,
            code,
        });
        match self.classes.get_mut(reference.owner()) {
            Some(class) => class.methods.push(id),
            None => panic!("method {} added before its class", reference),
        }
        self.method_ids.insert(reference, id);
        id
    }

    pub fn class(&self, ty: &TypeRef) -> Option<&DexClass> {
        self.classes.get(ty)
    }

    pub fn classes(&self) -> impl Iterator<Item = &DexClass> + '_ {
        self.classes.values()
    }

    pub fn method(&self, id: MethodId) -> &DexMethod {
        &self.methods[id]
    }

    /// Id of a method declared in the scope, by exact reference
    pub fn method_id(&self, reference: &MethodRef) -> Option<MethodId> {
        self.method_ids.get(reference).copied()
    }

    pub fn methods(&self) -> &IndexVec<MethodId, DexMethod> {
        &self.methods
    }

    pub fn methods_mut(&mut self) -> &mut IndexVec<MethodId, DexMethod> {
        &mut self.methods
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }
}
