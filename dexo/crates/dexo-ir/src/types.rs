//! Type, field and method references
//!
//! References are canonical *values*: two references to the same member are
//! equal, hash alike and order alike no matter which instruction they were
//! read from or in which order the program was loaded. Ordering is by owner
//! descriptor, then name, then type, so sorted containers keyed by references
//! are deterministic across runs.
//!
//! Textual forms follow the usual bytecode descriptor syntax:
//!
//! ```text
//! type    I  J  Z  Lcom/example/Foo;  [I
//! field   Lcom/example/Foo;.count:I
//! method  Lcom/example/Foo;.add:(IJ)J
//! ```

use crate::error::{ParseError, ParseResult};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Register class of a value: how it is moved between registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegKind {
    /// 32-bit primitive (int, float, boolean, byte, char, short)
    Normal,
    /// 64-bit primitive (long, double)
    Wide,
    /// Object or array reference
    Object,
}

/// A type descriptor such as `I` or `Ljava/lang/String;`
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(Arc<str>);

impl TypeRef {
    /// Create a type reference from a descriptor
    ///
    /// # Panics
    ///
    /// Panics if `descriptor` is not a single well-formed type descriptor.
    /// Use [`str::parse`] for untrusted input.
    pub fn new(descriptor: &str) -> Self {
        match descriptor.parse() {
            Ok(ty) => ty,
            Err(err) => panic!("{}", err),
        }
    }

    pub fn descriptor(&self) -> &str {
        &self.0
    }

    pub fn is_void(&self) -> bool {
        &*self.0 == "V"
    }

    pub fn is_primitive(&self) -> bool {
        self.0.len() == 1
    }

    pub fn is_wide(&self) -> bool {
        matches!(&*self.0, "J" | "D")
    }

    pub fn is_array(&self) -> bool {
        self.0.starts_with('[')
    }

    pub fn is_object(&self) -> bool {
        !self.is_primitive()
    }

    /// Element type of an array type
    pub fn component(&self) -> Option<TypeRef> {
        self.0.strip_prefix('[').map(|c| TypeRef(Arc::from(c)))
    }

    /// How values of this type live in registers; `None` for `V`
    pub fn reg_kind(&self) -> Option<RegKind> {
        if self.is_void() {
            None
        } else if self.is_wide() {
            Some(RegKind::Wide)
        } else if self.is_object() {
            Some(RegKind::Object)
        } else {
            Some(RegKind::Normal)
        }
    }
}

/// Split one type descriptor off the front of `s`
fn split_type(s: &str) -> Option<(&str, &str)> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while bytes.get(i) == Some(&b'[') {
        i += 1;
    }
    let end = match bytes.get(i)? {
        b'V' if i == 0 => i + 1,
        b'Z' | b'B' | b'S' | b'C' | b'I' | b'J' | b'F' | b'D' => i + 1,
        b'L' => {
            let semi = s[i..].find(';')? + i;
            if semi == i + 1 {
                return None;
            }
            semi + 1
        },
        _ => return None,
    };
    Some(s.split_at(end))
}

impl FromStr for TypeRef {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        match split_type(s) {
            Some((ty, "")) => Ok(TypeRef(Arc::from(ty))),
            _ => Err(ParseError::InvalidType(s.to_string())),
        }
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Method prototype: return type and parameter types
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Proto {
    pub ret: TypeRef,
    pub params: Vec<TypeRef>,
}

impl Proto {
    pub fn new(ret: TypeRef, params: Vec<TypeRef>) -> Self {
        Self { ret, params }
    }
}

impl FromStr for Proto {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        let invalid = || ParseError::InvalidProto(s.to_string());
        let body = s.strip_prefix('(').ok_or_else(invalid)?;
        let close = body.find(')').ok_or_else(invalid)?;
        let (mut args, ret) = (&body[..close], &body[close + 1..]);

        let mut params = Vec::new();
        while !args.is_empty() {
            let (ty, rest) = split_type(args).ok_or_else(invalid)?;
            if ty == "V" {
                return Err(invalid());
            }
            params.push(TypeRef(Arc::from(ty)));
            args = rest;
        }
        let ret = ret.parse().map_err(|_| invalid())?;
        Ok(Proto { ret, params })
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for param in &self.params {
            write!(f, "{}", param)?;
        }
        write!(f, "){}", self.ret)
    }
}

#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldSpec {
    pub owner: TypeRef,
    pub name: Arc<str>,
    pub ty: TypeRef,
}

/// Reference to a field, as written in an instruction
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef(Arc<FieldSpec>);

impl FieldRef {
    pub fn new(owner: TypeRef, name: &str, ty: TypeRef) -> Self {
        assert!(!name.is_empty(), "field name must not be empty");
        FieldRef(Arc::new(FieldSpec {
            owner,
            name: Arc::from(name),
            ty,
        }))
    }

    pub fn owner(&self) -> &TypeRef {
        &self.0.owner
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn ty(&self) -> &TypeRef {
        &self.0.ty
    }

    /// Same name and type, different owner
    pub fn with_owner(&self, owner: TypeRef) -> Self {
        FieldRef::new(owner, self.name(), self.ty().clone())
    }
}

/// Split `Lowner;.name:sig` into its three parts
fn split_member(s: &str) -> ParseResult<(TypeRef, &str, &str)> {
    let (owner, rest) = split_type(s)
        .filter(|(owner, _)| owner.starts_with('L') || owner.starts_with('['))
        .ok_or_else(|| ParseError::InvalidType(s.to_string()))?;
    let rest = rest
        .strip_prefix('.')
        .ok_or_else(|| ParseError::MissingOwner(s.to_string()))?;
    let (name, sig) = rest
        .split_once(':')
        .ok_or_else(|| ParseError::MissingSignature(s.to_string()))?;
    if name.is_empty() {
        return Err(ParseError::EmptyName(s.to_string()));
    }
    Ok((TypeRef(Arc::from(owner)), name, sig))
}

impl FromStr for FieldRef {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        let (owner, name, ty) = split_member(s)?;
        Ok(FieldRef::new(owner, name, ty.parse()?))
    }
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.owner(), self.name(), self.ty())
    }
}

#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodSpec {
    pub owner: TypeRef,
    pub name: Arc<str>,
    pub proto: Proto,
}

/// Reference to a method, as written in an invoke instruction
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef(Arc<MethodSpec>);

impl MethodRef {
    pub fn new(owner: TypeRef, name: &str, proto: Proto) -> Self {
        assert!(!name.is_empty(), "method name must not be empty");
        MethodRef(Arc::new(MethodSpec {
            owner,
            name: Arc::from(name),
            proto,
        }))
    }

    pub fn owner(&self) -> &TypeRef {
        &self.0.owner
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn proto(&self) -> &Proto {
        &self.0.proto
    }

    pub fn is_constructor(&self) -> bool {
        self.name() == "<init>"
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name() == "<clinit>"
    }

    /// Same name and prototype, different owner
    pub fn with_owner(&self, owner: TypeRef) -> Self {
        MethodRef::new(owner, self.name(), self.proto().clone())
    }

    /// True if `other` has the same name and prototype
    pub fn same_signature(&self, other: &MethodRef) -> bool {
        self.name() == other.name() && self.proto() == other.proto()
    }
}

impl FromStr for MethodRef {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        let (owner, name, proto) = split_member(s)?;
        Ok(MethodRef::new(owner, name, proto.parse()?))
    }
}

impl fmt::Debug for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.owner(), self.name(), self.proto())
    }
}
