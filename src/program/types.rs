//! Interned type descriptors for the lowered program.
//!
//! Every distinct type gets one [`TypeId`]; two occurrences of the same type in the source
//! resolve to the same id. Local declarations are keyed by their declaration (and generic
//! arguments), so two different structs that happen to share a name stay distinct.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Str,
    Char,
    Bool,
    I8,
    I16,
    I32,
    I64,
    I128,
    Isize,
    U8,
    U16,
    U32,
    U64,
    U128,
    Usize,
    F32,
    F64,
}

impl Primitive {
    pub fn from_name(name: &str) -> Option<Self> {
        let primitive = match name {
            "String" | "str" => Primitive::Str,
            "char" => Primitive::Char,
            "bool" => Primitive::Bool,
            "i8" => Primitive::I8,
            "i16" => Primitive::I16,
            "i32" => Primitive::I32,
            "i64" => Primitive::I64,
            "i128" => Primitive::I128,
            "isize" => Primitive::Isize,
            "u8" => Primitive::U8,
            "u16" => Primitive::U16,
            "u32" => Primitive::U32,
            "u64" => Primitive::U64,
            "u128" => Primitive::U128,
            "usize" => Primitive::Usize,
            "f32" => Primitive::F32,
            "f64" => Primitive::F64,
            _ => return None,
        };
        Some(primitive)
    }

    pub fn is_integer(self) -> bool {
        !matches!(
            self,
            Primitive::Str | Primitive::Char | Primitive::Bool | Primitive::F32 | Primitive::F64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }

    pub fn rust_name(self) -> &'static str {
        match self {
            Primitive::Str => "String",
            Primitive::Char => "char",
            Primitive::Bool => "bool",
            Primitive::I8 => "i8",
            Primitive::I16 => "i16",
            Primitive::I32 => "i32",
            Primitive::I64 => "i64",
            Primitive::I128 => "i128",
            Primitive::Isize => "isize",
            Primitive::U8 => "u8",
            Primitive::U16 => "u16",
            Primitive::U32 => "u32",
            Primitive::U64 => "u64",
            Primitive::U128 => "u128",
            Primitive::Usize => "usize",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Primitive(Primitive),
    Named(NamedType),
    /// References and smart pointers (`&T`, `Box<T>`, `Arc<T>`, `Cow<T>`)
    Pointer(TypeId),
    Optional(TypeId),
    Sequence(TypeId),
    Map { key: TypeId, value: TypeId },
    Tuple(Vec<TypeId>),
    /// A generic parameter with no concrete argument
    Param(String),
    /// Anything the lowering cannot describe; carries a readable description
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedType {
    /// Declared name, e.g. `User`
    pub name: String,
    /// Resolved path; for local declarations this is the bare name
    pub path: String,
    pub args: Vec<TypeId>,
    pub def: NamedDef,
    /// `file:line` of a local declaration
    pub origin: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NamedDef {
    /// Reserved while the declaration's own fields are being lowered
    Pending,
    Struct(Vec<Field>),
    /// Single-field tuple struct
    Newtype(TypeId),
    Alias(TypeId),
    Enum(Vec<Variant>),
    /// Declared outside the analysed sources
    External,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub serialized_name: String,
    pub ty: TypeId,
    pub skip: bool,
    pub flatten: bool,
    pub has_default: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub name: String,
    pub serialized_name: String,
    pub data: VariantData,
}

impl Variant {
    pub fn is_unit(&self) -> bool {
        matches!(self.data, VariantData::Unit)
    }
}

/// Payload carried by an enum variant.
#[derive(Debug, Clone, PartialEq)]
pub enum VariantData {
    Unit,
    /// `Moved(u32)`
    Newtype(TypeId),
    Tuple(Vec<TypeId>),
    Struct(Vec<Field>),
}

/// Interning key. Local declarations are identified by their declaration index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TypeKey {
    Primitive(Primitive),
    Local(usize, Vec<TypeId>),
    External(String, Vec<TypeId>),
    Pointer(TypeId),
    Optional(TypeId),
    Sequence(TypeId),
    Map(TypeId, TypeId),
    Tuple(Vec<TypeId>),
    Param(String),
    Unknown(String),
}

#[derive(Debug, Default)]
pub struct TypeTable {
    types: Vec<TypeKind>,
    keys: HashMap<TypeKey, TypeId>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn intern(&mut self, key: TypeKey, kind: TypeKind) -> TypeId {
        if let Some(id) = self.keys.get(&key) {
            return *id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(kind);
        self.keys.insert(key, id);
        id
    }

    pub(crate) fn lookup(&self, key: &TypeKey) -> Option<TypeId> {
        self.keys.get(key).copied()
    }

    pub(crate) fn set_named_def(&mut self, id: TypeId, def: NamedDef) {
        if let Some(TypeKind::Named(named)) = self.types.get_mut(id.index()) {
            named.def = def;
        }
    }

    pub fn primitive(&mut self, primitive: Primitive) -> TypeId {
        self.intern(TypeKey::Primitive(primitive), TypeKind::Primitive(primitive))
    }

    pub fn pointer(&mut self, inner: TypeId) -> TypeId {
        self.intern(TypeKey::Pointer(inner), TypeKind::Pointer(inner))
    }

    pub fn optional(&mut self, inner: TypeId) -> TypeId {
        self.intern(TypeKey::Optional(inner), TypeKind::Optional(inner))
    }

    pub fn sequence(&mut self, inner: TypeId) -> TypeId {
        self.intern(TypeKey::Sequence(inner), TypeKind::Sequence(inner))
    }

    pub fn map(&mut self, key: TypeId, value: TypeId) -> TypeId {
        self.intern(TypeKey::Map(key, value), TypeKind::Map { key, value })
    }

    pub fn tuple(&mut self, elems: Vec<TypeId>) -> TypeId {
        self.intern(TypeKey::Tuple(elems.clone()), TypeKind::Tuple(elems))
    }

    pub fn param(&mut self, name: &str) -> TypeId {
        self.intern(
            TypeKey::Param(name.to_string()),
            TypeKind::Param(name.to_string()),
        )
    }

    pub fn unknown(&mut self, description: &str) -> TypeId {
        self.intern(
            TypeKey::Unknown(description.to_string()),
            TypeKind::Unknown(description.to_string()),
        )
    }

    /// Interns a type declared outside the analysed sources.
    pub fn external(&mut self, path: &str, args: Vec<TypeId>) -> TypeId {
        let name = path.rsplit("::").next().unwrap_or(path).to_string();
        self.intern(
            TypeKey::External(path.to_string(), args.clone()),
            TypeKind::Named(NamedType {
                name,
                path: path.to_string(),
                args,
                def: NamedDef::External,
                origin: None,
            }),
        )
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.types[id.index()]
    }

    pub fn named(&self, id: TypeId) -> Option<&NamedType> {
        match self.kind(id) {
            TypeKind::Named(named) => Some(named),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeKind)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, kind)| (TypeId(i as u32), kind))
    }

    /// Strips references and smart pointers.
    pub fn strip_pointers(&self, mut id: TypeId) -> TypeId {
        while let TypeKind::Pointer(inner) = self.kind(id) {
            id = *inner;
        }
        id
    }

    /// Returns the `index`-th generic argument of a named type, looking through pointers.
    pub fn generic_arg(&self, id: TypeId, index: usize) -> Option<TypeId> {
        self.named(self.strip_pointers(id))
            .and_then(|named| named.args.get(index).copied())
    }

    /// Last path segment of a named type, looking through pointers.
    pub fn simple_name(&self, id: TypeId) -> Option<&str> {
        self.named(self.strip_pointers(id)).map(|n| n.name.as_str())
    }

    /// Human-readable rendering used in messages and component names.
    pub fn display(&self, id: TypeId) -> String {
        match self.kind(id) {
            TypeKind::Primitive(p) => p.rust_name().to_string(),
            TypeKind::Named(named) => {
                if named.args.is_empty() {
                    named.path.clone()
                } else {
                    let args: Vec<String> = named.args.iter().map(|a| self.display(*a)).collect();
                    format!("{}<{}>", named.path, args.join(", "))
                }
            }
            TypeKind::Pointer(inner) => format!("&{}", self.display(*inner)),
            TypeKind::Optional(inner) => format!("Option<{}>", self.display(*inner)),
            TypeKind::Sequence(inner) => format!("Vec<{}>", self.display(*inner)),
            TypeKind::Map { key, value } => {
                format!("Map<{}, {}>", self.display(*key), self.display(*value))
            }
            TypeKind::Tuple(elems) => {
                let elems: Vec<String> = elems.iter().map(|e| self.display(*e)).collect();
                format!("({})", elems.join(", "))
            }
            TypeKind::Param(name) => name.clone(),
            TypeKind::Unknown(desc) => desc.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_structural() {
        let mut table = TypeTable::new();
        let s1 = table.primitive(Primitive::Str);
        let s2 = table.primitive(Primitive::Str);
        assert_eq!(s1, s2);

        let v1 = table.sequence(s1);
        let v2 = table.sequence(s2);
        assert_eq!(v1, v2);
        assert_ne!(v1, s1);
    }

    #[test]
    fn test_external_types_keyed_by_path_and_args() {
        let mut table = TypeTable::new();
        let user = table.external("crate_a::User", vec![]);
        let json_user = table.external("axum::Json", vec![user]);
        let json_user_again = table.external("axum::Json", vec![user]);
        assert_eq!(json_user, json_user_again);
        assert_eq!(table.generic_arg(json_user, 0), Some(user));
        assert_eq!(table.simple_name(json_user), Some("Json"));
        assert_eq!(table.display(json_user), "axum::Json<crate_a::User>");
    }

    #[test]
    fn test_strip_pointers() {
        let mut table = TypeTable::new();
        let s = table.primitive(Primitive::Str);
        let p = table.pointer(s);
        let pp = table.pointer(p);
        assert_eq!(table.strip_pointers(pp), s);
    }

    #[test]
    fn test_primitive_classification() {
        assert!(Primitive::U64.is_integer());
        assert!(!Primitive::F32.is_integer());
        assert!(Primitive::F64.is_float());
        assert_eq!(Primitive::from_name("String"), Some(Primitive::Str));
        assert_eq!(Primitive::from_name("Uuid"), None);
    }
}
