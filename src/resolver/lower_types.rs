//! Lowering of `syn::Type`s and local type declarations into the [`TypeTable`].
//!
//! [`TypeTable`]: crate::program::TypeTable

use super::collect::{apply_rename_rule, serde_attrs, TypeDeclItem};
use super::Lowerer;
use crate::program::types::TypeKey;
use crate::program::{
    Field, NamedDef, NamedType, Primitive, TypeId, TypeKind, Variant, VariantData,
};
use std::collections::HashMap;

const SEQUENCE_TYPES: &[&str] = &[
    "Vec",
    "VecDeque",
    "HashSet",
    "BTreeSet",
    "LinkedList",
    "BinaryHeap",
    "IndexSet",
];
const MAP_TYPES: &[&str] = &["HashMap", "BTreeMap", "IndexMap"];
const POINTER_TYPES: &[&str] = &["Box", "Rc", "Arc", "Cow", "RefCell", "Cell", "Mutex", "RwLock"];

impl<'a> Lowerer<'a> {
    pub(super) fn lower_type(&mut self, ty: &syn::Type) -> TypeId {
        match ty {
            syn::Type::Path(type_path) => self.lower_type_path(&type_path.path),
            syn::Type::Reference(reference) => {
                let inner = self.lower_type(&reference.elem);
                self.program.types.pointer(inner)
            }
            syn::Type::Ptr(ptr) => {
                let inner = self.lower_type(&ptr.elem);
                self.program.types.pointer(inner)
            }
            syn::Type::Slice(slice) => {
                let inner = self.lower_type(&slice.elem);
                self.program.types.sequence(inner)
            }
            syn::Type::Array(array) => {
                let inner = self.lower_type(&array.elem);
                self.program.types.sequence(inner)
            }
            syn::Type::Tuple(tuple) if tuple.elems.is_empty() => {
                self.program.types.unknown("unit type ()")
            }
            syn::Type::Tuple(tuple) => {
                let mut elems = Vec::new();
                for elem in &tuple.elems {
                    elems.push(self.lower_type(elem));
                }
                self.program.types.tuple(elems)
            }
            syn::Type::Paren(paren) => self.lower_type(&paren.elem),
            syn::Type::Group(group) => self.lower_type(&group.elem),
            syn::Type::ImplTrait(_) => self.program.types.unknown("impl Trait"),
            syn::Type::TraitObject(_) => self.program.types.unknown("trait object"),
            _ => self.program.types.unknown("unsupported type"),
        }
    }

    fn lower_type_path(&mut self, path: &syn::Path) -> TypeId {
        let Some(last) = path.segments.last() else {
            return self.program.types.unknown("empty path");
        };
        let segments: Vec<String> = path.segments.iter().map(|s| s.ident.to_string()).collect();

        let mut args = Vec::new();
        if let syn::PathArguments::AngleBracketed(generic) = &last.arguments {
            for arg in &generic.args {
                if let syn::GenericArgument::Type(ty) = arg {
                    args.push(self.lower_type(ty));
                }
            }
        }

        if segments.len() == 1 {
            if let Some(param) = self.lookup_type_param(&segments[0]) {
                return param;
            }
            if segments[0] == "Self" {
                if let Some(self_ty) = self.self_type {
                    return self_ty;
                }
            }
        }
        self.type_from_segments(&segments, args, true)
    }

    /// Resolves a type named by path segments. `expand` applies the file's imports first.
    pub(super) fn type_from_segments(
        &mut self,
        segments: &[String],
        args: Vec<TypeId>,
        expand: bool,
    ) -> TypeId {
        let Some(name) = segments.last() else {
            return self.program.types.unknown("empty path");
        };
        match (name.as_str(), args.as_slice()) {
            ("Option", [inner]) => return self.program.types.optional(*inner),
            (n, [inner]) if SEQUENCE_TYPES.contains(&n) => {
                return self.program.types.sequence(*inner)
            }
            (n, [key, value]) if MAP_TYPES.contains(&n) => {
                return self.program.types.map(*key, *value)
            }
            (n, [inner, ..]) if POINTER_TYPES.contains(&n) => {
                return self.program.types.pointer(*inner)
            }
            _ => {}
        }
        if args.is_empty() {
            if let Some(primitive) = Primitive::from_name(name) {
                if segments.len() == 1 || name == "String" {
                    return self.program.types.primitive(primitive);
                }
            }
        }

        let expanded = if expand {
            self.expand_path(segments)
        } else {
            segments.to_vec()
        };
        if let Some(index) = self.find_type_decl(segments, &expanded) {
            return self.local_type(index, args);
        }
        self.program.types.external(&expanded.join("::"), args)
    }

    /// Type named by an already expanded `a::b::C` string, as used by constructor calls.
    pub(super) fn type_from_path_str(&mut self, path: &str) -> TypeId {
        let segments: Vec<String> = path.split("::").map(str::to_string).collect();
        if segments.len() == 1 && segments[0] == "Self" {
            if let Some(self_ty) = self.self_type {
                return self_ty;
            }
        }
        self.type_from_segments(&segments, Vec::new(), false)
    }

    fn find_type_decl(&self, written: &[String], expanded: &[String]) -> Option<usize> {
        let name = expanded.last()?;
        let candidates = self.type_decl_index.get(name)?;
        let local = if written.len() == 1 && expanded.len() == 1 {
            true
        } else {
            self.is_local_path(expanded)
        };
        if !local {
            return None;
        }
        candidates
            .iter()
            .copied()
            .find(|i| self.collected.types[*i].file == self.file)
            .or_else(|| candidates.first().copied())
    }

    fn lookup_type_param(&self, name: &str) -> Option<TypeId> {
        self.type_params.last().and_then(|params| params.get(name).copied())
    }

    /// Generic parameter names of `generics` mapped to their parameter types.
    pub(super) fn generic_params(&mut self, generics: &syn::Generics) -> HashMap<String, TypeId> {
        generics
            .type_params()
            .map(|p| {
                let name = p.ident.to_string();
                let id = self.program.types.param(&name);
                (name, id)
            })
            .collect()
    }

    /// Interns a local declaration instantiated with `args`, lowering its body on first use.
    fn local_type(&mut self, index: usize, args: Vec<TypeId>) -> TypeId {
        let key = TypeKey::Local(index, args.clone());
        if let Some(id) = self.program.types.lookup(&key) {
            return id;
        }
        let decl = self.collected.types[index];
        let name = decl.item.ident().to_string();
        let line = decl.item.ident().span().start().line;
        let origin = format!("{}:{}", self.program.file_path(decl.file).display(), line);
        let id = self.program.types.intern(
            key,
            TypeKind::Named(NamedType {
                name: name.clone(),
                path: name,
                args: args.clone(),
                def: NamedDef::Pending,
                origin: Some(origin),
            }),
        );

        let saved_file = std::mem::replace(&mut self.file, decl.file);
        let saved_self = self.self_type.replace(id);
        let mut params = HashMap::new();
        for (i, param) in decl.item.generics().type_params().enumerate() {
            let param_name = param.ident.to_string();
            let ty = match args.get(i) {
                Some(arg) => *arg,
                None => self.program.types.param(&param_name),
            };
            params.insert(param_name, ty);
        }
        self.type_params.push(params);

        let def = match decl.item {
            TypeDeclItem::Struct(item) => self.lower_struct(item),
            TypeDeclItem::Enum(item) => self.lower_enum(item),
            TypeDeclItem::Alias(item) => NamedDef::Alias(self.lower_type(&item.ty)),
        };

        self.type_params.pop();
        self.self_type = saved_self;
        self.file = saved_file;
        self.program.types.set_named_def(id, def);
        id
    }

    fn lower_struct(&mut self, item: &syn::ItemStruct) -> NamedDef {
        let container = serde_attrs(&item.attrs);
        match &item.fields {
            syn::Fields::Named(named) => NamedDef::Struct(self.lower_named_fields(
                named,
                container.rename_all.as_deref(),
                container.default,
            )),
            syn::Fields::Unnamed(unnamed) if unnamed.unnamed.len() == 1 => {
                let inner = unnamed.unnamed.iter().next().map(|f| self.lower_type(&f.ty));
                match inner {
                    Some(inner) => NamedDef::Newtype(inner),
                    None => NamedDef::Struct(Vec::new()),
                }
            }
            syn::Fields::Unnamed(unnamed) => {
                let mut elems = Vec::new();
                for field in &unnamed.unnamed {
                    elems.push(self.lower_type(&field.ty));
                }
                NamedDef::Alias(self.program.types.tuple(elems))
            }
            syn::Fields::Unit => NamedDef::Struct(Vec::new()),
        }
    }

    fn lower_named_fields(
        &mut self,
        named: &syn::FieldsNamed,
        rename_all: Option<&str>,
        container_default: bool,
    ) -> Vec<Field> {
        let mut fields = Vec::new();
        for field in &named.named {
            let name = field
                .ident
                .as_ref()
                .map(|i| i.to_string())
                .unwrap_or_default();
            let attrs = serde_attrs(&field.attrs);
            let ty = self.lower_type(&field.ty);
            let serialized_name = attrs
                .rename
                .clone()
                .unwrap_or_else(|| apply_rename_rule(rename_all, &name, false));
            fields.push(Field {
                name,
                serialized_name,
                ty,
                skip: attrs.skip,
                flatten: attrs.flatten,
                has_default: attrs.default || container_default,
            });
        }
        fields
    }

    fn lower_enum(&mut self, item: &syn::ItemEnum) -> NamedDef {
        let container = serde_attrs(&item.attrs);
        let mut variants = Vec::with_capacity(item.variants.len());
        for variant in &item.variants {
            let name = variant.ident.to_string();
            let attrs = serde_attrs(&variant.attrs);
            let data = match &variant.fields {
                syn::Fields::Unit => VariantData::Unit,
                syn::Fields::Unnamed(unnamed) if unnamed.unnamed.len() == 1 => {
                    let field = &unnamed.unnamed[0];
                    VariantData::Newtype(self.lower_type(&field.ty))
                }
                syn::Fields::Unnamed(unnamed) => {
                    let mut elems = Vec::new();
                    for field in &unnamed.unnamed {
                        elems.push(self.lower_type(&field.ty));
                    }
                    VariantData::Tuple(elems)
                }
                // Field names of struct variants are not touched by the enum's `rename_all`
                syn::Fields::Named(named) => {
                    VariantData::Struct(self.lower_named_fields(named, None, false))
                }
            };
            variants.push(Variant {
                serialized_name: attrs.rename.unwrap_or_else(|| {
                    apply_rename_rule(container.rename_all.as_deref(), &name, true)
                }),
                name,
                data,
            });
        }
        NamedDef::Enum(variants)
    }
}
