//! First lowering pass: gathers item declarations, imports and module names across all files.

use crate::program::FileId;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use syn::visit::{self, Visit};
use syn::Token;

#[derive(Clone, Copy)]
pub(super) enum TypeDeclItem<'a> {
    Struct(&'a syn::ItemStruct),
    Enum(&'a syn::ItemEnum),
    Alias(&'a syn::ItemType),
}

impl<'a> TypeDeclItem<'a> {
    pub(super) fn generics(&self) -> &'a syn::Generics {
        match self {
            TypeDeclItem::Struct(item) => &item.generics,
            TypeDeclItem::Enum(item) => &item.generics,
            TypeDeclItem::Alias(item) => &item.generics,
        }
    }

    pub(super) fn ident(&self) -> &'a syn::Ident {
        match self {
            TypeDeclItem::Struct(item) => &item.ident,
            TypeDeclItem::Enum(item) => &item.ident,
            TypeDeclItem::Alias(item) => &item.ident,
        }
    }
}

#[derive(Clone, Copy)]
pub(super) struct TypeDecl<'a> {
    pub file: FileId,
    pub item: TypeDeclItem<'a>,
}

#[derive(Clone, Copy)]
pub(super) struct FnDecl<'a> {
    pub file: FileId,
    pub sig: &'a syn::Signature,
    pub block: &'a syn::Block,
    pub attrs: &'a [syn::Attribute],
    pub impl_ty: Option<&'a syn::Type>,
    pub impl_generics: Option<&'a syn::Generics>,
}

#[derive(Clone, Copy)]
pub(super) struct ConstDecl<'a> {
    pub file: FileId,
    pub ident: &'a syn::Ident,
    pub ty: &'a syn::Type,
    pub expr: &'a syn::Expr,
}

#[derive(Default)]
pub(super) struct Collected<'a> {
    pub types: Vec<TypeDecl<'a>>,
    pub fns: Vec<FnDecl<'a>>,
    pub consts: Vec<ConstDecl<'a>>,
    /// Per file: imported name -> full path
    pub imports: Vec<HashMap<String, String>>,
    /// Names of modules declared in, or implied by the files of, the analysed crate
    pub modules: HashSet<String>,
}

pub(super) struct ItemCollector<'a, 'c> {
    pub file: FileId,
    pub out: &'c mut Collected<'a>,
    current_impl: Option<(&'a syn::Type, &'a syn::Generics)>,
}

impl<'a, 'c> ItemCollector<'a, 'c> {
    pub fn new(file: FileId, out: &'c mut Collected<'a>) -> Self {
        Self {
            file,
            out,
            current_impl: None,
        }
    }
}

impl<'a, 'c> Visit<'a> for ItemCollector<'a, 'c> {
    fn visit_item_fn(&mut self, node: &'a syn::ItemFn) {
        self.out.fns.push(FnDecl {
            file: self.file,
            sig: &node.sig,
            block: &node.block,
            attrs: &node.attrs,
            impl_ty: None,
            impl_generics: None,
        });
        visit::visit_item_fn(self, node);
    }

    fn visit_item_impl(&mut self, node: &'a syn::ItemImpl) {
        let saved = self.current_impl.replace((&node.self_ty, &node.generics));
        visit::visit_item_impl(self, node);
        self.current_impl = saved;
    }

    fn visit_impl_item_fn(&mut self, node: &'a syn::ImplItemFn) {
        self.out.fns.push(FnDecl {
            file: self.file,
            sig: &node.sig,
            block: &node.block,
            attrs: &node.attrs,
            impl_ty: self.current_impl.map(|(ty, _)| ty),
            impl_generics: self.current_impl.map(|(_, generics)| generics),
        });
        visit::visit_impl_item_fn(self, node);
    }

    // Trait default bodies are not lowered
    fn visit_item_trait(&mut self, _node: &'a syn::ItemTrait) {}

    fn visit_item_struct(&mut self, node: &'a syn::ItemStruct) {
        self.out.types.push(TypeDecl {
            file: self.file,
            item: TypeDeclItem::Struct(node),
        });
    }

    fn visit_item_enum(&mut self, node: &'a syn::ItemEnum) {
        self.out.types.push(TypeDecl {
            file: self.file,
            item: TypeDeclItem::Enum(node),
        });
    }

    fn visit_item_type(&mut self, node: &'a syn::ItemType) {
        self.out.types.push(TypeDecl {
            file: self.file,
            item: TypeDeclItem::Alias(node),
        });
    }

    fn visit_item_const(&mut self, node: &'a syn::ItemConst) {
        self.out.consts.push(ConstDecl {
            file: self.file,
            ident: &node.ident,
            ty: &node.ty,
            expr: &node.expr,
        });
    }

    fn visit_item_static(&mut self, node: &'a syn::ItemStatic) {
        self.out.consts.push(ConstDecl {
            file: self.file,
            ident: &node.ident,
            ty: &node.ty,
            expr: &node.expr,
        });
    }

    fn visit_item_mod(&mut self, node: &'a syn::ItemMod) {
        self.out.modules.insert(node.ident.to_string());
        visit::visit_item_mod(self, node);
    }

    fn visit_item_use(&mut self, node: &'a syn::ItemUse) {
        let mut prefix = Vec::new();
        if let Some(imports) = self.out.imports.get_mut(self.file.index()) {
            collect_use(&node.tree, &mut prefix, imports);
        }
    }
}

fn collect_use(tree: &syn::UseTree, prefix: &mut Vec<String>, imports: &mut HashMap<String, String>) {
    match tree {
        syn::UseTree::Path(path) => {
            prefix.push(path.ident.to_string());
            collect_use(&path.tree, prefix, imports);
            prefix.pop();
        }
        syn::UseTree::Name(name) => {
            let ident = name.ident.to_string();
            if ident == "self" {
                if let Some(last) = prefix.last() {
                    imports.insert(last.clone(), prefix.join("::"));
                }
            } else {
                let mut full = prefix.clone();
                full.push(ident.clone());
                imports.insert(ident, full.join("::"));
            }
        }
        syn::UseTree::Rename(rename) => {
            let alias = rename.rename.to_string();
            if alias != "_" {
                let mut full = prefix.clone();
                full.push(rename.ident.to_string());
                imports.insert(alias, full.join("::"));
            }
        }
        syn::UseTree::Glob(_) => {}
        syn::UseTree::Group(group) => {
            for item in &group.items {
                collect_use(item, prefix, imports);
            }
        }
    }
}

/// Module name a file stands for (`handlers.rs`, `handlers/mod.rs`), if any.
pub(super) fn module_name_of(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    match stem {
        "main" | "lib" => None,
        "mod" => path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .map(str::to_string),
        other => Some(other.to_string()),
    }
}

/// Trimmed `///` lines of an item; blank lines are kept as empty strings.
pub(super) fn doc_lines(attrs: &[syn::Attribute]) -> Vec<String> {
    attrs
        .iter()
        .filter(|attr| attr.path().is_ident("doc"))
        .filter_map(|attr| match &attr.meta {
            syn::Meta::NameValue(syn::MetaNameValue {
                value:
                    syn::Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Str(s),
                        ..
                    }),
                ..
            }) => Some(s.value().trim().to_string()),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Default, Clone, PartialEq)]
pub(super) struct SerdeAttrs {
    pub rename: Option<String>,
    pub rename_all: Option<String>,
    pub skip: bool,
    pub flatten: bool,
    pub default: bool,
}

/// Reads the `#[serde(..)]` attributes that change the serialized shape.
pub(super) fn serde_attrs(attrs: &[syn::Attribute]) -> SerdeAttrs {
    let mut out = SerdeAttrs::default();
    for attr in attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }
        // Malformed attributes keep whatever was read before the error
        let _ = attr.parse_nested_meta(|meta| {
            let key = meta
                .path
                .get_ident()
                .map(|ident| ident.to_string())
                .unwrap_or_default();
            match key.as_str() {
                "rename" | "rename_all" => {
                    let value = if meta.input.peek(Token![=]) {
                        Some(meta.value()?.parse::<syn::LitStr>()?.value())
                    } else {
                        let mut serialize = None;
                        meta.parse_nested_meta(|inner| {
                            let lit: syn::LitStr = inner.value()?.parse()?;
                            if inner.path.is_ident("serialize") {
                                serialize = Some(lit.value());
                            }
                            Ok(())
                        })?;
                        serialize
                    };
                    if key == "rename" {
                        out.rename = value;
                    } else {
                        out.rename_all = value;
                    }
                }
                "skip" | "skip_serializing" => out.skip = true,
                "flatten" => out.flatten = true,
                "default" => {
                    out.default = true;
                    skip_meta_value(&meta)?;
                }
                _ => skip_meta_value(&meta)?,
            }
            Ok(())
        });
    }
    out
}

fn skip_meta_value(meta: &syn::meta::ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(Token![=]) {
        let _: syn::Expr = meta.value()?.parse()?;
    } else if meta.input.peek(syn::token::Paren) {
        let content;
        syn::parenthesized!(content in meta.input);
        let _: proc_macro2::TokenStream = content.parse()?;
    }
    Ok(())
}

/// Applies a serde `rename_all` rule to a field (snake_case) or variant (PascalCase) name.
pub(super) fn apply_rename_rule(rule: Option<&str>, name: &str, is_variant: bool) -> String {
    let Some(rule) = rule else {
        return name.to_string();
    };
    let words: Vec<String> = if is_variant {
        split_pascal(name)
    } else {
        name.split('_')
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect()
    };
    match rule {
        "lowercase" if is_variant => words.concat(),
        "lowercase" => name.to_lowercase(),
        "UPPERCASE" if is_variant => words.concat().to_uppercase(),
        "UPPERCASE" => name.to_uppercase(),
        "PascalCase" => words.iter().map(|w| capitalize(w)).collect(),
        "camelCase" => words
            .iter()
            .enumerate()
            .map(|(i, w)| if i == 0 { w.clone() } else { capitalize(w) })
            .collect(),
        "snake_case" => words.join("_"),
        "SCREAMING_SNAKE_CASE" => words.join("_").to_uppercase(),
        "kebab-case" => words.join("-"),
        "SCREAMING-KEBAB-CASE" => words.join("-").to_uppercase(),
        _ => name.to_string(),
    }
}

fn split_pascal(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for c in name.chars() {
        if c.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_rules() {
        assert_eq!(apply_rename_rule(Some("camelCase"), "created_at", false), "createdAt");
        assert_eq!(apply_rename_rule(Some("PascalCase"), "created_at", false), "CreatedAt");
        assert_eq!(apply_rename_rule(Some("snake_case"), "InReview", true), "in_review");
        assert_eq!(
            apply_rename_rule(Some("SCREAMING_SNAKE_CASE"), "InReview", true),
            "IN_REVIEW"
        );
        assert_eq!(apply_rename_rule(Some("kebab-case"), "InReview", true), "in-review");
        assert_eq!(apply_rename_rule(Some("lowercase"), "InReview", true), "inreview");
        assert_eq!(apply_rename_rule(None, "InReview", true), "InReview");
    }

    #[test]
    fn test_serde_attrs_tolerate_unrelated_keys() {
        let item: syn::ItemStruct = syn::parse_quote! {
            struct S {
                #[serde(skip_serializing_if = "Option::is_none", rename = "userName", default)]
                name: Option<String>,
            }
        };
        let field = item.fields.iter().next().unwrap();
        let attrs = serde_attrs(&field.attrs);
        assert_eq!(attrs.rename.as_deref(), Some("userName"));
        assert!(attrs.default);
        assert!(!attrs.skip);
    }

    #[test]
    fn test_serde_rename_serialize_form() {
        let item: syn::ItemStruct = syn::parse_quote! {
            #[serde(rename_all(serialize = "camelCase", deserialize = "snake_case"))]
            struct S { a_b: u8 }
        };
        assert_eq!(serde_attrs(&item.attrs).rename_all.as_deref(), Some("camelCase"));
    }

    #[test]
    fn test_module_name_of() {
        assert_eq!(module_name_of(Path::new("src/handlers.rs")).as_deref(), Some("handlers"));
        assert_eq!(module_name_of(Path::new("src/api/mod.rs")).as_deref(), Some("api"));
        assert_eq!(module_name_of(Path::new("src/main.rs")), None);
    }

    #[test]
    fn test_doc_lines() {
        let item: syn::ItemFn = syn::parse_quote! {
            /// Lists users.
            ///
            /// @tags users
            fn list() {}
        };
        assert_eq!(doc_lines(&item.attrs), vec!["Lists users.", "", "@tags users"]);
    }
}
