use crate::config::RouterDefinition;
use crate::error::{Error, Result};
use crate::program::{Program, TypeId, TypeKind};
use log::{debug, info, warn};
use std::collections::HashSet;

/// Index of an entry in a [`RouterCatalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub usize);

/// What a method call on a router-like value does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodRole {
    /// Registers a handler for a path
    Endpoint,
    /// Derives a sub-scope, usually with a path prefix
    Group,
    /// Derives a sub-scope wrapped by middleware
    Middleware,
    /// Mounts another router value under a sub-scope
    Nest,
    Unknown,
}

/// A configured router definition together with the program types it matched.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub definition: RouterDefinition,
    pub type_ids: HashSet<TypeId>,
}

/// The Router-Type Catalog: configured router shapes resolved against a lowered program.
///
/// Method classification is a table lookup on the entry's method lists, so any router-like
/// type can be described in configuration without code changes.
#[derive(Debug, Clone, Default)]
pub struct RouterCatalog {
    entries: Vec<CatalogEntry>,
}

impl RouterCatalog {
    /// Resolves router definitions against the types of `program`.
    ///
    /// An entry resolves when at least one program type matches its configured path. Entries
    /// that match nothing are kept but logged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when no entry resolves to any type, since no analysis
    /// could find a router in that case.
    pub fn resolve(definitions: &[RouterDefinition], program: &Program) -> Result<Self> {
        let mut entries = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let type_ids: HashSet<TypeId> = program
                .types()
                .iter()
                .filter_map(|(id, kind)| match kind {
                    TypeKind::Named(named) if type_path_matches(&definition.type_path, &named.path) => {
                        Some(id)
                    }
                    _ => None,
                })
                .collect();
            if type_ids.is_empty() {
                warn!(
                    "Router definition '{}' does not match any type in the project",
                    definition.type_path
                );
            } else {
                debug!(
                    "Router definition '{}' matched {} type(s)",
                    definition.type_path,
                    type_ids.len()
                );
            }
            entries.push(CatalogEntry {
                definition: definition.clone(),
                type_ids,
            });
        }

        let resolved = entries.iter().filter(|e| !e.type_ids.is_empty()).count();
        if resolved == 0 {
            let configured: Vec<&str> = definitions.iter().map(|d| d.type_path.as_str()).collect();
            return Err(Error::Configuration(format!(
                "none of the configured router types [{}] is used by the project",
                configured.join(", ")
            )));
        }
        info!("Resolved {} of {} router definition(s)", resolved, entries.len());
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn entry(&self, id: EntryId) -> &CatalogEntry {
        &self.entries[id.0]
    }

    /// The entry a static type belongs to, looking through references, smart pointers and
    /// `Option`.
    pub fn entry_for_type(&self, program: &Program, ty: TypeId) -> Option<EntryId> {
        let types = program.types();
        let mut ty = types.strip_pointers(ty);
        if let TypeKind::Optional(inner) = types.kind(ty) {
            ty = types.strip_pointers(*inner);
        }
        self.entries
            .iter()
            .position(|entry| entry.type_ids.contains(&ty))
            .map(EntryId)
    }

    /// Classifies `method` for the given entry.
    pub fn classify(&self, entry: EntryId, method: &str) -> MethodRole {
        let definition = &self.entries[entry.0].definition;
        let listed = |methods: &[String]| methods.iter().any(|m| m == method);
        if listed(&definition.endpoint_methods) {
            MethodRole::Endpoint
        } else if listed(&definition.group_methods) {
            MethodRole::Group
        } else if listed(&definition.middleware_wrapper_methods) {
            MethodRole::Middleware
        } else if listed(&definition.nest_methods) {
            MethodRole::Nest
        } else {
            MethodRole::Unknown
        }
    }

    pub fn is_chainable(&self, entry: EntryId) -> bool {
        self.entries[entry.0].definition.chainable
    }
}

/// Whether a program type path denotes the configured type path.
///
/// Besides an exact match, a bare name on either side matches on the last segment, and a
/// re-exported path matches when first and last segments agree (`axum::routing::Router`
/// for `axum::Router`).
fn type_path_matches(configured: &str, actual: &str) -> bool {
    if configured == actual {
        return true;
    }
    let configured: Vec<&str> = configured.split("::").collect();
    let actual: Vec<&str> = actual.split("::").collect();
    match (configured.as_slice(), actual.as_slice()) {
        ([.., last], [bare]) => last == bare,
        ([bare], [.., actual_last]) => bare == actual_last,
        ([first, .., last], [actual_first, .., actual_last]) => {
            first == actual_first && last == actual_last
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::lower_sources;

    fn definition(type_path: &str) -> RouterDefinition {
        RouterDefinition {
            type_path: type_path.to_string(),
            endpoint_methods: vec!["get".to_string(), "post".to_string()],
            group_methods: vec!["group".to_string()],
            middleware_wrapper_methods: vec!["with".to_string()],
            nest_methods: vec!["mount".to_string()],
            chainable: false,
        }
    }

    #[test]
    fn test_type_path_matching() {
        assert!(type_path_matches("axum::Router", "axum::Router"));
        assert!(type_path_matches("axum::Router", "Router"));
        assert!(type_path_matches("axum::Router", "axum::routing::Router"));
        assert!(!type_path_matches("axum::Router", "actix_web::Router"));
        assert!(!type_path_matches("axum::Router", "axum::Server"));
    }

    #[test]
    fn test_resolve_and_classify() {
        let program = lower_sources(&[(
            "src/main.rs",
            r#"
            use kite::Router;
            fn main() {
                let r = Router::new();
                let wrapped: Option<&Router> = None;
            }
            "#,
        )]);
        let catalog =
            RouterCatalog::resolve(&[definition("kite::Router"), definition("warp::Filter")], &program)
                .unwrap();
        assert_eq!(catalog.entries().len(), 2);
        assert!(catalog.entries()[1].type_ids.is_empty());

        let r = program
            .bindings()
            .iter()
            .find(|b| program.var(b.var).name == "r")
            .unwrap();
        let ty = program.type_of(r.value).unwrap();
        let entry = catalog.entry_for_type(&program, ty).unwrap();
        assert_eq!(entry, EntryId(0));
        assert_eq!(catalog.classify(entry, "post"), MethodRole::Endpoint);
        assert_eq!(catalog.classify(entry, "group"), MethodRole::Group);
        assert_eq!(catalog.classify(entry, "with"), MethodRole::Middleware);
        assert_eq!(catalog.classify(entry, "mount"), MethodRole::Nest);
        assert_eq!(catalog.classify(entry, "listen"), MethodRole::Unknown);

        let (_, wrapped) = program
            .variables()
            .find(|(_, v)| v.name == "wrapped")
            .unwrap();
        assert_eq!(catalog.entry_for_type(&program, wrapped.ty.unwrap()), Some(EntryId(0)));
    }

    #[test]
    fn test_unresolved_catalog_is_a_configuration_error() {
        let program = lower_sources(&[("src/main.rs", "fn main() { let x = 1; }")]);
        let err = RouterCatalog::resolve(&[definition("axum::Router")], &program).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
