//! The hierarchical output of value tracking: scopes own operations, children and group data.
//!
//! Scopes live in an arena owned by [`RouteTree`]; parent links are plain [`ScopeId`]s, so a
//! child never owns its parent.

use crate::metadata::HandlerMetadata;
use crate::program::{ExprId, FnId, TypeId, VarId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub usize);

/// HTTP method of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Head,
    Trace,
}

impl HttpMethod {
    /// Parses a method or helper name (`get`, `GET`, `Post`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let method = match name.to_ascii_lowercase().as_str() {
            "get" => HttpMethod::Get,
            "post" => HttpMethod::Post,
            "put" => HttpMethod::Put,
            "delete" => HttpMethod::Delete,
            "patch" => HttpMethod::Patch,
            "options" => HttpMethod::Options,
            "head" => HttpMethod::Head,
            "trace" => HttpMethod::Trace,
            _ => return None,
        };
        Some(method)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
            HttpMethod::Delete => "delete",
            HttpMethod::Patch => "patch",
            HttpMethod::Options => "options",
            HttpMethod::Head => "head",
            HttpMethod::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerRef {
    Function(FnId),
    Closure(ExprId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamKind {
    #[default]
    String,
    Integer,
    Number,
    Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParameter {
    pub name: String,
    pub kind: ParamKind,
}

/// Where a parameter lives in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParamLocation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "path" => Some(ParamLocation::Path),
            "query" => Some(ParamLocation::Query),
            "header" => Some(ParamLocation::Header),
            "cookie" => Some(ParamLocation::Cookie),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamLocation::Path => "path",
            ParamLocation::Query => "query",
            ParamLocation::Header => "header",
            ParamLocation::Cookie => "cookie",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferredResponse {
    pub ty: Option<TypeId>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferredParameter {
    pub name: String,
    pub location: ParamLocation,
    pub ty: Option<TypeId>,
    pub required: bool,
}

/// Descriptive data recovered from a handler's body and signature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferredMetadata {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub request_body: Option<TypeId>,
    pub responses: BTreeMap<u16, InferredResponse>,
    pub parameters: Vec<InferredParameter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub http_method: HttpMethod,
    pub full_path: String,
    /// Path as written at the registration, before scope prefixes
    pub endpoint_path: String,
    pub handler: HandlerRef,
    pub handler_name: String,
    /// The endpoint registration call
    pub registration: ExprId,
    pub path_parameters: Vec<PathParameter>,
    pub explicit_metadata: Option<HandlerMetadata>,
    pub inferred: InferredMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct RouteScope {
    pub path_prefix: String,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub operations: Vec<Operation>,
    pub tags: Vec<String>,
    /// Scheme names declared through group metadata
    pub security: Vec<String>,
    /// Scheme names inferred from middleware bodies
    pub inferred_security: Vec<String>,
    pub deprecated: bool,
    /// First variable the scope was bound to
    pub bound_variable: Option<VarId>,
    /// Later variables denoting the same scope (`let api2 = api;`)
    pub aliases: Vec<VarId>,
    /// The call that derived this scope; absent for root scopes
    pub origin: Option<ExprId>,
}

impl RouteScope {
    /// Records that `var` denotes this scope.
    pub fn bind_variable(&mut self, var: VarId) {
        match self.bound_variable {
            None => self.bound_variable = Some(var),
            Some(bound) if bound != var && !self.aliases.contains(&var) => self.aliases.push(var),
            Some(_) => {}
        }
    }

    /// Every variable bound to the scope, first binding first.
    pub fn variables(&self) -> impl Iterator<Item = VarId> + '_ {
        self.bound_variable.into_iter().chain(self.aliases.iter().copied())
    }
}

#[derive(Debug, Clone)]
pub struct RouteTree {
    scopes: Vec<RouteScope>,
}

impl Default for RouteTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTree {
    /// Creates a tree holding only the root scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![RouteScope::default()],
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn scope(&self, id: ScopeId) -> &RouteScope {
        &self.scopes[id.0]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut RouteScope {
        &mut self.scopes[id.0]
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Appends a child scope to `parent` and returns it.
    pub fn add_child(&mut self, parent: ScopeId, path_prefix: &str, origin: Option<ExprId>) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(RouteScope {
            path_prefix: path_prefix.to_string(),
            parent: Some(parent),
            origin,
            ..RouteScope::default()
        });
        self.scopes[parent.0].children.push(id);
        id
    }

    pub fn add_operation(&mut self, scope: ScopeId, operation: Operation) {
        self.scopes[scope.0].operations.push(operation);
    }

    /// `id` followed by its ancestors up to the root.
    pub fn ancestors(&self, id: ScopeId) -> Vec<ScopeId> {
        let mut out = vec![id];
        let mut current = id;
        while let Some(parent) = self.scopes[current.0].parent {
            out.push(parent);
            current = parent;
        }
        out
    }

    /// Full path of an endpoint registered on `scope`.
    pub fn full_path_of(&self, scope: ScopeId, endpoint: &str) -> String {
        let mut prefixes: Vec<&str> = self
            .ancestors(scope)
            .into_iter()
            .map(|id| self.scopes[id.0].path_prefix.as_str())
            .collect();
        prefixes.reverse();
        assemble_full_path(prefixes, endpoint)
    }

    /// Moves `id` under `new_parent` and re-assembles the paths of every operation below it.
    pub fn reparent(&mut self, id: ScopeId, new_parent: ScopeId) {
        if let Some(old) = self.scopes[id.0].parent {
            self.scopes[old.0].children.retain(|child| *child != id);
        }
        self.scopes[id.0].parent = Some(new_parent);
        self.scopes[new_parent.0].children.push(id);

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            stack.extend(self.scopes[current.0].children.iter().copied());
            let mut operations = std::mem::take(&mut self.scopes[current.0].operations);
            for op in &mut operations {
                op.full_path = self.full_path_of(current, &op.endpoint_path);
                op.path_parameters = extract_path_parameters(&op.full_path);
                if let HandlerRef::Closure(_) = op.handler {
                    op.handler_name = closure_operation_name(op.http_method, &op.full_path);
                }
            }
            self.scopes[current.0].operations = operations;
        }
    }

    /// Scopes in discovery order: pre-order from the root, children in insertion order.
    pub fn walk(&self) -> Vec<ScopeId> {
        let mut out = Vec::with_capacity(self.scopes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.scopes[id.0].children.iter().rev().copied());
        }
        out
    }

    /// All operations with their owning scope, in discovery order.
    pub fn operations(&self) -> Vec<(ScopeId, &Operation)> {
        self.walk()
            .into_iter()
            .flat_map(|id| self.scopes[id.0].operations.iter().map(move |op| (id, op)))
            .collect()
    }

    pub fn operation_count(&self) -> usize {
        self.scopes.iter().map(|s| s.operations.len()).sum()
    }

    pub fn operations_mut(&mut self) -> impl Iterator<Item = &mut Operation> {
        self.scopes.iter_mut().flat_map(|s| s.operations.iter_mut())
    }

    /// Scopes matching `predicate`, in creation order.
    pub fn find_scope(&self, predicate: impl Fn(&RouteScope) -> bool) -> Vec<ScopeId> {
        (0..self.scopes.len())
            .map(ScopeId)
            .filter(|id| predicate(&self.scopes[id.0]))
            .collect()
    }
}

/// Operation name for an inline closure handler: `get_api_users_id` for `GET /api/users/{id}`.
pub fn closure_operation_name(verb: HttpMethod, path: &str) -> String {
    let mut name = verb.as_str().to_ascii_lowercase();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        let cleaned: String = segment
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !cleaned.is_empty() {
            name.push('_');
            name.push_str(&cleaned);
        }
    }
    name
}

/// Joins scope prefixes and an endpoint path into one path.
///
/// Each prefix loses its trailing slash, the endpoint is joined with exactly one slash, and
/// the result always starts with `/`. An empty result is `/`.
pub fn assemble_full_path<'p>(prefixes: impl IntoIterator<Item = &'p str>, endpoint: &str) -> String {
    let mut path = String::new();
    for prefix in prefixes {
        let trimmed = prefix.trim_end_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        if !trimmed.starts_with('/') {
            path.push('/');
        }
        path.push_str(trimmed);
    }
    let endpoint = endpoint.trim_start_matches('/');
    if !endpoint.is_empty() {
        path.push('/');
        path.push_str(endpoint);
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

/// Detects `{name}`, `{name:regex}`, `{*rest}` and `:name` segments, in path order.
pub fn extract_path_parameters(path: &str) -> Vec<PathParameter> {
    path.split('/')
        .filter_map(segment_parameter)
        .map(|name| PathParameter {
            name,
            kind: ParamKind::String,
        })
        .collect()
}

fn segment_parameter(segment: &str) -> Option<String> {
    if let Some(inner) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        let inner = inner.trim_start_matches('*');
        let name = inner.split(':').next().unwrap_or(inner);
        return (!name.is_empty()).then(|| name.to_string());
    }
    if let Some(name) = segment.strip_prefix(':').or_else(|| segment.strip_prefix('*')) {
        return (!name.is_empty()).then(|| name.to_string());
    }
    None
}

/// Rewrites a framework path into OpenAPI template form: `:id` and `{id:[0-9]+}` become `{id}`.
pub fn to_openapi_path(path: &str) -> String {
    path.split('/')
        .map(|segment| match segment_parameter(segment) {
            Some(name) => format!("{{{}}}", name),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}
