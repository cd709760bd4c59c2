//! Value-tracking engine: discovers router values and follows them through the program.
//!
//! The engine is a worklist analysis. Every router-producing constructor is a seed; each work
//! item pairs a usage site with the tracked value it denotes. Popping an item looks at the
//! site's parent context:
//!
//! - receiver of a catalog method: register an endpoint, or derive a child scope
//! - right-hand side of a binding: follow every occurrence of the variable
//! - argument of a local function or method: follow every occurrence of the parameter
//! - returned from a function: follow the calls the value entered through, or every call
//!   site when the function created it
//! - last argument of a nest method: mount the value's scope under the nest prefix
//!
//! Items already processed for the same value are skipped, which guarantees termination on
//! recursive call graphs. Anything that cannot be resolved statically is skipped for that
//! branch and reported as a [`Diagnostic`].

mod endpoint;
mod propagate;

use crate::catalog::{EntryId, RouterCatalog};
use crate::config::Config;
use crate::program::{ExprId, ExprKind, FnId, NamedDef, Program, TypeId};
use crate::route_tree::{RouteTree, ScopeId};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Category of a skipped fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    UnresolvedPath,
    UnresolvedHandler,
    MissingBody,
    RecursiveDerivation,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::UnresolvedPath => "unresolved path",
            DiagnosticKind::UnresolvedHandler => "unresolved handler",
            DiagnosticKind::MissingBody => "missing body",
            DiagnosticKind::RecursiveDerivation => "recursive derivation",
        };
        write!(f, "{}", name)
    }
}

/// A fact the engine had to skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// `file:line:column` of the offending expression
    pub location: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.location, self.message, self.kind)
    }
}

/// Result of analysing a program.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub tree: RouteTree,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ValueId(usize);

/// A reference that denotes a router or scope. Never mutated once created.
#[derive(Debug, Clone)]
pub(crate) struct TrackedValue {
    pub source: ExprId,
    pub entry: EntryId,
    pub parent: Option<ValueId>,
    pub prefix: String,
    pub scope: ScopeId,
}

/// Entry point of the value-tracking analysis.
pub struct Analyzer<'p> {
    program: &'p Program,
    catalog: &'p RouterCatalog,
    config: &'p Config,
}

impl<'p> Analyzer<'p> {
    pub fn new(program: &'p Program, catalog: &'p RouterCatalog, config: &'p Config) -> Self {
        Self {
            program,
            catalog,
            config,
        }
    }

    /// Runs seed discovery and propagation to a fixpoint.
    pub fn analyze(&self) -> Analysis {
        let mut engine = Engine::new(self.program, self.catalog, self.config);
        engine.seed();
        engine.drain();
        info!(
            "Analysis finished: {} scopes, {} operations, {} skipped facts",
            engine.tree.len(),
            engine.tree.operation_count(),
            engine.diagnostics.len()
        );
        Analysis {
            tree: engine.tree,
            diagnostics: engine.diagnostics,
        }
    }
}

pub(crate) struct Engine<'p> {
    program: &'p Program,
    catalog: &'p RouterCatalog,
    config: &'p Config,
    tree: RouteTree,
    values: Vec<TrackedValue>,
    queue: VecDeque<(ExprId, ValueId)>,
    processed: HashSet<(ExprId, ValueId)>,
    /// Call sites of every local function, in discovery order
    call_sites: HashMap<FnId, Vec<ExprId>>,
    /// Calls through which a value entered a function as an argument or receiver
    entered: HashMap<(FnId, ValueId), Vec<ExprId>>,
    /// Sub-scope value derived at each nest call
    mounts: HashMap<ExprId, ValueId>,
    /// Routers reaching a nest call before its receiver did
    pending_mounts: HashMap<ExprId, Vec<ValueId>>,
    registered: HashSet<(ExprId, ScopeId, ExprId)>,
    diagnostics: Vec<Diagnostic>,
}

impl<'p> Engine<'p> {
    fn new(program: &'p Program, catalog: &'p RouterCatalog, config: &'p Config) -> Self {
        let mut call_sites: HashMap<FnId, Vec<ExprId>> = HashMap::new();
        for index in 0..program.expr_count() {
            let id = ExprId(index as u32);
            let target = match program.kind(id) {
                ExprKind::Call { callee, .. } => match program.kind(program.peel(*callee)) {
                    ExprKind::Fn(func) => Some(*func),
                    _ => None,
                },
                ExprKind::MethodCall { resolved, .. } => *resolved,
                _ => None,
            };
            if let Some(func) = target {
                call_sites.entry(func).or_default().push(id);
            }
        }
        Self {
            program,
            catalog,
            config,
            tree: RouteTree::new(),
            values: Vec::new(),
            queue: VecDeque::new(),
            processed: HashSet::new(),
            call_sites,
            entered: HashMap::new(),
            mounts: HashMap::new(),
            pending_mounts: HashMap::new(),
            registered: HashSet::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Creates a root value for every router constructor, in discovery order.
    ///
    /// Calls of ordinary local functions are not seeds: a router they build is tracked from
    /// inside their body and reaches the call site through the return flow. Constructors of a
    /// router type declared in the project are the exception: each call builds a distinct
    /// router, so the call is the seed and the type's own impl bodies are not searched.
    fn seed(&mut self) {
        let program = self.program;
        for index in 0..program.expr_count() {
            let id = ExprId(index as u32);
            let ty = match program.kind(id) {
                ExprKind::Call { callee, .. } => match program.kind(program.peel(*callee)) {
                    ExprKind::Path(_) => program.type_of(id),
                    ExprKind::Fn(func) if self.is_router_constructor(*func) => program
                        .type_of(id)
                        .or(program.function(*func).return_type),
                    _ => None,
                },
                ExprKind::Struct { .. } => program.type_of(id),
                _ => None,
            };
            let Some(entry) = ty.and_then(|ty| self.catalog.entry_for_type(program, ty)) else {
                continue;
            };
            if program
                .expr(id)
                .owner
                .map_or(false, |owner| self.is_router_impl(owner))
            {
                continue;
            }
            let scope = self.tree.add_child(self.tree.root(), "", None);
            let value = self.new_value(TrackedValue {
                source: id,
                entry,
                parent: None,
                prefix: String::new(),
                scope,
            });
            debug!(
                "Seed {:?} at {}",
                value,
                program.describe_location(program.expr(id).location)
            );
            self.enqueue(id, value);
        }
    }

    /// Whether `func` is declared in an impl of a router type defined in the analysed sources.
    fn is_router_impl(&self, func: FnId) -> bool {
        let program = self.program;
        program
            .function(func)
            .impl_type
            .map_or(false, |ty| self.is_local_router_type(ty))
    }

    fn is_local_router_type(&self, ty: TypeId) -> bool {
        let program = self.program;
        let types = program.types();
        self.catalog.entry_for_type(program, ty).is_some()
            && types
                .named(types.strip_pointers(ty))
                .map_or(false, |named| !matches!(named.def, NamedDef::External))
    }

    /// Associated functions such as `Router::new()` of a project-defined router type.
    fn is_router_constructor(&self, func: FnId) -> bool {
        let function = self.program.function(func);
        function.self_param.is_none()
            && self.is_router_impl(func)
            && function
                .return_type
                .map_or(false, |ty| self.catalog.entry_for_type(self.program, ty).is_some())
    }

    fn new_value(&mut self, value: TrackedValue) -> ValueId {
        let id = ValueId(self.values.len());
        self.values.push(value);
        id
    }

    fn value(&self, id: ValueId) -> &TrackedValue {
        &self.values[id.0]
    }

    fn enqueue(&mut self, site: ExprId, value: ValueId) {
        if !self.processed.contains(&(site, value)) {
            self.queue.push_back((site, value));
        }
    }

    fn drain(&mut self) {
        while let Some((site, value)) = self.queue.pop_front() {
            if !self.processed.insert((site, value)) {
                continue;
            }
            self.process(site, value);
        }
    }

    fn diagnose(&mut self, kind: DiagnosticKind, at: ExprId, message: String) {
        let location = self
            .program
            .describe_location(self.program.expr(at).location);
        warn!("Skipping {} at {}: {}", kind, location, message);
        self.diagnostics.push(Diagnostic {
            kind,
            message,
            location,
        });
    }
}

#[cfg(test)]
mod tests;
