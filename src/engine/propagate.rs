use super::{DiagnosticKind, Engine, TrackedValue, ValueId};
use crate::catalog::MethodRole;
use crate::metadata::extend_unique;
use crate::program::{matches_callee, Context, ExprId, ExprKind, FnId, Primitive, TypeKind, VarId};
use log::{debug, warn};

/// Methods whose result denotes the same router as their receiver.
const IDENTITY_METHODS: &[&str] = &["clone", "to_owned", "borrow", "borrow_mut", "as_ref", "as_mut"];

impl<'p> Engine<'p> {
    pub(super) fn process(&mut self, site: ExprId, value: ValueId) {
        match self.program.context_of(site) {
            Context::Receiver { call } => self.on_receiver(call, value),
            Context::Binding(var) => self.on_binding(var, value),
            Context::Argument { call, index } => self.on_argument(call, index, value),
            Context::Return(func) => self.on_return(func, value),
            Context::Other => {}
        }
    }

    fn on_receiver(&mut self, call: ExprId, value: ValueId) {
        let program = self.program;
        let ExprKind::MethodCall {
            method,
            args,
            resolved,
            ..
        } = program.kind(call)
        else {
            return;
        };
        let entry = self.value(value).entry;
        let chainable = self.catalog.is_chainable(entry);
        match self.catalog.classify(entry, method) {
            MethodRole::Endpoint => {
                self.register_endpoint(call, method, args, value);
                if chainable {
                    self.enqueue(call, value);
                }
            }
            MethodRole::Group => {
                if let Some(derived) = self.derive(call, args, value, false) {
                    self.enqueue(call, if chainable { value } else { derived });
                }
            }
            MethodRole::Middleware => {
                if let Some(derived) = self.derive(call, args, value, true) {
                    self.enqueue(call, derived);
                }
            }
            MethodRole::Nest => {
                // The mounted router is the last argument; anything before it is the prefix
                let prefix_args = &args[..args.len().saturating_sub(1)];
                if let Some(target) = self.derive(call, prefix_args, value, false) {
                    self.mounts.entry(call).or_insert(target);
                    for mounted in self.pending_mounts.remove(&call).unwrap_or_default() {
                        self.mount(call, mounted);
                    }
                }
                self.enqueue(call, value);
            }
            MethodRole::Unknown => {
                let self_param = resolved.and_then(|f| program.function(f).self_param.map(|p| (f, p)));
                if IDENTITY_METHODS.contains(&method.as_str()) {
                    self.enqueue(call, value);
                } else if let Some((func, self_param)) = self_param {
                    debug!("Following router into method {}", method);
                    self.record_entry(func, value, call);
                    self.enqueue_occurrences(self_param, value);
                } else if chainable {
                    // Builder methods such as `layer` or `with_state` return the same router
                    debug!("Passing router through '{}'", method);
                    self.enqueue(call, value);
                } else {
                    debug!("Ignoring method '{}' on tracked router", method);
                }
            }
        }
    }

    fn on_binding(&mut self, var: VarId, value: ValueId) {
        let scope = self.value(value).scope;
        self.tree.scope_mut(scope).bind_variable(var);
        self.enqueue_occurrences(var, value);
    }

    fn on_argument(&mut self, call: ExprId, index: usize, value: ValueId) {
        let program = self.program;
        if let ExprKind::MethodCall { method, args, .. } = program.kind(call) {
            let entry = self.value(value).entry;
            if index + 1 == args.len() && self.catalog.classify(entry, method) == MethodRole::Nest {
                if self.mounts.contains_key(&call) {
                    self.mount(call, value);
                } else {
                    self.pending_mounts.entry(call).or_default().push(value);
                }
                return;
            }
        }
        match program.kind(call) {
            ExprKind::Call { callee, .. } => match program.kind(program.peel(*callee)) {
                ExprKind::Fn(func) => {
                    let function = program.function(*func);
                    // `Type::method(&router, ..)` passes the receiver first
                    let param = match (function.self_param, index) {
                        (Some(self_param), 0) => Some(self_param),
                        (Some(_), i) => function.params.get(i - 1).and_then(|p| p.simple_var()),
                        (None, i) => function.params.get(i).and_then(|p| p.simple_var()),
                    };
                    self.bind_parameter(call, *func, param, value);
                }
                _ => {
                    if program.call_name(call) == Some(self.config.metadata.group_entry.as_str()) {
                        let top = program.chain_top(call);
                        self.enqueue(top, value);
                    } else {
                        debug!(
                            "Router passed to external call {:?}",
                            program.callee_paths(call).first()
                        );
                    }
                }
            },
            ExprKind::MethodCall {
                resolved: Some(func),
                ..
            } => {
                let param = program
                    .function(*func)
                    .params
                    .get(index)
                    .and_then(|p| p.simple_var());
                self.bind_parameter(call, *func, param, value);
            }
            _ => {}
        }
    }

    fn bind_parameter(&mut self, call: ExprId, func: FnId, param: Option<VarId>, value: ValueId) {
        let program = self.program;
        let function = program.function(func);
        if function.body.is_none() {
            self.diagnose(
                DiagnosticKind::MissingBody,
                call,
                format!("function '{}' has no body to follow", function.qualified),
            );
            return;
        }
        match param {
            Some(param) => {
                debug!("Following router into {}", function.qualified);
                self.record_entry(func, value, call);
                self.enqueue_occurrences(param, value);
            }
            None => debug!(
                "Router argument of {} is bound by a pattern; not followed",
                function.qualified
            ),
        }
    }

    fn on_return(&mut self, func: FnId, value: ValueId) {
        let program = self.program;
        let entry = self.value(value).entry;
        for site in self.return_sites(func, value) {
            // A catalog method's result is decided by its role, never by its body
            if let ExprKind::MethodCall { method, .. } = program.kind(site) {
                if self.catalog.classify(entry, method) != MethodRole::Unknown {
                    continue;
                }
            }
            self.enqueue(site, value);
        }
    }

    /// Calls a value returned from `func` flows back to: the calls it or one of its ancestors
    /// entered through, or every call site when the value was created inside `func`.
    fn return_sites(&self, func: FnId, value: ValueId) -> Vec<ExprId> {
        let mut current = Some(value);
        while let Some(id) = current {
            if let Some(sites) = self.entered.get(&(func, id)) {
                return sites.clone();
            }
            current = self.value(id).parent;
        }
        self.call_sites.get(&func).cloned().unwrap_or_default()
    }

    fn record_entry(&mut self, func: FnId, value: ValueId, call: ExprId) {
        let sites = self.entered.entry((func, value)).or_default();
        if !sites.contains(&call) {
            sites.push(call);
        }
    }

    /// Moves the scope tree of a router passed to a nest call under the scope derived there.
    fn mount(&mut self, call: ExprId, mounted: ValueId) {
        let Some(target) = self.mounts.get(&call).copied() else {
            return;
        };
        let target_scope = self.value(target).scope;
        let mut root = mounted;
        while let Some(parent) = self.value(root).parent {
            root = parent;
        }
        let scope = self.value(root).scope;
        let parent = self.tree.scope(scope).parent;
        if parent == Some(target_scope) {
            return;
        }
        if self.tree.ancestors(target_scope).contains(&scope) {
            self.diagnose(
                DiagnosticKind::RecursiveDerivation,
                call,
                "router is nested inside itself".to_string(),
            );
            return;
        }
        if parent != Some(self.tree.root()) {
            warn!(
                "Router nested at {} is already mounted elsewhere; keeping the first mount",
                self.program.describe_location(self.program.expr(call).location)
            );
            return;
        }
        debug!("Mounting {:?} under {:?}", scope, target_scope);
        self.tree.reparent(scope, target_scope);
    }

    fn enqueue_occurrences(&mut self, var: VarId, value: ValueId) {
        let program = self.program;
        for site in program.occurrences(var) {
            self.enqueue(*site, value);
        }
    }

    /// Derives a child scope at a group or middleware call. Returns `None` when the branch
    /// is skipped.
    fn derive(
        &mut self,
        call: ExprId,
        args: &[ExprId],
        value: ValueId,
        middleware: bool,
    ) -> Option<ValueId> {
        if self.derived_at(value, call) {
            self.diagnose(
                DiagnosticKind::RecursiveDerivation,
                call,
                "scope is derived again inside its own derivation".to_string(),
            );
            return None;
        }

        let prefix = self.derivation_prefix(call, args, middleware)?;
        let parent = self.value(value).clone();
        let scope = self.tree.add_child(parent.scope, &prefix, Some(call));
        let derived = self.new_value(TrackedValue {
            source: call,
            entry: parent.entry,
            parent: Some(value),
            prefix,
            scope,
        });
        debug!(
            "Derived {:?} with prefix '{}' from {:?}",
            derived,
            self.value(derived).prefix,
            value
        );

        if middleware {
            let schemes = self.scan_security(args);
            extend_unique(&mut self.tree.scope_mut(scope).inferred_security, &schemes);
        }

        for arg in args {
            if let Some(param) = self.scope_parameter(*arg) {
                self.tree.scope_mut(scope).bind_variable(param);
                self.track_eagerly(param, derived);
            }
        }
        Some(derived)
    }

    /// Whether `value` or one of its ancestors was derived at `call`.
    fn derived_at(&self, value: ValueId, call: ExprId) -> bool {
        let mut current = Some(value);
        while let Some(id) = current {
            let tracked = self.value(id);
            if tracked.source == call {
                return true;
            }
            current = tracked.parent;
        }
        false
    }

    fn derivation_prefix(&mut self, call: ExprId, args: &[ExprId], middleware: bool) -> Option<String> {
        let program = self.program;
        let Some(first) = args.first() else {
            return Some(String::new());
        };
        if let Some(prefix) = program.string_value(*first) {
            return Some(prefix);
        }
        if middleware || self.is_callable(*first) {
            return Some(String::new());
        }
        if self.is_text(*first) {
            self.diagnose(
                DiagnosticKind::UnresolvedPath,
                call,
                "group prefix is not a compile-time constant".to_string(),
            );
            return None;
        }
        Some(String::new())
    }

    fn is_callable(&self, expr: ExprId) -> bool {
        let expr = self.program.peel(expr);
        match self.program.kind(expr) {
            ExprKind::Closure { .. } | ExprKind::Fn(_) => true,
            ExprKind::Var(var) => self
                .program
                .single_init(*var)
                .map_or(false, |init| {
                    matches!(self.program.kind(self.program.peel(init)), ExprKind::Closure { .. })
                }),
            _ => false,
        }
    }

    /// Literal-like arguments: strings and untyped expressions that are not callables.
    fn is_text(&self, expr: ExprId) -> bool {
        let types = self.program.types();
        match self.program.type_of(expr) {
            Some(ty) => matches!(
                types.kind(types.strip_pointers(ty)),
                TypeKind::Primitive(Primitive::Str)
            ),
            None => !matches!(
                self.program.kind(self.program.peel(expr)),
                ExprKind::Call { .. } | ExprKind::MethodCall { .. } | ExprKind::Path(_)
            ),
        }
    }

    /// First parameter of a closure or function passed to a derivation call, when it is
    /// untyped or typed as a router.
    fn scope_parameter(&self, arg: ExprId) -> Option<VarId> {
        let program = self.program;
        let mut expr = program.peel(arg);
        if let ExprKind::Var(var) = program.kind(expr) {
            expr = program.peel(program.single_init(*var)?);
        }
        let param = match program.kind(expr) {
            ExprKind::Closure { params, .. } => params.first().copied().flatten(),
            ExprKind::Fn(func) => program
                .function(*func)
                .params
                .first()
                .and_then(|p| p.simple_var()),
            _ => None,
        }?;
        match program.var(param).ty {
            Some(ty) => self.catalog.entry_for_type(program, ty).map(|_| param),
            None => Some(param),
        }
    }

    /// Follows a sub-scope parameter to completion before returning to the outer worklist.
    fn track_eagerly(&mut self, param: VarId, value: ValueId) {
        let outer = std::mem::take(&mut self.queue);
        self.enqueue_occurrences(param, value);
        self.drain();
        self.queue = outer;
    }

    /// Security schemes implied by the callables passed to a middleware wrapper.
    fn scan_security(&self, args: &[ExprId]) -> Vec<String> {
        let program = self.program;
        let mut schemes = Vec::new();
        for arg in args {
            if matches!(program.kind(program.peel(*arg)), ExprKind::Closure { .. }) {
                continue;
            }
            for func in self.callables_in(*arg) {
                let function = program.function(func);
                for expr in &function.exprs {
                    if !matches!(
                        program.kind(*expr),
                        ExprKind::Call { .. } | ExprKind::MethodCall { .. }
                    ) {
                        continue;
                    }
                    let candidates = program.callee_paths(*expr);
                    for pattern in &self.config.security_patterns {
                        if matches_callee(&candidates, &pattern.callee_path)
                            && !schemes.contains(&pattern.scheme_name)
                        {
                            debug!(
                                "Middleware {} implies security scheme {}",
                                function.qualified, pattern.scheme_name
                            );
                            schemes.push(pattern.scheme_name.clone());
                        }
                    }
                }
            }
        }
        schemes
    }

    /// Local functions an argument refers to: `auth`, `from_fn(auth)`, `make_auth(..)`.
    fn callables_in(&self, arg: ExprId) -> Vec<FnId> {
        let program = self.program;
        let mut expr = program.peel(arg);
        if let ExprKind::Var(var) = program.kind(expr) {
            match program.single_init(*var) {
                Some(init) => expr = program.peel(init),
                None => return Vec::new(),
            }
        }
        match program.kind(expr) {
            ExprKind::Fn(func) => vec![*func],
            ExprKind::Call { callee, args } => {
                let mut out = Vec::new();
                if let ExprKind::Fn(func) = program.kind(program.peel(*callee)) {
                    out.push(*func);
                }
                for arg in args {
                    if let ExprKind::Fn(func) = program.kind(program.peel(*arg)) {
                        out.push(*func);
                    }
                }
                out
            }
            _ => Vec::new(),
        }
    }
}
