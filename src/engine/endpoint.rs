use super::{DiagnosticKind, Engine, ValueId};
use crate::metadata::chain::{parse_handler_chain, unwind_chain};
use crate::program::{ExprId, ExprKind};
use crate::route_tree::{
    closure_operation_name, extract_path_parameters, HandlerRef, HttpMethod, InferredMetadata,
    Operation,
};
use log::debug;

/// How many variable or conversion hops a handler reference may take.
const MAX_HANDLER_HOPS: usize = 4;

impl<'p> Engine<'p> {
    /// Registers the operations of an endpoint call: `(path, handler)` or `(handler)`.
    pub(super) fn register_endpoint(
        &mut self,
        call: ExprId,
        method: &str,
        args: &[ExprId],
        value: ValueId,
    ) {
        let program = self.program;
        let (path_arg, handler_arg) = match args {
            [] => {
                self.diagnose(
                    DiagnosticKind::UnresolvedHandler,
                    call,
                    format!("'{}' registers no handler", method),
                );
                return;
            }
            [handler] => (None, *handler),
            [path, handler, ..] => (Some(*path), *handler),
        };
        let endpoint = match path_arg {
            None => String::new(),
            Some(arg) => match program.string_value(arg) {
                Some(path) => path,
                None => {
                    self.diagnose(
                        DiagnosticKind::UnresolvedPath,
                        call,
                        format!("path of '{}' is not a compile-time constant", method),
                    );
                    return;
                }
            },
        };

        let handlers = match HttpMethod::from_name(method) {
            Some(verb) => vec![(verb, handler_arg)],
            None => self.method_router(handler_arg),
        };
        if handlers.is_empty() {
            self.diagnose(
                DiagnosticKind::UnresolvedHandler,
                call,
                format!("cannot determine the HTTP method registered by '{}'", method),
            );
            return;
        }

        let scope = self.value(value).scope;
        let full_path = self.tree.full_path_of(scope, &endpoint);

        for (verb, handler_expr) in handlers {
            if !self.registered.insert((call, scope, handler_expr)) {
                continue;
            }
            let (explicit, inner) =
                parse_handler_chain(program, &self.config.metadata, handler_expr);
            let Some(handler) = self.resolve_callable(inner) else {
                self.diagnose(
                    DiagnosticKind::UnresolvedHandler,
                    handler_expr,
                    format!(
                        "handler of {} {} is not a function or closure",
                        verb.as_str().to_ascii_uppercase(),
                        full_path
                    ),
                );
                continue;
            };
            let handler_name = match handler {
                HandlerRef::Function(func) => program.function(func).name.clone(),
                HandlerRef::Closure(_) => closure_operation_name(verb, &full_path),
            };
            debug!(
                "Registered {} {} -> {}",
                verb.as_str().to_ascii_uppercase(),
                full_path,
                handler_name
            );
            self.tree.add_operation(
                scope,
                Operation {
                    http_method: verb,
                    full_path: full_path.clone(),
                    endpoint_path: endpoint.clone(),
                    handler,
                    handler_name,
                    registration: call,
                    path_parameters: extract_path_parameters(&full_path),
                    explicit_metadata: explicit,
                    inferred: InferredMetadata::default(),
                },
            );
        }
    }

    /// Verb/handler pairs of a method router: `get(h)`, `get(h).post(h2)`, `web::get().to(h)`.
    fn method_router(&self, expr: ExprId) -> Vec<(HttpMethod, ExprId)> {
        let program = self.program;
        let mut expr = program.peel(expr);
        if let ExprKind::Var(var) = program.kind(expr) {
            match program.single_init(*var) {
                Some(init) => expr = program.peel(init),
                None => return Vec::new(),
            }
        }

        let mut out = Vec::new();
        let mut pending = None;
        let mut visit = |name: &str, args: &[ExprId]| match (HttpMethod::from_name(name), args) {
            (Some(verb), [handler]) => out.push((verb, *handler)),
            (Some(verb), []) => pending = Some(verb),
            (None, [handler]) if name == "to" => {
                if let Some(verb) = pending.take() {
                    out.push((verb, *handler));
                }
            }
            _ => {}
        };
        let (root, links) = unwind_chain(program, expr);
        if let ExprKind::Call { args, .. } = program.kind(root) {
            if let Some(name) = program.call_name(root) {
                visit(name, args);
            }
        }
        for link in &links {
            visit(link.method, link.args);
        }
        out
    }

    /// Resolves a handler expression to a function or closure, through variables and one
    /// level of single-argument conversion such as `Box::new(h)` or `h.into()`.
    fn resolve_callable(&self, expr: ExprId) -> Option<HandlerRef> {
        let program = self.program;
        let mut current = program.peel(expr);
        let mut converted = false;
        for _ in 0..MAX_HANDLER_HOPS {
            match program.kind(current) {
                ExprKind::Fn(func) => return Some(HandlerRef::Function(*func)),
                ExprKind::Closure { .. } => return Some(HandlerRef::Closure(current)),
                ExprKind::Var(var) => current = program.peel(program.single_init(*var)?),
                ExprKind::Call { args, .. } if args.len() == 1 && !converted => {
                    converted = true;
                    current = program.peel(args[0]);
                }
                ExprKind::MethodCall {
                    receiver,
                    method,
                    args,
                    ..
                } if args.is_empty() && !converted && matches!(method.as_str(), "into" | "boxed") => {
                    converted = true;
                    current = program.peel(*receiver);
                }
                _ => return None,
            }
        }
        None
    }
}
