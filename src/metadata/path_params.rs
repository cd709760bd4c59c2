//! Best-effort kind refinement of auto-detected path parameters.
//!
//! A parameter starts as a string. It is upgraded when the handler extracts it with a typed
//! `Path<T>` extractor, or binds it to a local that is handed to a known parsing call.

use crate::config::{Config, ParamKindConfig};
use crate::program::{
    matches_callee, Context, ExprId, ExprKind, FnId, NamedDef, Parent, Primitive, Program, Role,
    TypeId, TypeKind, VarId,
};
use crate::route_tree::{HandlerRef, Operation, ParamKind};
use log::debug;
use std::collections::HashSet;

/// Methods a parse result may flow through before reaching its `let`.
const RESULT_ADAPTERS: &[&str] = &[
    "unwrap",
    "expect",
    "unwrap_or",
    "unwrap_or_default",
    "unwrap_or_else",
    "ok",
    "map_err",
];

pub fn refine_path_parameters(program: &Program, config: &Config, operation: &mut Operation) {
    if operation.path_parameters.is_empty() {
        return;
    }
    let (exprs, params) = handler_scope(program, operation.handler);

    if let HandlerRef::Function(func) = operation.handler {
        refine_from_extractors(program, config, func_param_types(program, func), operation);
    }

    let expr_set: HashSet<ExprId> = exprs.iter().copied().collect();
    for index in 0..operation.path_parameters.len() {
        if operation.path_parameters[index].kind != ParamKind::String {
            continue;
        }
        let name = operation.path_parameters[index].name.clone();
        let kind = candidate_vars(program, &name, &params, &expr_set)
            .into_iter()
            .find_map(|var| var_kind(program, config, var));
        if let Some(kind) = kind {
            debug!(
                "Path parameter '{}' of {} refined to {:?}",
                name, operation.full_path, kind
            );
            operation.path_parameters[index].kind = kind;
        }
    }
}

/// Expressions and parameter variables of a handler.
fn handler_scope(program: &Program, handler: HandlerRef) -> (Vec<ExprId>, Vec<VarId>) {
    match handler {
        HandlerRef::Function(func) => {
            let function = program.function(func);
            let params = function
                .params
                .iter()
                .flat_map(|p| p.vars.iter().copied())
                .collect();
            (function.exprs.clone(), params)
        }
        HandlerRef::Closure(closure) => {
            let params = match program.kind(closure) {
                ExprKind::Closure { params, .. } => params.iter().flatten().copied().collect(),
                _ => Vec::new(),
            };
            (program.descendants(closure), params)
        }
    }
}

fn func_param_types(program: &Program, func: FnId) -> Vec<TypeId> {
    program
        .function(func)
        .params
        .iter()
        .filter_map(|p| p.ty)
        .collect()
}

/// `Path<u64>`, `Path<(u32, Uuid)>` and `Path<Params>` extractors.
fn refine_from_extractors(
    program: &Program,
    config: &Config,
    param_types: Vec<TypeId>,
    operation: &mut Operation,
) {
    let types = program.types();
    for ty in param_types {
        let Some(named) = types.named(types.strip_pointers(ty)) else {
            continue;
        };
        if !config.path_extractors.iter().any(|e| *e == named.name) {
            continue;
        }
        let Some(inner) = types.generic_arg(ty, 0) else {
            continue;
        };
        let inner = types.strip_pointers(inner);
        let params = &mut operation.path_parameters;
        match types.kind(inner) {
            TypeKind::Tuple(elems) => {
                for (param, elem) in params.iter_mut().zip(elems) {
                    upgrade(&mut param.kind, type_kind(program, *elem));
                }
            }
            TypeKind::Named(named) => match &named.def {
                NamedDef::Struct(fields) => {
                    for field in fields {
                        if let Some(param) =
                            params.iter_mut().find(|p| p.name == field.serialized_name)
                        {
                            upgrade(&mut param.kind, type_kind(program, field.ty));
                        }
                    }
                }
                _ if params.len() == 1 => upgrade(&mut params[0].kind, type_kind(program, inner)),
                _ => {}
            },
            _ if params.len() == 1 => upgrade(&mut params[0].kind, type_kind(program, inner)),
            _ => {}
        }
    }
}

/// Locals of the handler that hold the raw value of path parameter `name`: variables named
/// after it, and variables initialised by a lookup call taking `"name"`.
fn candidate_vars(
    program: &Program,
    name: &str,
    params: &[VarId],
    exprs: &HashSet<ExprId>,
) -> Vec<VarId> {
    program
        .variables()
        .filter(|(id, var)| {
            let in_handler =
                params.contains(id) || var.init.map_or(false, |init| exprs.contains(&init));
            if !in_handler {
                return false;
            }
            var.name == name
                || var
                    .init
                    .map_or(false, |init| looks_up_name(program, init, name))
        })
        .map(|(id, _)| id)
        .collect()
}

fn looks_up_name(program: &Program, init: ExprId, name: &str) -> bool {
    program.descendants(init).into_iter().any(|id| match program.kind(id) {
        ExprKind::Call { args, .. } | ExprKind::MethodCall { args, .. } => args
            .iter()
            .any(|arg| program.string_value(*arg).as_deref() == Some(name)),
        _ => false,
    })
}

fn var_kind(program: &Program, config: &Config, var: VarId) -> Option<ParamKind> {
    if let Some(kind) = program.var(var).ty.and_then(|ty| type_kind(program, ty)) {
        return Some(kind);
    }
    program
        .occurrences(var)
        .iter()
        .find_map(|site| match program.context_of(*site) {
            Context::Argument { call, .. } => {
                let candidates = program.callee_paths(call);
                config
                    .param_parsers
                    .iter()
                    .find(|parser| matches_callee(&candidates, &parser.callee_path))
                    .map(|parser| match parser.kind {
                        ParamKindConfig::Integer => ParamKind::Integer,
                        ParamKindConfig::Number => ParamKind::Number,
                        ParamKindConfig::Uuid => ParamKind::Uuid,
                    })
            }
            Context::Receiver { call } => parse_target(program, call),
            _ => None,
        })
}

/// Kind produced by `raw.parse::<T>()`, from the turbofish or the receiving `let`.
fn parse_target(program: &Program, call: ExprId) -> Option<ParamKind> {
    let ExprKind::MethodCall {
        method, turbofish, ..
    } = program.kind(call)
    else {
        return None;
    };
    if method != "parse" {
        return None;
    }
    if let Some(ty) = turbofish.first() {
        return type_kind(program, *ty);
    }
    let mut current = call;
    loop {
        match program.expr(current).parent {
            Parent::Expr { id, role } => {
                let passes = match (program.kind(id), role) {
                    (ExprKind::MethodCall { method, .. }, Role::Receiver) => {
                        RESULT_ADAPTERS.contains(&method.as_str())
                    }
                    (_, Role::Inner) => true,
                    _ => false,
                };
                if !passes {
                    return None;
                }
                current = id;
            }
            Parent::Binding(var) => {
                return program.var(var).ty.and_then(|ty| type_kind(program, ty))
            }
            _ => return None,
        }
    }
}

fn type_kind(program: &Program, ty: TypeId) -> Option<ParamKind> {
    let types = program.types();
    let mut ty = types.strip_pointers(ty);
    if let TypeKind::Optional(inner) = types.kind(ty) {
        ty = types.strip_pointers(*inner);
    }
    match types.kind(ty) {
        TypeKind::Primitive(p) if p.is_integer() => Some(ParamKind::Integer),
        TypeKind::Primitive(p) if p.is_float() => Some(ParamKind::Number),
        TypeKind::Primitive(Primitive::Str) => None,
        TypeKind::Named(named) if named.name == "Uuid" => Some(ParamKind::Uuid),
        _ => None,
    }
}

fn upgrade(kind: &mut ParamKind, refined: Option<ParamKind>) {
    if let (ParamKind::String, Some(refined)) = (*kind, refined) {
        *kind = refined;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::lower_sources;
    use crate::route_tree::{extract_path_parameters, HttpMethod, InferredMetadata};

    fn refine(source: &str, path: &str, handler: &str) -> Vec<ParamKind> {
        let program = lower_sources(&[("src/main.rs", source)]);
        let func = program.function_named(handler).unwrap();
        let mut operation = Operation {
            http_method: HttpMethod::Get,
            full_path: path.to_string(),
            endpoint_path: path.to_string(),
            handler: HandlerRef::Function(func),
            handler_name: handler.to_string(),
            registration: ExprId(0),
            path_parameters: extract_path_parameters(path),
            explicit_metadata: None,
            inferred: InferredMetadata::default(),
        };
        refine_path_parameters(&program, &Config::default(), &mut operation);
        operation.path_parameters.iter().map(|p| p.kind).collect()
    }

    #[test]
    fn test_typed_path_extractor() {
        let kinds = refine(
            r#"
            use axum::extract::Path;
            async fn get_user(Path((org, id)): Path<(String, u64)>) {}
            "#,
            "/orgs/{org}/users/{id}",
            "get_user",
        );
        assert_eq!(kinds, vec![ParamKind::String, ParamKind::Integer]);
    }

    #[test]
    fn test_path_struct_extractor_by_field_name() {
        let kinds = refine(
            r#"
            use axum::extract::Path;
            use uuid::Uuid;
            struct Params { ratio: f64, token: Uuid }
            async fn show(Path(params): Path<Params>) {}
            "#,
            "/r/{token}/{ratio}",
            "show",
        );
        assert_eq!(kinds, vec![ParamKind::Uuid, ParamKind::Number]);
    }

    #[test]
    fn test_parse_with_let_annotation() {
        let kinds = refine(
            r#"
            async fn show(req: Request) {
                let id = req.param("id");
                let n: u32 = id.parse().unwrap();
            }
            "#,
            "/items/:id",
            "show",
        );
        assert_eq!(kinds, vec![ParamKind::Integer]);
    }

    #[test]
    fn test_configured_parser_by_lookup_name() {
        let kinds = refine(
            r#"
            async fn show(req: Request) {
                let raw = req.param("user_id");
                let parsed = Uuid::parse_str(&raw);
            }
            "#,
            "/users/{user_id}",
            "show",
        );
        assert_eq!(kinds, vec![ParamKind::Uuid]);
    }

    #[test]
    fn test_unparsed_parameter_stays_string() {
        let kinds = refine(
            r#"
            async fn show(req: Request) {
                let slug = req.param("slug");
                println!("{}", slug);
            }
            "#,
            "/posts/{slug}",
            "show",
        );
        assert_eq!(kinds, vec![ParamKind::String]);
    }
}
