//! Fluent metadata chains.
//!
//! A chain such as `describe(handler).summary("..").tag("a").into_handler()` is unwound from
//! its outermost call into an ordered list of links, then applied front to back.

use super::{
    extend_unique, ExternalDocs, GroupKey, GroupMetadata, GroupMetadataMap, HandlerMetadata,
    ParameterSpec, ResponseHeader, ResponseSpec,
};
use crate::config::MetadataNames;
use crate::program::{ExprId, ExprKind, Literal, Program, TypeId};
use crate::route_tree::ParamLocation;
use log::debug;

/// One `.method(args)` call of a chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainLink<'p> {
    pub call: ExprId,
    pub method: &'p str,
    pub args: &'p [ExprId],
    pub turbofish: &'p [TypeId],
}

/// Unwinds a method chain from its outermost call. Returns the root expression and the links
/// in source order.
pub fn unwind_chain(program: &Program, top: ExprId) -> (ExprId, Vec<ChainLink<'_>>) {
    let mut links = Vec::new();
    let mut current = program.peel(top);
    while let ExprKind::MethodCall {
        receiver,
        method,
        args,
        turbofish,
        ..
    } = program.kind(current)
    {
        links.push(ChainLink {
            call: current,
            method,
            args,
            turbofish,
        });
        current = program.peel(*receiver);
    }
    links.reverse();
    (current, links)
}

/// If `expr` is a handler chain, returns its metadata and the wrapped handler expression.
/// Otherwise returns `None` and `expr` itself.
pub fn parse_handler_chain(
    program: &Program,
    names: &MetadataNames,
    expr: ExprId,
) -> (Option<HandlerMetadata>, ExprId) {
    let (root, links) = unwind_chain(program, expr);
    let ExprKind::Call { args, .. } = program.kind(root) else {
        return (None, expr);
    };
    if args.len() != 1 || program.call_name(root) != Some(names.handler_entry.as_str()) {
        return (None, expr);
    }
    let mut metadata = HandlerMetadata::default();
    for link in &links {
        if link.method == names.unwrap {
            continue;
        }
        apply_handler_link(program, &mut metadata, link);
    }
    (Some(metadata), args[0])
}

fn apply_handler_link(program: &Program, metadata: &mut HandlerMetadata, link: &ChainLink) {
    let text = |index: usize| link.args.get(index).and_then(|a| program.string_value(*a));
    let texts = || -> Vec<String> {
        link.args
            .iter()
            .filter_map(|a| program.string_value(*a))
            .collect()
    };
    match link.method {
        "summary" => metadata.summary = text(0).or(metadata.summary.take()),
        "description" => metadata.description = text(0).or(metadata.description.take()),
        "tag" | "tags" => extend_unique(&mut metadata.tags, &texts()),
        "security" => extend_unique(&mut metadata.security, &texts()),
        "request_body" => {
            let ty = link
                .turbofish
                .first()
                .copied()
                .or_else(|| link.args.first().and_then(|a| program.type_of(*a)));
            if ty.is_some() {
                metadata.request_body = ty;
            }
        }
        "add_response" => {
            let Some(code) = link.args.first().and_then(|a| status_code(program, *a)) else {
                debug!("Skipping add_response with unresolvable status code");
                return;
            };
            let response = if let Some(ty) = link.turbofish.first() {
                ResponseSpec {
                    ty: Some(*ty),
                    description: text(1),
                }
            } else if link.args.len() == 2 && text(1).is_some() {
                ResponseSpec {
                    ty: None,
                    description: text(1),
                }
            } else {
                ResponseSpec {
                    ty: link.args.get(1).and_then(|a| program.type_of(*a)),
                    description: text(2),
                }
            };
            metadata.responses.insert(code, response);
        }
        "add_parameter" => {
            let location = link.args.first().and_then(|a| param_location(program, *a));
            let (Some(location), Some(name)) = (location, text(1)) else {
                debug!("Skipping add_parameter with unresolvable location or name");
                return;
            };
            let flag = |index: usize| {
                link.args
                    .get(index)
                    .and_then(|a| program.bool_value(*a))
                    .unwrap_or(false)
            };
            let spec = ParameterSpec {
                required: flag(3) || location == ParamLocation::Path,
                deprecated: flag(4),
                description: text(2),
                location,
                name,
            };
            metadata
                .parameters
                .retain(|p| !(p.name == spec.name && p.location == spec.location));
            metadata.parameters.push(spec);
        }
        "response_header" => {
            if let Some(name) = text(0) {
                metadata.response_headers.push(ResponseHeader {
                    name,
                    description: text(1),
                });
            }
        }
        "server" => extend_unique(&mut metadata.servers, &texts()),
        "external_docs" => {
            if let Some(url) = text(0) {
                metadata.external_docs = Some(ExternalDocs {
                    url,
                    description: text(1),
                });
            }
        }
        "operation_id" => metadata.operation_id = text(0).or(metadata.operation_id.take()),
        "deprecate" => {
            metadata.deprecated = Some(match link.args.first() {
                Some(arg) => program.bool_value(*arg).unwrap_or(true),
                None => true,
            });
        }
        "extension" => {
            let value = link.args.get(1).and_then(|a| literal_json(program, *a));
            if let (Some(key), Some(value)) = (text(0), value) {
                let key = if key.starts_with("x-") {
                    key
                } else {
                    format!("x-{}", key)
                };
                metadata.extensions.insert(key, value);
            }
        }
        other => debug!("Ignoring unknown handler metadata method '{}'", other),
    }
}

/// Collects every group chain in the program, keyed by what it is attached to.
pub fn collect_group_metadata(program: &Program, names: &MetadataNames) -> GroupMetadataMap {
    let mut groups = GroupMetadataMap::new();
    for index in 0..program.expr_count() {
        let id = ExprId(index as u32);
        let ExprKind::Call { args, .. } = program.kind(id) else {
            continue;
        };
        if args.len() != 1 || program.call_name(id) != Some(names.group_entry.as_str()) {
            continue;
        }
        let target = program.peel(args[0]);
        let key = match program.kind(target) {
            ExprKind::Var(var) => GroupKey::Variable(*var),
            _ => GroupKey::Site(target),
        };
        let (_, links) = unwind_chain(program, program.chain_top(id));
        let group = groups.entry(key).or_insert_with(GroupMetadata::default);
        for link in &links {
            let texts: Vec<String> = link
                .args
                .iter()
                .filter_map(|a| program.string_value(*a))
                .collect();
            match link.method {
                "tag" | "tags" => extend_unique(&mut group.tags, &texts),
                "security" => extend_unique(&mut group.security, &texts),
                "deprecate" => {
                    group.deprecated = match link.args.first() {
                        Some(arg) => program.bool_value(*arg).unwrap_or(true),
                        None => true,
                    }
                }
                other => debug!("Ignoring unknown group metadata method '{}'", other),
            }
        }
    }
    groups
}

fn status_code(program: &Program, expr: ExprId) -> Option<u16> {
    program
        .int_value(expr)
        .and_then(|code| u16::try_from(code).ok())
}

fn param_location(program: &Program, expr: ExprId) -> Option<ParamLocation> {
    if let Some(text) = program.string_value(expr) {
        return ParamLocation::from_name(&text);
    }
    match program.kind(program.peel(expr)) {
        ExprKind::Path(path) => path.rsplit("::").next().and_then(ParamLocation::from_name),
        _ => None,
    }
}

fn literal_json(program: &Program, expr: ExprId) -> Option<serde_json::Value> {
    if let Some(text) = program.string_value(expr) {
        return Some(serde_json::Value::String(text));
    }
    match program.kind(program.peel(expr)) {
        ExprKind::Lit(Literal::Int(i)) => Some(serde_json::Value::from(*i)),
        ExprKind::Lit(Literal::Float(f)) => Some(serde_json::Value::from(*f)),
        ExprKind::Lit(Literal::Bool(b)) => Some(serde_json::Value::Bool(*b)),
        _ => None,
    }
}
