//! Ranked merge of explicit, group and inferred metadata into an operation's final fields.
//!
//! Priority, highest first:
//!
//! 1. explicit per-handler metadata: a non-empty field replaces the others
//! 2. group metadata accumulated from the owning scope up to the root
//! 3. inferred metadata from the handler body

use super::{extend_unique, ExternalDocs, ResponseHeader};
use crate::program::TypeId;
use crate::route_tree::{Operation, ParamKind, ParamLocation, RouteTree, ScopeId};
use std::collections::BTreeMap;

pub const DEFAULT_RESPONSE_DESCRIPTION: &str = "Successful response";

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResponse {
    pub ty: Option<TypeId>,
    pub description: String,
}

/// Where a parameter's schema comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterSchema {
    Kind(ParamKind),
    Type(TypeId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParameter {
    pub name: String,
    pub location: ParamLocation,
    pub description: Option<String>,
    pub required: bool,
    pub deprecated: bool,
    pub schema: ParameterSchema,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetadata {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    /// Scheme names of the single security requirement; all are required together
    pub security: Vec<String>,
    pub deprecated: bool,
    pub operation_id: String,
    pub request_body: Option<TypeId>,
    pub responses: BTreeMap<u16, ResolvedResponse>,
    pub parameters: Vec<ResolvedParameter>,
    pub response_headers: Vec<ResponseHeader>,
    pub servers: Vec<String>,
    pub external_docs: Option<ExternalDocs>,
    pub extensions: BTreeMap<String, serde_json::Value>,
}

/// Computes the final metadata of `operation`, registered in `scope`.
pub fn resolve(tree: &RouteTree, scope: ScopeId, operation: &Operation) -> ResolvedMetadata {
    let explicit = operation.explicit_metadata.clone().unwrap_or_default();
    let inferred = &operation.inferred;

    // Leaf-to-root, then reversed so the outermost group comes first
    let mut levels = tree.ancestors(scope);
    levels.reverse();
    let mut group_tags = Vec::new();
    let mut group_security = Vec::new();
    let mut group_deprecated = false;
    for id in levels {
        let level = tree.scope(id);
        extend_unique(&mut group_tags, &level.tags);
        extend_unique(&mut group_security, &level.security);
        extend_unique(&mut group_security, &level.inferred_security);
        group_deprecated |= level.deprecated;
    }

    let tags = if !explicit.tags.is_empty() {
        dedup(explicit.tags)
    } else if !group_tags.is_empty() {
        group_tags
    } else {
        dedup(inferred.tags.clone())
    };
    let security = if explicit.security.is_empty() {
        group_security
    } else {
        dedup(explicit.security)
    };

    let mut responses: BTreeMap<u16, ResolvedResponse> = inferred
        .responses
        .iter()
        .map(|(code, response)| {
            (
                *code,
                ResolvedResponse {
                    ty: response.ty,
                    description: response
                        .description
                        .clone()
                        .unwrap_or_else(|| default_description(*code)),
                },
            )
        })
        .collect();
    for (code, response) in explicit.responses {
        responses.insert(
            code,
            ResolvedResponse {
                ty: response.ty,
                description: response
                    .description
                    .unwrap_or_else(|| default_description(code)),
            },
        );
    }
    if responses.is_empty() {
        responses.insert(
            200,
            ResolvedResponse {
                ty: None,
                description: DEFAULT_RESPONSE_DESCRIPTION.to_string(),
            },
        );
    }

    let mut parameters: Vec<ResolvedParameter> = operation
        .path_parameters
        .iter()
        .map(|param| ResolvedParameter {
            name: param.name.clone(),
            location: ParamLocation::Path,
            description: None,
            required: true,
            deprecated: false,
            schema: ParameterSchema::Kind(param.kind),
        })
        .collect();
    for param in &inferred.parameters {
        if find(&parameters, &param.name, param.location).is_some() {
            continue;
        }
        parameters.push(ResolvedParameter {
            name: param.name.clone(),
            location: param.location,
            description: None,
            required: param.required || param.location == ParamLocation::Path,
            deprecated: false,
            schema: param
                .ty
                .map(ParameterSchema::Type)
                .unwrap_or(ParameterSchema::Kind(ParamKind::String)),
        });
    }
    for param in explicit.parameters {
        let schema = match find(&parameters, &param.name, param.location) {
            Some(index) => parameters.remove(index).schema,
            None => ParameterSchema::Kind(ParamKind::String),
        };
        parameters.push(ResolvedParameter {
            name: param.name,
            location: param.location,
            description: param.description,
            required: param.required,
            deprecated: param.deprecated,
            schema,
        });
    }

    ResolvedMetadata {
        summary: explicit.summary.or_else(|| inferred.summary.clone()),
        description: explicit.description.or_else(|| inferred.description.clone()),
        tags,
        security,
        deprecated: explicit.deprecated.unwrap_or(group_deprecated),
        operation_id: explicit
            .operation_id
            .unwrap_or_else(|| operation.handler_name.clone()),
        request_body: explicit.request_body.or(inferred.request_body),
        responses,
        parameters,
        response_headers: explicit.response_headers,
        servers: explicit.servers,
        external_docs: explicit.external_docs,
        extensions: explicit.extensions,
    }
}

fn find(parameters: &[ResolvedParameter], name: &str, location: ParamLocation) -> Option<usize> {
    parameters
        .iter()
        .position(|p| p.name == name && p.location == location)
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(items.len());
    extend_unique(&mut out, &items);
    out
}

fn default_description(code: u16) -> String {
    match code {
        200..=299 => DEFAULT_RESPONSE_DESCRIPTION.to_string(),
        400 => "Bad request".to_string(),
        401 => "Unauthorized".to_string(),
        403 => "Forbidden".to_string(),
        404 => "Not found".to_string(),
        500..=599 => "Server error".to_string(),
        _ => format!("Status {}", code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{HandlerMetadata, ParameterSpec};
    use crate::program::{ExprId, FnId};
    use crate::route_tree::{
        HandlerRef, HttpMethod, InferredMetadata, InferredResponse, PathParameter,
    };
    use pretty_assertions::assert_eq;

    fn operation(explicit: Option<HandlerMetadata>) -> Operation {
        Operation {
            http_method: HttpMethod::Get,
            full_path: "/internal/beta/items/{id}".to_string(),
            endpoint_path: "/items/{id}".to_string(),
            handler: HandlerRef::Function(FnId(0)),
            handler_name: "get_item".to_string(),
            registration: ExprId(0),
            path_parameters: vec![PathParameter {
                name: "id".to_string(),
                kind: ParamKind::Integer,
            }],
            explicit_metadata: explicit,
            inferred: InferredMetadata::default(),
        }
    }

    /// root -> internal -> beta
    fn nested_tree() -> (RouteTree, ScopeId) {
        let mut tree = RouteTree::new();
        let outer = tree.add_child(tree.root(), "/internal", Some(ExprId(1)));
        tree.scope_mut(outer).tags.push("internal".to_string());
        tree.scope_mut(outer).inferred_security.push("ApiKeyAuth".to_string());
        let inner = tree.add_child(outer, "/beta", Some(ExprId(2)));
        tree.scope_mut(inner).tags.push("beta".to_string());
        tree.scope_mut(inner).tags.push("internal".to_string());
        tree.scope_mut(inner).inferred_security.push("BearerAuth".to_string());
        (tree, inner)
    }

    #[test]
    fn test_group_tags_accumulate_outer_first() {
        let (tree, inner) = nested_tree();
        let resolved = resolve(&tree, inner, &operation(None));
        assert_eq!(resolved.tags, vec!["internal".to_string(), "beta".to_string()]);
    }

    #[test]
    fn test_explicit_tags_replace_group_tags() {
        let (tree, inner) = nested_tree();
        let explicit = HandlerMetadata {
            tags: vec!["billing".to_string()],
            ..Default::default()
        };
        let resolved = resolve(&tree, inner, &operation(Some(explicit)));
        assert_eq!(resolved.tags, vec!["billing".to_string()]);
    }

    #[test]
    fn test_security_is_one_joint_requirement() {
        let (tree, inner) = nested_tree();
        let resolved = resolve(&tree, inner, &operation(None));
        assert_eq!(
            resolved.security,
            vec!["ApiKeyAuth".to_string(), "BearerAuth".to_string()]
        );

        let explicit = HandlerMetadata {
            security: vec!["OAuth2".to_string()],
            ..Default::default()
        };
        let resolved = resolve(&tree, inner, &operation(Some(explicit)));
        assert_eq!(resolved.security, vec!["OAuth2".to_string()]);
    }

    #[test]
    fn test_inferred_fills_untouched_fields() {
        let (tree, inner) = nested_tree();
        let mut op = operation(Some(HandlerMetadata {
            summary: Some("Explicit".to_string()),
            deprecated: Some(false),
            parameters: vec![ParameterSpec {
                name: "id".to_string(),
                location: ParamLocation::Path,
                description: Some("Item id".to_string()),
                required: true,
                deprecated: false,
            }],
            ..Default::default()
        }));
        op.inferred.summary = Some("Inferred".to_string());
        op.inferred.description = Some("From docs".to_string());
        op.inferred.responses.insert(
            201,
            InferredResponse {
                ty: None,
                description: None,
            },
        );
        let resolved = resolve(&tree, inner, &op);

        assert_eq!(resolved.summary.as_deref(), Some("Explicit"));
        assert_eq!(resolved.description.as_deref(), Some("From docs"));
        assert_eq!(resolved.operation_id, "get_item");
        assert!(!resolved.deprecated);
        assert_eq!(resolved.responses.keys().copied().collect::<Vec<_>>(), vec![201]);
        assert_eq!(resolved.parameters.len(), 1);
        assert_eq!(resolved.parameters[0].description.as_deref(), Some("Item id"));
        assert_eq!(
            resolved.parameters[0].schema,
            ParameterSchema::Kind(ParamKind::Integer)
        );
    }

    #[test]
    fn test_missing_responses_default_to_success() {
        let tree = RouteTree::new();
        let resolved = resolve(&tree, tree.root(), &operation(None));
        assert_eq!(resolved.responses[&200].description, DEFAULT_RESPONSE_DESCRIPTION);
        assert!(resolved.tags.is_empty());
        assert!(resolved.security.is_empty());
    }
}
