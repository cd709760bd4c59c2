//! Handler body recognition: fills the inferred fields of every operation.
//!
//! Recognition is pluggable through [`BodyRecognizer`]. The default [`PatternRecognizer`]
//! reads a handler's doc comment, its signature (extractor parameters and return type) and
//! the calls in its body that match the configured handler patterns.

use crate::config::Config;
use crate::metadata::path_params::refine_path_parameters;
use crate::program::{matches_callee, ExprId, ExprKind, NamedDef, Program, TypeId, TypeKind};
use crate::route_tree::{
    HandlerRef, InferredMetadata, InferredParameter, InferredResponse, Operation, ParamLocation,
    RouteTree,
};
use log::debug;

/// Status code used when a response pattern carries none.
const DEFAULT_STATUS: u16 = 200;

/// Source of inferred, lowest-priority operation metadata.
pub trait BodyRecognizer {
    /// Inspects the handler of `operation` and returns what could be inferred from it.
    fn recognize(&self, program: &Program, operation: &Operation) -> InferredMetadata;
}

/// Runs `recognizer` over every operation of the tree, then refines path parameter kinds.
pub fn annotate(
    tree: &mut RouteTree,
    program: &Program,
    config: &Config,
    recognizer: &dyn BodyRecognizer,
) {
    for operation in tree.operations_mut() {
        operation.inferred = recognizer.recognize(program, operation);
        refine_path_parameters(program, config, operation);
    }
}

/// Configuration-driven recognizer.
pub struct PatternRecognizer<'c> {
    config: &'c Config,
}

impl<'c> PatternRecognizer<'c> {
    pub fn new(config: &'c Config) -> Self {
        Self { config }
    }

    fn from_extractors(&self, program: &Program, param_types: &[TypeId], out: &mut InferredMetadata) {
        let types = program.types();
        for ty in param_types {
            let Some(extractor) = types.simple_name(*ty) else {
                continue;
            };
            let Some(inner) = types.generic_arg(*ty, 0) else {
                continue;
            };
            if self.config.request_extractors.iter().any(|e| e == extractor) {
                out.request_body.get_or_insert(types.strip_pointers(inner));
            } else if self.config.query_extractors.iter().any(|e| e == extractor) {
                query_fields(program, inner, &mut out.parameters);
            }
        }
    }

    fn from_calls(&self, program: &Program, exprs: &[ExprId], out: &mut InferredMetadata) {
        let patterns = &self.config.handler_patterns;
        for expr in exprs {
            let args = match program.kind(*expr) {
                ExprKind::Call { args, .. } | ExprKind::MethodCall { args, .. } => args,
                _ => continue,
            };
            let candidates = program.callee_paths(*expr);

            for pattern in &patterns.request_body {
                if out.request_body.is_some() || !matches_callee(&candidates, &pattern.callee_path)
                {
                    continue;
                }
                if let Some(ty) = args.get(pattern.arg_index).and_then(|a| program.type_of(*a)) {
                    out.request_body = Some(program.types().strip_pointers(ty));
                }
            }

            for pattern in &patterns.response_body {
                if !matches_callee(&candidates, &pattern.callee_path) {
                    continue;
                }
                let arg = |index: Option<usize>| index.and_then(|i| args.get(i)).copied();
                let code = arg(pattern.status_code_index)
                    .and_then(|a| program.int_value(a))
                    .and_then(|code| u16::try_from(code).ok())
                    .unwrap_or(DEFAULT_STATUS);
                let ty = arg(pattern.data_index)
                    .and_then(|a| program.type_of(a))
                    .map(|ty| program.types().strip_pointers(ty));
                let description = arg(pattern.description_index).and_then(|a| program.string_value(a));
                debug!("Response {} recognised at {:?}", code, expr);
                out.responses.insert(code, InferredResponse { ty, description });
            }

            let named = [
                (&patterns.query_parameter, ParamLocation::Query),
                (&patterns.header_parameter, ParamLocation::Header),
            ];
            for (list, location) in named {
                for pattern in list {
                    if !matches_callee(&candidates, &pattern.callee_path) {
                        continue;
                    }
                    let Some(name) = args
                        .get(pattern.name_index)
                        .and_then(|a| program.string_value(*a))
                    else {
                        continue;
                    };
                    if !out.parameters.iter().any(|p| p.name == name && p.location == location) {
                        out.parameters.push(InferredParameter {
                            name,
                            location,
                            ty: None,
                            required: false,
                        });
                    }
                }
            }
        }
    }
}

impl BodyRecognizer for PatternRecognizer<'_> {
    fn recognize(&self, program: &Program, operation: &Operation) -> InferredMetadata {
        let mut inferred = InferredMetadata::default();
        let (docs, param_types, return_type, exprs) = match operation.handler {
            HandlerRef::Function(func) => {
                let function = program.function(func);
                let param_types: Vec<TypeId> = function.params.iter().filter_map(|p| p.ty).collect();
                (
                    function.docs.clone(),
                    param_types,
                    function.return_type,
                    function.exprs.clone(),
                )
            }
            HandlerRef::Closure(closure) => {
                let param_types = match program.kind(closure) {
                    ExprKind::Closure { params, .. } => params
                        .iter()
                        .flatten()
                        .filter_map(|var| program.var(*var).ty)
                        .collect(),
                    _ => Vec::new(),
                };
                (Vec::new(), param_types, None, program.descendants(closure))
            }
        };

        if let Some(doc) = parse_doc_comment(&docs) {
            inferred.summary = doc.summary;
            inferred.description = doc.description;
            inferred.tags = doc.tags;
        }
        if inferred.summary.is_none() {
            inferred.summary = Some(operation.handler_name.clone());
        }

        self.from_extractors(program, &param_types, &mut inferred);
        if let Some(ty) = return_type.and_then(|ty| json_payload(program, ty)) {
            inferred.responses.insert(
                DEFAULT_STATUS,
                InferredResponse {
                    ty: Some(ty),
                    description: None,
                },
            );
        }
        self.from_calls(program, &exprs, &mut inferred);

        // Path parameters are described by the route itself
        let path_names: Vec<&str> = operation
            .path_parameters
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        inferred
            .parameters
            .retain(|p| !(p.location == ParamLocation::Query && path_names.contains(&p.name.as_str())));
        inferred
    }
}

/// Parsed doc comment of a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocComment {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// Reads summary, description and the `@summary` / `@tags` directives from doc lines.
///
/// Without an `@summary` directive the first text line is the summary; the remaining text
/// lines form the description.
pub fn parse_doc_comment(lines: &[String]) -> Option<DocComment> {
    if lines.iter().all(|l| l.trim().is_empty()) {
        return None;
    }
    let mut doc = DocComment::default();
    let mut text: Vec<&str> = Vec::new();
    for line in lines {
        let line = line.trim();
        if let Some(directive) = line.strip_prefix('@') {
            let (name, value) = directive.split_once(' ').unwrap_or((directive, ""));
            match name {
                "summary" => doc.summary = Some(value.trim().to_string()),
                "tags" => {
                    doc.tags = value
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect()
                }
                _ => {}
            }
        } else {
            text.push(line);
        }
    }

    let mut rest = text.as_slice();
    if doc.summary.is_none() {
        while let [first, tail @ ..] = rest {
            rest = tail;
            if !first.is_empty() {
                doc.summary = Some(first.to_string());
                break;
            }
        }
    }
    let description = rest.join("\n").trim().to_string();
    if !description.is_empty() {
        doc.description = Some(description);
    }
    Some(doc)
}

/// The `T` of a `Json<T>`, `Result<Json<T>, E>` or `(StatusCode, Json<T>)` return type.
fn json_payload(program: &Program, ty: TypeId) -> Option<TypeId> {
    let types = program.types();
    let ty = types.strip_pointers(ty);
    match types.kind(ty) {
        TypeKind::Named(named) if named.name == "Json" => types.generic_arg(ty, 0),
        TypeKind::Named(named) if named.name == "Result" => {
            json_payload(program, types.generic_arg(ty, 0)?)
        }
        TypeKind::Tuple(elems) => elems.iter().find_map(|e| json_payload(program, *e)),
        _ => None,
    }
}

/// One query parameter per serialized field of a `Query<T>` struct.
fn query_fields(program: &Program, ty: TypeId, out: &mut Vec<InferredParameter>) {
    let types = program.types();
    let Some(named) = types.named(types.strip_pointers(ty)) else {
        return;
    };
    let NamedDef::Struct(fields) = &named.def else {
        return;
    };
    for field in fields.iter().filter(|f| !f.skip) {
        let (ty, optional) = match types.kind(field.ty) {
            TypeKind::Optional(inner) => (*inner, true),
            _ => (field.ty, false),
        };
        out.push(InferredParameter {
            name: field.serialized_name.clone(),
            location: ParamLocation::Query,
            ty: Some(ty),
            required: !optional && !field.has_default,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::lower_sources;
    use crate::route_tree::{extract_path_parameters, HttpMethod, ParamKind};
    use pretty_assertions::assert_eq;

    fn operation(program: &Program, handler: &str, path: &str) -> Operation {
        let func = program.function_named(handler).unwrap();
        Operation {
            http_method: HttpMethod::Post,
            full_path: path.to_string(),
            endpoint_path: path.to_string(),
            handler: HandlerRef::Function(func),
            handler_name: handler.to_string(),
            registration: ExprId(0),
            path_parameters: extract_path_parameters(path),
            explicit_metadata: None,
            inferred: InferredMetadata::default(),
        }
    }

    fn type_named(program: &Program, name: &str) -> TypeId {
        program
            .types()
            .iter()
            .find(|(_, kind)| matches!(kind, TypeKind::Named(n) if n.name == name))
            .map(|(id, _)| id)
            .unwrap()
    }

    fn lines(text: &[&str]) -> Vec<String> {
        text.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_doc_comment_directives() {
        let doc = parse_doc_comment(&lines(&[
            "Lists users.",
            "",
            "Supports paging.",
            "@tags users, admin",
        ]))
        .unwrap();
        assert_eq!(doc.summary.as_deref(), Some("Lists users."));
        assert_eq!(doc.description.as_deref(), Some("Supports paging."));
        assert_eq!(doc.tags, vec!["users".to_string(), "admin".to_string()]);

        let doc = parse_doc_comment(&lines(&["@summary Short", "Long text."])).unwrap();
        assert_eq!(doc.summary.as_deref(), Some("Short"));
        assert_eq!(doc.description.as_deref(), Some("Long text."));

        assert_eq!(parse_doc_comment(&lines(&["", " "])), None);
    }

    #[test]
    fn test_signature_extractors_and_return_type() {
        let program = lower_sources(&[(
            "src/handlers.rs",
            r#"
            use axum::{Json, extract::Query};
            pub struct CreateUser { pub name: String }
            pub struct User { pub id: u64, pub name: String }
            pub struct Paging { pub page: Option<u32>, pub per_page: u32 }

            /// Creates a user.
            ///
            /// Stores the user and returns it.
            /// @tags users
            pub async fn create_user(
                Query(paging): Query<Paging>,
                Json(body): Json<CreateUser>,
            ) -> Result<Json<User>, AppError> {
                todo!()
            }
            "#,
        )]);
        let config = Config::default();
        let op = operation(&program, "create_user", "/users");
        let inferred = PatternRecognizer::new(&config).recognize(&program, &op);

        assert_eq!(inferred.summary.as_deref(), Some("Creates a user."));
        assert_eq!(
            inferred.description.as_deref(),
            Some("Stores the user and returns it.")
        );
        assert_eq!(inferred.tags, vec!["users".to_string()]);
        assert_eq!(inferred.request_body, Some(type_named(&program, "CreateUser")));
        assert_eq!(
            inferred.responses.get(&200).and_then(|r| r.ty),
            Some(type_named(&program, "User"))
        );
        let params: Vec<(&str, bool)> = inferred
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), p.required))
            .collect();
        assert_eq!(params, vec![("page", false), ("per_page", true)]);
    }

    #[test]
    fn test_configured_call_patterns() {
        let yaml = r#"
handlerPatterns:
  requestBody:
    - calleePath: bind_json
      argIndex: 0
  responseBody:
    - calleePath: respond
      statusCodeIndex: 0
      dataIndex: 1
      descriptionIndex: 2
  queryParameter:
    - calleePath: query_param
      nameIndex: 1
  headerParameter:
    - calleePath: header
      nameIndex: 0
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let program = lower_sources(&[(
            "src/main.rs",
            r#"
            pub struct Input { pub title: String }
            pub struct Item { pub id: u64 }
            fn update(req: Request) {
                let mut input = Input::default();
                bind_json(&mut input);
                let page = query_param(&req, "page");
                let trace = req.header("X-Request-Id");
                let item = Item { id: 1 };
                respond(StatusCode::CREATED, &item, "Created");
            }
            "#,
        )]);
        let op = operation(&program, "update", "/items");
        let inferred = PatternRecognizer::new(&config).recognize(&program, &op);

        assert_eq!(inferred.summary.as_deref(), Some("update"));
        assert_eq!(inferred.request_body, Some(type_named(&program, "Input")));
        let created = inferred.responses.get(&201).unwrap();
        assert_eq!(created.ty, Some(type_named(&program, "Item")));
        assert_eq!(created.description.as_deref(), Some("Created"));
        let params: Vec<(&str, ParamLocation)> = inferred
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), p.location))
            .collect();
        assert_eq!(
            params,
            vec![
                ("page", ParamLocation::Query),
                ("X-Request-Id", ParamLocation::Header)
            ]
        );
    }

    #[test]
    fn test_annotate_refines_path_parameters() {
        let program = lower_sources(&[(
            "src/main.rs",
            r#"
            use axum::extract::Path;
            async fn get_user(Path(id): Path<u64>) {}
            "#,
        )]);
        let config = Config::default();
        let mut tree = RouteTree::new();
        let scope = tree.add_child(tree.root(), "", None);
        tree.add_operation(scope, operation(&program, "get_user", "/users/{id}"));

        annotate(&mut tree, &program, &config, &PatternRecognizer::new(&config));
        let (_, op) = tree.operations()[0];
        assert_eq!(op.path_parameters[0].kind, ParamKind::Integer);
        assert_eq!(op.inferred.summary.as_deref(), Some("get_user"));
        assert!(op.inferred.responses.is_empty());
    }
}
