use crate::config::{Config, InfoConfig, SecuritySchemeConfig};
use crate::error::Result;
use crate::metadata::overlay::{self, ParameterSchema, ResolvedMetadata};
use crate::metadata::{apply_group_metadata, chain::collect_group_metadata};
use crate::program::Program;
use crate::route_tree::{to_openapi_path, HttpMethod, RouteTree};
use crate::schema_generator::{param_kind_schema, Schema, SchemaGenerator};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const OPENAPI_VERSION: &str = "3.1.0";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Complete OpenAPI document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenApiDocument {
    pub openapi: String,
    pub info: Info,
    pub paths: BTreeMap<String, PathItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<Components>,
}

/// OpenAPI Info object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub title: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&InfoConfig> for Info {
    fn from(info: &InfoConfig) -> Self {
        Self {
            title: info.title.clone(),
            version: info.version.clone(),
            description: info.description.clone(),
        }
    }
}

/// All operations of a single path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Operation>,
}

impl PathItem {
    pub fn operation(&self, method: HttpMethod) -> Option<&Operation> {
        self.slot(method).as_ref()
    }

    fn slot(&self, method: HttpMethod) -> &Option<Operation> {
        match method {
            HttpMethod::Get => &self.get,
            HttpMethod::Post => &self.post,
            HttpMethod::Put => &self.put,
            HttpMethod::Delete => &self.delete,
            HttpMethod::Patch => &self.patch,
            HttpMethod::Options => &self.options,
            HttpMethod::Head => &self.head,
            HttpMethod::Trace => &self.trace,
        }
    }

    fn slot_mut(&mut self, method: HttpMethod) -> &mut Option<Operation> {
        match method {
            HttpMethod::Get => &mut self.get,
            HttpMethod::Post => &mut self.post,
            HttpMethod::Put => &mut self.put,
            HttpMethod::Delete => &mut self.delete,
            HttpMethod::Patch => &mut self.patch,
            HttpMethod::Options => &mut self.options,
            HttpMethod::Head => &mut self.head,
            HttpMethod::Trace => &mut self.trace,
        }
    }
}

/// A single API operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_docs: Option<ExternalDocumentation>,
    pub operation_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<RequestBody>,
    pub responses: BTreeMap<String, Response>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub deprecated: bool,
    /// One requirement object; every listed scheme is required together
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub security: Vec<BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub servers: Vec<Server>,
    /// `x-` extension fields
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "in")]
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub deprecated: bool,
    pub schema: Schema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    pub required: bool,
    pub content: BTreeMap<String, MediaType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaType {
    pub schema: Schema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub description: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub headers: BTreeMap<String, Header>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<BTreeMap<String, MediaType>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: Schema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalDocumentation {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Components {
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub schemas: BTreeMap<String, Schema>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub security_schemes: BTreeMap<String, SecuritySchemeConfig>,
}

/// OpenAPI document builder: walks a finished route tree and emits the document.
pub struct OpenApiBuilder<'a> {
    program: &'a Program,
    config: &'a Config,
    schemas: SchemaGenerator<'a>,
    paths: BTreeMap<String, PathItem>,
    operation_ids: HashSet<String>,
}

impl<'a> OpenApiBuilder<'a> {
    pub fn new(program: &'a Program, config: &'a Config) -> Self {
        debug!("Initializing OpenApiBuilder");
        Self {
            program,
            config,
            schemas: SchemaGenerator::new(program),
            paths: BTreeMap::new(),
            operation_ids: HashSet::new(),
        }
    }

    /// Builds the document for every operation of `tree`, in discovery order.
    ///
    /// Group metadata attached through `describe_group(..)` chains is copied onto the tree's
    /// scopes first.
    ///
    /// # Errors
    ///
    /// Fails when two distinct types need the same schema component name.
    pub fn build(mut self, tree: &mut RouteTree) -> Result<OpenApiDocument> {
        let groups = collect_group_metadata(self.program, &self.config.metadata);
        debug!("Applying {} group metadata chains", groups.len());
        apply_group_metadata(tree, &groups);

        let tree: &RouteTree = tree;
        for (scope, op) in tree.operations() {
            let path = to_openapi_path(&op.full_path);
            let taken = self
                .paths
                .get(&path)
                .map_or(false, |item| item.operation(op.http_method).is_some());
            if taken {
                warn!(
                    "Duplicate registration of {} {}; keeping the first",
                    op.http_method.as_str().to_ascii_uppercase(),
                    path
                );
                continue;
            }
            let operation = self.operation(overlay::resolve(tree, scope, op))?;
            debug!(
                "Adding operation {} {}",
                op.http_method.as_str().to_ascii_uppercase(),
                path
            );
            *self.paths.entry(path).or_default().slot_mut(op.http_method) = Some(operation);
        }

        let components = Components {
            schemas: self.schemas.into_components(),
            security_schemes: self.config.security_schemes.clone(),
        };
        let components = (!components.schemas.is_empty()
            || !components.security_schemes.is_empty())
        .then_some(components);

        Ok(OpenApiDocument {
            openapi: OPENAPI_VERSION.to_string(),
            info: Info::from(&self.config.info),
            paths: self.paths,
            components,
        })
    }

    fn operation(&mut self, resolved: ResolvedMetadata) -> Result<Operation> {
        let operation_id = self.unique_operation_id(&resolved.operation_id);

        let mut parameters = Vec::with_capacity(resolved.parameters.len());
        for param in resolved.parameters {
            let schema = match param.schema {
                ParameterSchema::Kind(kind) => param_kind_schema(kind),
                ParameterSchema::Type(ty) => self.schemas.generate(ty)?,
            };
            parameters.push(Parameter {
                name: param.name,
                location: param.location.as_str().to_string(),
                description: param.description,
                required: param.required,
                deprecated: param.deprecated,
                schema,
            });
        }

        let request_body = match resolved.request_body {
            Some(ty) => Some(RequestBody {
                required: true,
                content: json_content(self.schemas.generate(ty)?),
            }),
            None => None,
        };

        let headers: BTreeMap<String, Header> = resolved
            .response_headers
            .iter()
            .map(|header| {
                (
                    header.name.clone(),
                    Header {
                        description: header.description.clone(),
                        schema: Schema::of_type("string"),
                    },
                )
            })
            .collect();
        let mut responses = BTreeMap::new();
        for (code, response) in resolved.responses {
            let content = match response.ty {
                Some(ty) => Some(json_content(self.schemas.generate(ty)?)),
                None => None,
            };
            responses.insert(
                code.to_string(),
                Response {
                    description: response.description,
                    headers: headers.clone(),
                    content,
                },
            );
        }

        let security = if resolved.security.is_empty() {
            Vec::new()
        } else {
            vec![resolved
                .security
                .into_iter()
                .map(|scheme| (scheme, Vec::new()))
                .collect()]
        };

        Ok(Operation {
            tags: resolved.tags,
            summary: resolved.summary,
            description: resolved.description,
            external_docs: resolved.external_docs.map(|docs| ExternalDocumentation {
                url: docs.url,
                description: docs.description,
            }),
            operation_id,
            parameters,
            request_body,
            responses,
            deprecated: resolved.deprecated,
            security,
            servers: resolved
                .servers
                .into_iter()
                .map(|url| Server { url })
                .collect(),
            extensions: resolved.extensions,
        })
    }

    /// Returns `base`, or `base_2`, `base_3`, ... when it is already taken.
    fn unique_operation_id(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut suffix = 2;
        while self.operation_ids.contains(&candidate) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        self.operation_ids.insert(candidate.clone());
        candidate
    }
}

fn json_content(schema: Schema) -> BTreeMap<String, MediaType> {
    let mut content = BTreeMap::new();
    content.insert(JSON_CONTENT_TYPE.to_string(), MediaType { schema });
    content
}
