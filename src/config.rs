//! Project configuration: router catalog definitions, security indicators, handler patterns
//! and document info.
//!
//! The configuration lives in `<project>/.openapi-infer.yaml`. Every top-level field present in
//! the file replaces the built-in default for that field; absent fields keep their defaults.

use crate::error::{Error, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// File name looked up in the project root when no explicit config path is given.
pub const CONFIG_FILE_NAME: &str = ".openapi-infer.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub info: InfoConfig,
    pub security_schemes: BTreeMap<String, SecuritySchemeConfig>,
    pub router_definitions: Vec<RouterDefinition>,
    pub security_patterns: Vec<SecurityPattern>,
    pub handler_patterns: HandlerPatterns,
    /// Extractor type names whose generic argument is the request body (`Json<T>`).
    pub request_extractors: Vec<String>,
    /// Extractor type names whose generic argument lists query parameters (`Query<T>`).
    pub query_extractors: Vec<String>,
    /// Extractor type names carrying path parameters (`Path<T>`).
    pub path_extractors: Vec<String>,
    pub param_parsers: Vec<ParamParser>,
    pub metadata: MetadataNames,
    /// Path fragments; files whose path contains one of them are not scanned.
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InfoConfig {
    pub title: String,
    pub version: String,
    pub description: Option<String>,
}

impl Default for InfoConfig {
    fn default() -> Self {
        Self {
            title: "Generated API".to_string(),
            version: "1.0.0".to_string(),
            description: None,
        }
    }
}

/// A security scheme as it appears under `components.securitySchemes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySchemeConfig {
    #[serde(rename = "type")]
    pub scheme_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "in", skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One router-like type and the roles of its methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterDefinition {
    #[serde(rename = "type")]
    pub type_path: String,
    #[serde(default)]
    pub endpoint_methods: Vec<String>,
    #[serde(default)]
    pub group_methods: Vec<String>,
    #[serde(default)]
    pub middleware_wrapper_methods: Vec<String>,
    /// Methods mounting another router, `(prefix, router)` or `(router)`.
    #[serde(default)]
    pub nest_methods: Vec<String>,
    /// Endpoint and group calls return the router itself (builder style).
    #[serde(default)]
    pub chainable: bool,
}

/// A call that, when found in a middleware body, implies a security scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPattern {
    pub callee_path: String,
    pub scheme_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandlerPatterns {
    pub request_body: Vec<RequestBodyPattern>,
    pub response_body: Vec<ResponseBodyPattern>,
    pub query_parameter: Vec<NamedParameterPattern>,
    pub header_parameter: Vec<NamedParameterPattern>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBodyPattern {
    pub callee_path: String,
    pub arg_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBodyPattern {
    pub callee_path: String,
    #[serde(default)]
    pub status_code_index: Option<usize>,
    #[serde(default)]
    pub data_index: Option<usize>,
    #[serde(default)]
    pub description_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedParameterPattern {
    pub callee_path: String,
    pub name_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKindConfig {
    Integer,
    Number,
    Uuid,
}

/// A call that parses a path-parameter string into a richer kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamParser {
    pub callee_path: String,
    pub kind: ParamKindConfig,
}

/// Method names of the fluent metadata chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataNames {
    pub handler_entry: String,
    pub group_entry: String,
    pub unwrap: String,
}

impl Default for MetadataNames {
    fn default() -> Self {
        Self {
            handler_entry: "describe".to_string(),
            group_entry: "describe_group".to_string(),
            unwrap: "into_handler".to_string(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            info: InfoConfig::default(),
            security_schemes: BTreeMap::new(),
            router_definitions: vec![RouterDefinition {
                type_path: "axum::Router".to_string(),
                endpoint_methods: strings(&["route"]),
                group_methods: Vec::new(),
                middleware_wrapper_methods: Vec::new(),
                nest_methods: strings(&["nest", "merge"]),
                chainable: true,
            }],
            security_patterns: Vec::new(),
            handler_patterns: HandlerPatterns::default(),
            request_extractors: strings(&["Json", "Form"]),
            query_extractors: strings(&["Query"]),
            path_extractors: strings(&["Path"]),
            param_parsers: vec![ParamParser {
                callee_path: "Uuid::parse_str".to_string(),
                kind: ParamKindConfig::Uuid,
            }],
            metadata: MetadataNames::default(),
            exclude: Vec::new(),
        }
    }
}

impl Config {
    /// Loads the configuration for a project directory.
    ///
    /// A missing config file yields the defaults; a malformed one is an error.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            debug!("No {} in {}, using defaults", CONFIG_FILE_NAME, project_root.display());
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    /// Loads the configuration from an explicit file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_yaml(&content).map_err(|e| {
            Error::Configuration(format!("{}: {}", path.display(), e))
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }
}
