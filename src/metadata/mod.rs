//! Explicit and group-scoped descriptive metadata, and how it is merged onto operations.
//!
//! - [`chain`] parses the fluent `describe(..)` / `describe_group(..)` call chains
//! - [`overlay`] ranks explicit, group and inferred data into final operation fields
//! - [`path_params`] refines the kind of auto-detected path parameters

pub mod chain;
pub mod overlay;
pub mod path_params;

use crate::program::{ExprId, TypeId, VarId};
use crate::route_tree::{ParamLocation, RouteTree};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSpec {
    pub ty: Option<TypeId>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub location: ParamLocation,
    pub description: Option<String>,
    pub required: bool,
    pub deprecated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHeader {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalDocs {
    pub url: String,
    pub description: Option<String>,
}

/// Explicit per-handler overrides, parsed from the chain at the registration site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerMetadata {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub security: Vec<String>,
    pub request_body: Option<TypeId>,
    pub responses: BTreeMap<u16, ResponseSpec>,
    pub parameters: Vec<ParameterSpec>,
    pub response_headers: Vec<ResponseHeader>,
    pub servers: Vec<String>,
    pub external_docs: Option<ExternalDocs>,
    pub operation_id: Option<String>,
    pub deprecated: Option<bool>,
    pub extensions: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupMetadata {
    pub tags: Vec<String>,
    pub security: Vec<String>,
    pub deprecated: bool,
}

impl GroupMetadata {
    fn merge(&mut self, other: &GroupMetadata) {
        extend_unique(&mut self.tags, &other.tags);
        extend_unique(&mut self.security, &other.security);
        self.deprecated |= other.deprecated;
    }
}

/// What a group chain is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// A variable bound to a scope
    Variable(VarId),
    /// A scope-producing call written directly inside the chain
    Site(ExprId),
}

pub type GroupMetadataMap = HashMap<GroupKey, GroupMetadata>;

/// Copies group metadata onto the scopes it targets, by bound variable or by origin call.
pub fn apply_group_metadata(tree: &mut RouteTree, groups: &GroupMetadataMap) {
    for id in tree.walk() {
        let scope = tree.scope(id);
        let mut merged = GroupMetadata::default();
        let keys: Vec<GroupKey> = scope
            .variables()
            .map(GroupKey::Variable)
            .chain(scope.origin.map(GroupKey::Site))
            .collect();
        for key in keys {
            if let Some(group) = groups.get(&key) {
                merged.merge(group);
            }
        }
        let scope = tree.scope_mut(id);
        extend_unique(&mut scope.tags, &merged.tags);
        extend_unique(&mut scope.security, &merged.security);
        scope.deprecated |= merged.deprecated;
    }
}

pub(crate) fn extend_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}
