//! Resource Registry - Typed table of resource kinds
//!
//! Kinds are registered per scope: global kinds are collected once per
//! account, regional kinds once per region. Kinds can be implemented in code
//! or declared with a [`KindDef`] (see [`super::fetcher::DefinedKind`]).

use super::fetcher::DefinedKind;
use super::kind::ResourceKind;
use crate::client::ApiSpec;
use crate::graph::EdgeType;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Relationship declared from a field of the source document
#[derive(Debug, Clone, Deserialize)]
pub struct LinkDef {
    /// Dot-notation path to the referenced id (a string or an array of strings)
    pub json_path: String,
    /// Kind of the referenced resource
    pub kind: String,
    #[serde(default)]
    pub edge_type: EdgeType,
    /// Create the edge from the referenced resource to this one
    #[serde(default)]
    pub reverse: bool,
}

/// Declarative resource kind definition
#[derive(Debug, Clone, Deserialize)]
pub struct KindDef {
    pub kind: String,
    pub service: String,
    pub action: String,
    /// Dot-notation path of the item list in the response; empty for a top-level array
    #[serde(default)]
    pub response_path: String,
    pub id_field: String,
    #[serde(default)]
    pub name_field: Option<String>,
    #[serde(default)]
    pub tags_field: Option<String>,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub links: Vec<LinkDef>,
}

/// All resource kinds known to a collector
#[derive(Clone, Default)]
pub struct ResourceRegistry {
    global: Vec<Arc<dyn ResourceKind>>,
    regional: Vec<Arc<dyn ResourceKind>>,
}

impl ResourceRegistry {
    pub fn new(global: Vec<Arc<dyn ResourceKind>>, regional: Vec<Arc<dyn ResourceKind>>) -> Self {
        Self { global, regional }
    }

    /// Build a registry from declarative definitions
    pub fn from_definitions(defs: &[KindDef]) -> Self {
        let mut registry = Self::default();
        for def in defs {
            let kind: Arc<dyn ResourceKind> = Arc::new(DefinedKind::new(def.clone()));
            if def.is_global {
                registry.global.push(kind);
            } else {
                registry.regional.push(kind);
            }
        }
        registry
    }

    /// Kinds collected once per account
    pub fn global(&self) -> &[Arc<dyn ResourceKind>] {
        &self.global
    }

    /// Kinds collected once per region
    pub fn regional(&self) -> &[Arc<dyn ResourceKind>] {
        &self.regional
    }

    /// Look up a kind by tag (global kinds first)
    pub fn get(&self, kind: &str) -> Option<&Arc<dyn ResourceKind>> {
        self.global
            .iter()
            .chain(self.regional.iter())
            .find(|k| k.kind() == kind)
    }

    /// All kind tags (for `--list-apis` and validation)
    pub fn kinds(&self) -> Vec<&str> {
        let tags: BTreeSet<&str> = self
            .global
            .iter()
            .chain(self.regional.iter())
            .map(|k| k.kind())
            .collect();
        tags.into_iter().collect()
    }

    /// APIs called by all registered kinds, sorted and de-duplicated
    pub fn called_collect_apis(&self) -> Vec<ApiSpec> {
        let specs: BTreeSet<ApiSpec> = self
            .global
            .iter()
            .chain(self.regional.iter())
            .flat_map(|k| k.called_collect_apis())
            .collect();
        specs.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defs() -> Vec<KindDef> {
        serde_json::from_value(json!([
            {
                "kind": "bucket",
                "service": "s3",
                "action": "list-buckets",
                "response_path": "Buckets",
                "id_field": "Name",
                "is_global": true
            },
            {
                "kind": "instance",
                "service": "ec2",
                "action": "describe-instances",
                "response_path": "Instances",
                "id_field": "InstanceId",
                "links": [{ "json_path": "SecurityGroups", "kind": "security_group" }]
            },
            {
                "kind": "volume",
                "service": "ec2",
                "action": "describe-instances",
                "id_field": "VolumeId"
            }
        ]))
        .unwrap()
    }

    #[test]
    fn test_definitions_are_split_by_scope() {
        let registry = ResourceRegistry::from_definitions(&defs());
        assert_eq!(registry.global().len(), 1);
        assert_eq!(registry.regional().len(), 2);
        assert_eq!(registry.kinds(), vec!["bucket", "instance", "volume"]);
    }

    #[test]
    fn test_lookup_by_kind() {
        let registry = ResourceRegistry::from_definitions(&defs());
        assert_eq!(registry.get("instance").map(|k| k.kind()), Some("instance"));
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_link_defaults() {
        let defs = defs();
        let link = &defs[1].links[0];
        assert_eq!(link.edge_type, EdgeType::Default);
        assert!(!link.reverse);
    }

    #[test]
    fn test_called_apis_are_deduplicated() {
        let registry = ResourceRegistry::from_definitions(&defs());
        let apis: Vec<String> = registry
            .called_collect_apis()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(apis, vec!["ec2::describe-instances", "s3::list-buckets"]);
    }
}
