//! Resource Fetcher
//!
//! [`DefinedKind`] collects resources described by a [`KindDef`]: it calls the
//! declared API, extracts the items at the response path and adds one node per
//! item. In the connect phase it links each resource to the resources its
//! source document references.

use super::kind::ResourceKind;
use super::registry::KindDef;
use crate::client::ApiSpec;
use crate::graph::{GraphBuilder, Resource};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Resource kind driven by a definition
pub struct DefinedKind {
    def: KindDef,
}

impl DefinedKind {
    pub fn new(def: KindDef) -> Self {
        Self { def }
    }

    pub fn definition(&self) -> &KindDef {
        &self.def
    }

    fn to_resource(&self, item: Value) -> Option<Resource> {
        let id = extract_json_value(&item, &self.def.id_field)?;
        let name = self
            .def
            .name_field
            .as_deref()
            .and_then(|field| extract_json_value(&item, field))
            .unwrap_or_else(|| id.clone());
        let tags = self
            .def
            .tags_field
            .as_deref()
            .map(|field| extract_tags(&item, field))
            .unwrap_or_default();

        Some(
            Resource::new(&self.def.kind, &id)
                .with_name(&name)
                .with_tags(tags)
                .with_source(item),
        )
    }
}

#[async_trait]
impl ResourceKind for DefinedKind {
    fn kind(&self) -> &str {
        &self.def.kind
    }

    async fn collect_resources(&self, builder: &GraphBuilder) -> Result<()> {
        let response = builder
            .client()
            .get(&self.def.service, &self.def.action, None, &[])
            .await?;
        let Some(response) = response else {
            return Ok(());
        };

        let mut added = 0usize;
        for item in extract_items(&response, &self.def.response_path) {
            match self.to_resource(item) {
                Some(resource) => {
                    builder.add_node(resource);
                    added += 1;
                }
                None => tracing::warn!(
                    kind = %self.def.kind,
                    "Item without {} field, skipping",
                    self.def.id_field
                ),
            }
        }

        tracing::debug!(kind = %self.def.kind, region = %builder.region().id, count = added, "Collected resources");
        Ok(())
    }

    fn connect_in_graph(&self, builder: &GraphBuilder, resource: &Resource) -> Result<()> {
        let own = resource.key();
        for link in &self.def.links {
            for target_id in extract_json_strings(&resource.source, &link.json_path) {
                let Some(target) =
                    builder.find_resource_near(&link.kind, &target_id, resource.region.as_deref())
                else {
                    tracing::debug!(from = %own, kind = %link.kind, id = %target_id, "Link target not collected");
                    continue;
                };
                if link.reverse {
                    builder.add_reverse_edge(&own, link.edge_type, &target)?;
                } else {
                    builder.add_edge(&own, link.edge_type, &target)?;
                }
            }
        }
        Ok(())
    }

    fn called_collect_apis(&self) -> Vec<ApiSpec> {
        vec![ApiSpec::new(&self.def.service, &self.def.action)]
    }
}

/// Extract items from response using the response_path
pub fn extract_items(response: &Value, path: &str) -> Vec<Value> {
    if path.is_empty() {
        return response.as_array().cloned().unwrap_or_default();
    }

    let mut current = response;
    for part in path.split('.') {
        current = match current.get(part) {
            Some(v) => v,
            None => return vec![],
        };
    }

    current.as_array().cloned().unwrap_or_default()
}

/// Walk a dot-notation path; numeric parts index arrays
fn lookup<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = item;
    for part in path.split('.') {
        current = match part.parse::<usize>() {
            Ok(idx) => current.get(idx)?,
            Err(_) => current.get(part)?,
        };
    }
    Some(current)
}

/// Extract a scalar value from JSON using a dot-notation path
pub fn extract_json_value(item: &Value, path: &str) -> Option<String> {
    match lookup(item, path)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Extract one or more ids: a scalar, or an array of scalars
pub fn extract_json_strings(item: &Value, path: &str) -> Vec<String> {
    match lookup(item, path) {
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(_) => extract_json_value(item, path).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Tags as either an object or a list of `{"Key": .., "Value": ..}` pairs
fn extract_tags(item: &Value, path: &str) -> BTreeMap<String, String> {
    match lookup(item, path) {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| {
                let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                (k.clone(), value)
            })
            .collect(),
        Some(Value::Array(pairs)) => pairs
            .iter()
            .filter_map(|pair| {
                let key = pair.get("Key")?.as_str()?;
                let value = pair.get("Value").and_then(Value::as_str).unwrap_or_default();
                Some((key.to_string(), value.to_string()))
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}
