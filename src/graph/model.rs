//! Graph node and edge types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Kind tag of account nodes
pub const ACCOUNT_KIND: &str = "account";
/// Kind tag of region nodes
pub const REGION_KIND: &str = "region";
/// Id of the distinguished global region
pub const GLOBAL_REGION_ID: &str = "global";

/// Identity of a node in the resource graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub id: String,
}

impl NodeKey {
    pub fn account(id: &str) -> Self {
        Self {
            kind: ACCOUNT_KIND.to_string(),
            region: None,
            id: id.to_string(),
        }
    }

    pub fn region(id: &str) -> Self {
        Self {
            kind: REGION_KIND.to_string(),
            region: None,
            id: id.to_string(),
        }
    }

    pub fn resource(kind: &str, region: Option<&str>, id: &str) -> Self {
        Self {
            kind: kind.to_string(),
            region: region.map(str::to_string),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}:{}:{}", self.kind, region, self.id),
            None => write!(f, "{}:{}", self.kind, self.id),
        }
    }
}

/// Relationship between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    /// Containment / default relationship (account -> region -> resource)
    #[default]
    Default,
    /// Deletion dependency
    Delete,
}

/// Account-wide summary counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub users: u64,
    pub groups: u64,
    pub policies: u64,
    pub policy_versions_in_use: u64,
    pub mfa_devices: u64,
    pub mfa_devices_in_use: u64,
    pub account_mfa_enabled: bool,
    pub account_access_keys_present: bool,
    pub server_certificates: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_policy: Option<PasswordPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub minimum_password_length: u64,
    pub require_symbols: bool,
    pub require_numbers: bool,
    pub require_uppercase_characters: bool,
    pub require_lowercase_characters: bool,
    pub expire_passwords: bool,
    pub max_password_age: u64,
}

/// Root of the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub summary: AccountSummary,
}

impl Account {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            summary: AccountSummary::default(),
        }
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::account(&self.id)
    }

    /// Display name, falling back to the id
    pub fn dname(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// One geographic/API scope of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub name: String,
    pub account_id: String,
    /// API region used to issue calls for this scope
    pub endpoint: String,
}

impl Region {
    pub fn new(id: &str, account_id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            account_id: account_id.to_string(),
            endpoint: id.to_string(),
        }
    }

    /// The distinguished global scope, calling APIs through `endpoint`
    pub fn global(account_id: &str, endpoint: &str) -> Self {
        Self {
            id: GLOBAL_REGION_ID.to_string(),
            name: GLOBAL_REGION_ID.to_string(),
            account_id: account_id.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.id == GLOBAL_REGION_ID
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::region(&self.id)
    }
}

/// A discovered cloud entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub name: String,
    /// Owning region id; `None` for account-level resources
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Raw provider document the resource was built from
    #[serde(default)]
    pub source: Value,
}

impl Resource {
    pub fn new(kind: &str, id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            name: id.to_string(),
            region: None,
            tags: BTreeMap::new(),
            source: Value::Null,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_source(mut self, source: Value) -> Self {
        self.source = source;
        self
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::resource(&self.kind, self.region.as_deref(), &self.id)
    }
}

/// A node of the resource graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "lowercase")]
pub enum Node {
    Account(Account),
    Region(Region),
    Resource(Resource),
}

impl Node {
    pub fn key(&self) -> NodeKey {
        match self {
            Node::Account(account) => account.key(),
            Node::Region(region) => region.key(),
            Node::Resource(resource) => resource.key(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Node::Account(_) => ACCOUNT_KIND,
            Node::Region(_) => REGION_KIND,
            Node::Resource(resource) => &resource.kind,
        }
    }
}

impl From<Account> for Node {
    fn from(account: Account) -> Self {
        Node::Account(account)
    }
}

impl From<Region> for Node {
    fn from(region: Region) -> Self {
        Node::Region(region)
    }
}

impl From<Resource> for Node {
    fn from(resource: Resource) -> Self {
        Node::Resource(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_keys_display() {
        assert_eq!(NodeKey::account("123").to_string(), "account:123");
        assert_eq!(NodeKey::region("eu-west-1").to_string(), "region:eu-west-1");
        assert_eq!(
            Resource::new("bucket", "logs").with_region("global").key().to_string(),
            "bucket:global:logs"
        );
    }

    #[test]
    fn global_region_is_distinct_from_its_endpoint() {
        let global = Region::global("123", "us-east-1");
        let east = Region::new("us-east-1", "123");
        assert!(global.is_global());
        assert!(!east.is_global());
        assert_ne!(global.key(), east.key());
        assert_eq!(global.endpoint, east.endpoint);
    }

    #[test]
    fn account_display_name_falls_back_to_id() {
        assert_eq!(Account::new("123", "").dname(), "123");
        assert_eq!(Account::new("123", "prod").dname(), "prod");
    }
}
