//! Graph builder
//!
//! [`GraphBuilder`] is the only way collector tasks touch the shared
//! [`ResourceGraph`]. Every method takes the graph mutex for the duration of a
//! single operation; no reference to graph storage leaves this module.

use super::model::{AccountSummary, EdgeType, Node, NodeKey, Region};
use super::store::{GraphExport, ResourceGraph};
use crate::client::ApiClient;
use crate::error::GraphError;
use crate::feedback::CoreFeedback;
use crate::queue::ExecutorQueue;
use anyhow::Result;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;

/// Graph shared by all builders of a collection run
pub type SharedGraph = Arc<Mutex<ResourceGraph>>;

/// Scope-bound handle to the shared graph
#[derive(Clone)]
pub struct GraphBuilder {
    graph: SharedGraph,
    cloud: String,
    account_id: String,
    region: Region,
    client: Arc<dyn ApiClient>,
    queue: Arc<ExecutorQueue>,
    feedback: CoreFeedback,
}

impl GraphBuilder {
    pub fn new(
        graph: SharedGraph,
        cloud: &str,
        account_id: &str,
        region: Region,
        client: Arc<dyn ApiClient>,
        queue: Arc<ExecutorQueue>,
        feedback: CoreFeedback,
    ) -> Self {
        Self {
            graph,
            cloud: cloud.to_string(),
            account_id: account_id.to_string(),
            region,
            client,
            queue,
            feedback,
        }
    }

    /// Builder for `region`, sharing graph and queue
    pub fn for_region(&self, region: &Region) -> Self {
        Self {
            graph: self.graph.clone(),
            cloud: self.cloud.clone(),
            account_id: self.account_id.clone(),
            region: region.clone(),
            client: self.client.for_region(region),
            queue: self.queue.clone(),
            feedback: self.feedback.with_context(&[region.id.as_str()]),
        }
    }

    pub fn cloud(&self) -> &str {
        &self.cloud
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn account_key(&self) -> NodeKey {
        NodeKey::account(&self.account_id)
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn client(&self) -> &Arc<dyn ApiClient> {
        &self.client
    }

    pub fn feedback(&self) -> &CoreFeedback {
        &self.feedback
    }

    /// Submit follow-up work to the shared queue
    pub fn submit_work<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.queue.submit_work(task);
    }

    /// Insert a node. Resources without a region get this builder's region.
    pub fn add_node(&self, node: impl Into<Node>) -> NodeKey {
        let mut node = node.into();
        if let Node::Resource(resource) = &mut node {
            if resource.region.is_none() {
                resource.region = Some(self.region.id.clone());
            }
        }
        self.graph.lock().add_node(node)
    }

    /// Insert the edge `from -> to`; both nodes must exist
    pub fn add_edge(
        &self,
        from: &NodeKey,
        edge_type: EdgeType,
        to: &NodeKey,
    ) -> Result<bool, GraphError> {
        self.graph.lock().add_edge(from, to, edge_type)
    }

    /// Insert the edge `other -> node`; both nodes must exist
    pub fn add_reverse_edge(
        &self,
        node: &NodeKey,
        edge_type: EdgeType,
        other: &NodeKey,
    ) -> Result<bool, GraphError> {
        self.graph.lock().add_edge(other, node, edge_type)
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.graph.lock().contains(key)
    }

    /// Copy of the node stored under `key`
    pub fn node(&self, key: &NodeKey) -> Option<Node> {
        self.graph.lock().node(key).cloned()
    }

    /// Find a resource by kind and id: this region first, then global, then any region
    pub fn find_resource(&self, kind: &str, id: &str) -> Option<NodeKey> {
        self.find_resource_near(kind, id, Some(&self.region.id))
    }

    /// Like [`Self::find_resource`], searching `region` first
    pub fn find_resource_near(&self, kind: &str, id: &str, region: Option<&str>) -> Option<NodeKey> {
        let global = super::model::GLOBAL_REGION_ID;
        self.graph.lock().find(kind, id, &[region, Some(global), None])
    }

    /// Snapshot of all nodes currently in the graph
    pub fn nodes(&self) -> Vec<Node> {
        self.graph.lock().nodes()
    }

    /// Write the account summary counters
    pub fn update_account(&self, summary: AccountSummary) {
        if let Some(account) = self.graph.lock().account_mut() {
            account.summary = summary;
        }
    }

    /// Use `alias` as the account name unless the account already has one
    pub fn set_account_alias(&self, alias: &str) {
        if let Some(account) = self.graph.lock().account_mut() {
            if account.name.is_empty() || account.name == account.id {
                account.name = alias.to_string();
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.lock().node_count()
    }

    pub fn export(&self) -> GraphExport {
        self.graph.lock().export()
    }
}
