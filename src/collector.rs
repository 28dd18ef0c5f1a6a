//! Account collector
//!
//! [`AccountCollector`] collects every resource of one account:
//!
//! 1. global resource kinds (next to the account metadata) on the shared queue,
//! 2. all regions on a region pool, each region with its own fail-fast queue,
//! 3. the connect phase, which adds all edges once every node exists.
//!
//! Permission errors skip a single resource kind, unexpected errors skip a
//! single region, and connect errors skip a single node. A run always
//! completes and returns a [`CollectionReport`].

use crate::accumulator::{ErrorAccumulator, ErrorRecord};
use crate::client::{ApiClient, ApiSpec};
use crate::config::CollectorConfig;
use crate::error::{is_permission_denied, panic_message};
use crate::feedback::{CoreFeedback, FeedbackSink};
use crate::graph::{
    Account, AccountSummary, EdgeType, GraphBuilder, GraphExport, Node, NodeKey, PasswordPolicy,
    Region, Resource, ResourceGraph, SharedGraph, ACCOUNT_KIND, GLOBAL_REGION_ID,
};
use crate::progress::{ProgressDone, ProgressTree};
use crate::queue::ExecutorQueue;
use crate::resource::{ResourceKind, ResourceRegistry};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ACCOUNT_SUMMARY_API: (&str, &str) = ("iam", "get-account-summary");
const PASSWORD_POLICY_API: (&str, &str) = ("iam", "get-account-password-policy");
const ACCOUNT_ALIASES_API: (&str, &str) = ("iam", "list-account-aliases");
const DESCRIBE_REGIONS_API: (&str, &str) = ("ec2", "describe-regions");

/// Phase of a collection run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorPhase {
    Idle,
    CollectingGlobal,
    CollectingRegions,
    Connecting,
    Done,
}

/// Outcome of a collection run
#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    pub run_id: Uuid,
    pub cloud: String,
    pub account_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub node_count: usize,
    pub edge_count: usize,
    /// Regions abandoned after an unexpected error
    pub skipped_regions: Vec<String>,
    pub errors: Vec<ErrorRecord>,
}

/// Collects all resources of one account into a single graph
#[derive(Clone)]
pub struct AccountCollector {
    config: Arc<CollectorConfig>,
    cloud: String,
    account: Account,
    global_region: Region,
    regions: Arc<Vec<Region>>,
    registry: Arc<ResourceRegistry>,
    graph: SharedGraph,
    errors: Arc<ErrorAccumulator>,
    client: Arc<dyn ApiClient>,
    feedback: CoreFeedback,
    phase: Arc<Mutex<CollectorPhase>>,
    skipped_regions: Arc<Mutex<Vec<String>>>,
}

impl AccountCollector {
    pub fn new(
        config: CollectorConfig,
        cloud: &str,
        account: Account,
        regions: &[String],
        registry: Arc<ResourceRegistry>,
        client: Arc<dyn ApiClient>,
        sink: Arc<dyn FeedbackSink>,
    ) -> Self {
        let global_region = Region::global(&account.id, &config.global_region_endpoint);
        let regions: Vec<Region> = regions
            .iter()
            .filter(|id| {
                if id.as_str() == GLOBAL_REGION_ID {
                    warn!("Region id {} is reserved for the global scope, ignoring", id);
                    return false;
                }
                config.should_collect_region(id)
            })
            .map(|id| Region::new(id, &account.id))
            .collect();
        let feedback = CoreFeedback::new(sink).with_context(&[cloud, account.dname()]);
        let graph = Arc::new(Mutex::new(ResourceGraph::new(account.clone())));

        Self {
            config: Arc::new(config),
            cloud: cloud.to_string(),
            account,
            global_region,
            regions: Arc::new(regions),
            registry,
            graph,
            errors: Arc::new(ErrorAccumulator::new()),
            client,
            feedback,
            phase: Arc::new(Mutex::new(CollectorPhase::Idle)),
            skipped_regions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn phase(&self) -> CollectorPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: CollectorPhase) {
        debug!(account = %self.account.id, ?phase, "Collector phase");
        *self.phase.lock() = phase;
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn errors(&self) -> &ErrorAccumulator {
        &self.errors
    }

    /// Copy of the collected graph
    pub fn graph(&self) -> ResourceGraph {
        self.graph.lock().clone()
    }

    pub fn export(&self) -> GraphExport {
        self.graph.lock().export()
    }

    /// Builder for the global scope on `queue`
    fn global_builder(&self, queue: Arc<ExecutorQueue>) -> GraphBuilder {
        GraphBuilder::new(
            self.graph.clone(),
            &self.cloud,
            &self.account.id,
            self.global_region.clone(),
            self.client.for_region(&self.global_region),
            queue,
            self.feedback.clone(),
        )
    }

    fn queue_name(&self, suffix: &str) -> String {
        format!("{}_{}{}", self.cloud, self.account.id, suffix)
    }

    /// Run a complete collection
    pub async fn collect(&self) -> CollectionReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let account_id = self.account.id.clone();

        // Shared between global collection and follow-up work of all regions
        let shared_queue = Arc::new(ExecutorQueue::new(
            &self.queue_name(""),
            self.config.shared_pool_size,
            false,
        ));
        let global_builder = self.global_builder(shared_queue.clone());

        self.set_phase(CollectorPhase::CollectingGlobal);
        let metadata_builder = global_builder.clone();
        let metadata_errors = self.errors.clone();
        shared_queue.submit_work(async move {
            if let Err(err) = update_account(&metadata_builder).await {
                metadata_errors.record(&metadata_builder.region().id, ACCOUNT_KIND, &err);
                if !is_permission_denied(&err) {
                    return Err(err);
                }
            }
            Ok(())
        });
        global_builder.add_node(self.global_region.clone());

        // mark open progress for all scopes
        let mut progress = ProgressTree::new(self.account.dname(), vec![self.cloud.clone()]);
        progress.add_progress(ProgressDone::new(&self.global_region.id, 0, 1));
        for region in self.regions.iter() {
            progress.add_progress(ProgressDone::new(&region.id, 0, 1));
        }
        self.feedback.progress(&progress);

        info!(account = %account_id, run = %run_id, "Collect global resources");
        for kind in self.registry.global() {
            if self.config.should_collect(kind.kind()) {
                let kind = kind.clone();
                let builder = global_builder.clone();
                let errors = self.errors.clone();
                shared_queue.submit_work(collect_resource_kind(kind, builder, errors));
            }
        }
        drain(&shared_queue).await;
        self.feedback.progress_done(&self.global_region.id, 1, 1);
        self.errors
            .report_region(global_builder.feedback(), &self.global_region.id);

        self.set_phase(CollectorPhase::CollectingRegions);
        info!(account = %account_id, regions = self.regions.len(), "Collect regional resources");
        let region_queue = ExecutorQueue::new(
            &self.queue_name("_regions"),
            self.config.region_pool_size,
            false,
        );
        for region in self.regions.iter() {
            let collector = self.clone();
            let region = region.clone();
            let builder = global_builder.for_region(&region);
            region_queue.submit_work(async move {
                collector.collect_region(&region, builder).await;
                Ok(())
            });
        }
        drain(&region_queue).await;
        drain(&shared_queue).await;

        self.set_phase(CollectorPhase::Connecting);
        info!(account = %account_id, "Connect resources and create edges");
        self.connect_resources(&global_builder);
        drain(&shared_queue).await;

        self.feedback
            .progress_done_in(self.account.dname(), 1, 1, &[self.cloud.clone()]);
        self.errors.report_all(global_builder.feedback());
        self.set_phase(CollectorPhase::Done);

        let (node_count, edge_count) = {
            let graph = self.graph.lock();
            (graph.node_count(), graph.edge_count())
        };
        info!(
            account = %account_id,
            nodes = node_count,
            edges = edge_count,
            "Collecting resources done"
        );

        CollectionReport {
            run_id,
            cloud: self.cloud.clone(),
            account_id,
            started_at,
            finished_at: Utc::now(),
            node_count,
            edge_count,
            skipped_regions: self.skipped_regions.lock().clone(),
            errors: self.errors.summary(),
        }
    }

    /// Collect all regional kinds of one region. Never fails: an unexpected
    /// error abandons this region only.
    async fn collect_region(&self, region: &Region, builder: GraphBuilder) {
        // Give up on the remaining kinds of this region after the first unexpected error
        let queue = ExecutorQueue::new(
            &self.queue_name(&format!("_{}", region.id)),
            self.config.region_resources_pool_size,
            true,
        );
        builder.add_node(region.clone());

        for kind in self.registry.regional() {
            if self.config.should_collect(kind.kind()) {
                queue.submit_work(collect_resource_kind(
                    kind.clone(),
                    builder.clone(),
                    self.errors.clone(),
                ));
            }
        }

        match queue.wait_for_submitted_work().await {
            Ok(()) => {
                self.feedback.progress_done(&region.id, 1, 1);
                self.errors.report_region(builder.feedback(), &region.id);
            }
            Err(err) => {
                builder.feedback().error(&format!(
                    "Error collecting resources in account {} region {}: {:#} - skipping region",
                    self.account.id, region.id, err
                ));
                self.skipped_regions.lock().push(region.id.clone());
                self.feedback.progress_done(&region.id, 1, 1);
            }
        }
    }

    /// Add the containment edge of every node and let each resource add its own edges.
    ///
    /// Errors are isolated per node. Returns the number of nodes that failed.
    pub fn connect_resources(&self, builder: &GraphBuilder) -> usize {
        let account = builder.account_key();
        let mut failed = 0;

        for node in builder.nodes() {
            let connected = panic::catch_unwind(AssertUnwindSafe(|| match &node {
                Node::Account(_) => Ok(()),
                Node::Region(region) => builder
                    .add_edge(&account, EdgeType::Default, &region.key())
                    .map(|_| ())
                    .map_err(anyhow::Error::from),
                Node::Resource(resource) => self.connect_resource(builder, &account, resource),
            }));
            let result = connected.unwrap_or_else(|payload| {
                Err(anyhow!(
                    "Connecting {} panicked: {}",
                    node.key(),
                    panic_message(&*payload)
                ))
            });

            if let Err(err) = result {
                failed += 1;
                let scope = match &node {
                    Node::Resource(resource) => resource.region.as_deref().unwrap_or(GLOBAL_REGION_ID),
                    _ => GLOBAL_REGION_ID,
                };
                warn!(node = %node.key(), "Failed to connect node: {err:#}");
                self.errors.record(scope, node.kind(), &err);
            }
        }

        if failed > 0 {
            warn!(account = %self.account.id, failed, "Some nodes could not be connected");
        }
        failed
    }

    fn connect_resource(
        &self,
        builder: &GraphBuilder,
        account: &NodeKey,
        resource: &Resource,
    ) -> Result<()> {
        let key = resource.key();
        let parent = resource
            .region
            .as_deref()
            .map(NodeKey::region)
            .filter(|region| builder.contains(region))
            .unwrap_or_else(|| account.clone());
        builder.add_edge(&parent, EdgeType::Default, &key)?;

        match self.registry.get(&resource.kind) {
            Some(kind) => kind
                .connect_in_graph(builder, resource)
                .with_context(|| format!("Failed to connect {key}")),
            None => {
                debug!(node = %key, "No resource kind registered, skipping connect");
                Ok(())
            }
        }
    }
}

/// Wait for a non fail-fast queue
async fn drain(queue: &ExecutorQueue) {
    if let Err(err) = queue.wait_for_submitted_work().await {
        warn!(queue = %queue.name(), "Queue finished with error: {err:#}");
    }
}

/// Collect one resource kind. Permission errors are recorded and swallowed,
/// every other error is recorded and returned.
async fn collect_resource_kind(
    kind: Arc<dyn ResourceKind>,
    builder: GraphBuilder,
    errors: Arc<ErrorAccumulator>,
) -> Result<()> {
    let scope = builder.region().id.clone();
    let tag = kind.kind().to_string();

    // A panicking kind surfaces as an error of this kind
    let outcome = match AssertUnwindSafe(kind.collect_resources(&builder)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("Collecting {} panicked: {}", tag, panic_message(&*payload))),
    };

    match outcome {
        Ok(()) => {
            debug!(account = %builder.account_id(), region = %scope, kind = %tag, "Finished collecting");
            Ok(())
        }
        Err(err) if is_permission_denied(&err) => {
            if errors.record(&scope, &tag, &err) {
                warn!(
                    "Not authorized to collect {} resources in account {} region {} - skipping resource",
                    tag,
                    builder.account_id(),
                    scope
                );
            }
            Ok(())
        }
        Err(err) => {
            errors.record(&scope, &tag, &err);
            Err(err.context(format!("Failed to collect {tag} in {scope}")))
        }
    }
}

/// Collect the account summary counters
async fn update_account(builder: &GraphBuilder) -> Result<()> {
    info!(account = %builder.account_id(), "Collecting account summary");
    let client = builder.client();

    let (service, action) = ACCOUNT_SUMMARY_API;
    let summary_map = client
        .get(service, action, Some("SummaryMap"), &[])
        .await?
        .unwrap_or(Value::Null);
    let mut summary = summary_from_map(&summary_map);

    let (service, action) = ACCOUNT_ALIASES_API;
    let alias = client
        .get(service, action, Some("AccountAliases"), &[])
        .await?
        .and_then(|aliases| aliases.get(0).and_then(Value::as_str).map(str::to_string));
    if let Some(alias) = alias {
        builder.set_account_alias(&alias);
    }

    // No custom policy defined returns NoSuchEntity
    let (service, action) = PASSWORD_POLICY_API;
    let policy = client
        .get(service, action, Some("PasswordPolicy"), &["NoSuchEntity"])
        .await?;
    summary.password_policy = policy.as_ref().map(password_policy_from_value);

    builder.update_account(summary);
    Ok(())
}

fn count(map: &Value, key: &str) -> u64 {
    map.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn flag(map: &Value, key: &str) -> bool {
    match map.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(v) => v.as_u64().map(|n| n > 0).unwrap_or(false),
        None => false,
    }
}

fn summary_from_map(map: &Value) -> AccountSummary {
    AccountSummary {
        users: count(map, "Users"),
        groups: count(map, "Groups"),
        policies: count(map, "Policies"),
        policy_versions_in_use: count(map, "PolicyVersionsInUse"),
        mfa_devices: count(map, "MFADevices"),
        mfa_devices_in_use: count(map, "MFADevicesInUse"),
        account_mfa_enabled: flag(map, "AccountMFAEnabled"),
        account_access_keys_present: flag(map, "AccountAccessKeysPresent"),
        server_certificates: count(map, "ServerCertificates"),
        password_policy: None,
    }
}

fn password_policy_from_value(policy: &Value) -> PasswordPolicy {
    PasswordPolicy {
        minimum_password_length: count(policy, "MinimumPasswordLength"),
        require_symbols: flag(policy, "RequireSymbols"),
        require_numbers: flag(policy, "RequireNumbers"),
        require_uppercase_characters: flag(policy, "RequireUppercaseCharacters"),
        require_lowercase_characters: flag(policy, "RequireLowercaseCharacters"),
        expire_passwords: flag(policy, "ExpirePasswords"),
        max_password_age: count(policy, "MaxPasswordAge"),
    }
}

/// Region ids enabled for the account, as reported by the provider
pub async fn list_regions(client: &dyn ApiClient) -> Result<Vec<String>> {
    let (service, action) = DESCRIBE_REGIONS_API;
    let regions = client
        .get(service, action, Some("Regions"), &[])
        .await
        .context("Failed to list regions")?
        .unwrap_or(Value::Null);
    let mut ids: Vec<String> = regions
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|r| r.get("RegionName").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    ids.sort();
    ids.dedup();
    Ok(ids)
}

/// All APIs called during a collection run, sorted
pub fn called_collect_apis(registry: &ResourceRegistry) -> Vec<ApiSpec> {
    let mut specs = registry.called_collect_apis();
    for (service, action) in [
        ACCOUNT_SUMMARY_API,
        PASSWORD_POLICY_API,
        ACCOUNT_ALIASES_API,
        DESCRIBE_REGIONS_API,
    ] {
        specs.push(ApiSpec::new(service, action));
    }
    specs.sort();
    specs.dedup();
    specs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::RecordingFeedback;
    use crate::replay::ReplayFile;
    use crate::resource::KindDef;
    use serde_json::json;

    fn replay() -> ReplayFile {
        serde_json::from_value(json!({
            "account": {"id": "123", "name": "prod"},
            "regions": ["eu-west-1"],
            "kinds": [
                {
                    "kind": "security_group", "service": "ec2", "action": "describe-security-groups",
                    "response_path": "SecurityGroups", "id_field": "GroupId"
                },
                {
                    "kind": "instance", "service": "ec2", "action": "describe-instances",
                    "response_path": "Instances", "id_field": "InstanceId",
                    "links": [{"json_path": "SecurityGroups", "kind": "security_group", "reverse": true}]
                }
            ],
            "responses": {
                "global": {
                    "iam::get-account-summary": {"SummaryMap": {"Users": 4, "Policies": 9, "AccountMFAEnabled": 1}},
                    "iam::get-account-password-policy": {"PasswordPolicy": {"MinimumPasswordLength": 14, "RequireSymbols": true}}
                },
                "eu-west-1": {
                    "ec2::describe-security-groups": {"SecurityGroups": [{"GroupId": "sg-1"}]},
                    "ec2::describe-instances": {"Instances": [
                        {"InstanceId": "i-1", "SecurityGroups": ["sg-1", "sg-gone"]}
                    ]}
                }
            }
        }))
        .unwrap()
    }

    fn collector(file: &ReplayFile) -> AccountCollector {
        AccountCollector::new(
            CollectorConfig::default(),
            &file.cloud,
            Account::new(&file.account.id, &file.account.name),
            &file.regions,
            Arc::new(ResourceRegistry::from_definitions(&file.kinds)),
            Arc::new(file.client()),
            Arc::new(RecordingFeedback::new()),
        )
    }

    #[tokio::test]
    async fn test_connect_phase_is_idempotent() {
        let file = replay();
        let collector = collector(&file);
        let report = collector.collect().await;
        assert_eq!(collector.phase(), CollectorPhase::Done);

        let before = collector.export().edges;
        assert_eq!(before.len(), report.edge_count);

        let queue = Arc::new(ExecutorQueue::new("again", 2, false));
        let builder = collector.global_builder(queue.clone());
        assert_eq!(collector.connect_resources(&builder), 0);
        queue.wait_for_submitted_work().await.unwrap();

        assert_eq!(collector.export().edges, before);
    }

    #[tokio::test]
    async fn test_links_create_edges_to_collected_resources_only() {
        let file = replay();
        let collector = collector(&file);
        collector.collect().await;

        let graph = collector.graph();
        let sg = NodeKey::resource("security_group", Some("eu-west-1"), "sg-1");
        let instance = NodeKey::resource("instance", Some("eu-west-1"), "i-1");
        assert_eq!(graph.successors(&sg, EdgeType::Default), vec![instance.clone()]);
        assert_eq!(
            graph.predecessors(&instance, EdgeType::Default).len(),
            2,
            "region and security group"
        );
    }

    #[tokio::test]
    async fn test_account_summary_is_collected() {
        let file = replay();
        let collector = collector(&file);
        collector.collect().await;

        let graph = collector.graph();
        let summary = &graph.account().unwrap().summary;
        assert_eq!(summary.users, 4);
        assert_eq!(summary.policies, 9);
        assert!(summary.account_mfa_enabled);
        let policy = summary.password_policy.as_ref().unwrap();
        assert_eq!(policy.minimum_password_length, 14);
        assert!(policy.require_symbols);
        assert!(!policy.require_numbers);
    }

    #[tokio::test]
    async fn test_denied_account_summary_is_recorded_not_fatal() {
        let mut file = replay();
        file.responses.get_mut("global").unwrap().insert(
            "iam::get-account-summary".to_string(),
            serde_json::from_value(json!({"error": {"code": "AccessDenied"}})).unwrap(),
        );
        let collector = collector(&file);
        let report = collector.collect().await;

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, ACCOUNT_KIND);
        assert_eq!(report.node_count, 5);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_connected_to_its_region() {
        let file = replay();
        let collector = collector(&file);
        collector.collect().await;

        let queue = Arc::new(ExecutorQueue::new("manual", 1, false));
        let builder = collector.global_builder(queue);
        let regional = builder.for_region(&Region::new("eu-west-1", "123"));
        let orphan = regional.add_node(Resource::new("untracked", "x-1"));
        let homeless = builder.add_node(Resource::new("untracked", "x-2").with_region("gone-1"));

        assert_eq!(collector.connect_resources(&builder), 0);
        let graph = collector.graph();
        assert_eq!(
            graph.predecessors(&orphan, EdgeType::Default),
            vec![NodeKey::region("eu-west-1")]
        );
        assert_eq!(
            graph.predecessors(&homeless, EdgeType::Default),
            vec![NodeKey::account("123")]
        );
    }

    #[test]
    fn test_called_collect_apis_include_account_metadata() {
        let defs: Vec<KindDef> = replay().kinds;
        let apis: Vec<String> = called_collect_apis(&ResourceRegistry::from_definitions(&defs))
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            apis,
            vec![
                "ec2::describe-instances",
                "ec2::describe-regions",
                "ec2::describe-security-groups",
                "iam::get-account-password-policy",
                "iam::get-account-summary",
                "iam::list-account-aliases",
            ]
        );
    }

    #[tokio::test]
    async fn test_account_alias_names_unnamed_accounts() {
        let mut file = replay();
        file.account.name = String::new();
        file.responses.get_mut("global").unwrap().insert(
            "iam::list-account-aliases".to_string(),
            serde_json::from_value(json!({"AccountAliases": ["acme-prod", "other"]})).unwrap(),
        );
        let collector = collector(&file);
        collector.collect().await;
        assert_eq!(collector.graph().account().unwrap().name, "acme-prod");

        // An explicit name is kept
        file.account.name = "prod".to_string();
        let collector = self::collector(&file);
        collector.collect().await;
        assert_eq!(collector.graph().account().unwrap().name, "prod");
    }

    #[tokio::test]
    async fn test_list_regions_reads_region_names() {
        let mut file = replay();
        file.responses.get_mut("global").unwrap().insert(
            "ec2::describe-regions".to_string(),
            serde_json::from_value(json!({"Regions": [
                {"RegionName": "us-east-1"},
                {"RegionName": "eu-west-1"},
                {"Endpoint": "no-name"}
            ]}))
            .unwrap(),
        );
        let regions = list_regions(&file.client()).await.unwrap();
        assert_eq!(regions, vec!["eu-west-1", "us-east-1"]);

        // Nothing recorded
        let empty = list_regions(&replay().client()).await.unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_summary_flags_accept_numbers_and_bools() {
        let map = json!({"AccountMFAEnabled": 0, "AccountAccessKeysPresent": true, "Users": 2});
        let summary = summary_from_map(&map);
        assert!(!summary.account_mfa_enabled);
        assert!(summary.account_access_keys_present);
        assert_eq!(summary.users, 2);
        assert_eq!(summary_from_map(&Value::Null), AccountSummary::default());
    }
}
