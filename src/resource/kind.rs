//! Resource kind capability

use crate::client::ApiSpec;
use crate::graph::{GraphBuilder, Resource};
use anyhow::Result;
use async_trait::async_trait;

/// A category of cloud entity with its own collection and connection logic
#[async_trait]
pub trait ResourceKind: Send + Sync {
    /// Stable tag used for configuration filtering and error grouping
    fn kind(&self) -> &str;

    /// Discover all instances in the builder's scope and add them as nodes
    async fn collect_resources(&self, builder: &GraphBuilder) -> Result<()>;

    /// Add resource-specific edges for `resource`. Called once per node in the connect phase.
    fn connect_in_graph(&self, _builder: &GraphBuilder, _resource: &Resource) -> Result<()> {
        Ok(())
    }

    /// APIs called by `collect_resources`
    fn called_collect_apis(&self) -> Vec<ApiSpec> {
        Vec::new()
    }
}
