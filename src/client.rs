//! API client seam
//!
//! Resource kinds issue their cloud calls through an [`ApiClient`]. The crate
//! ships [`crate::replay::ReplayClient`]; live clients live with the code that
//! owns credentials.

use crate::graph::Region;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Thin client issuing one API call at a time
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Id of the scope this client is bound to
    fn region(&self) -> &str;

    /// Same client, re-targeted at `region` (live clients use `region.endpoint`)
    fn for_region(&self, region: &Region) -> Arc<dyn ApiClient>;

    /// Call `service::action` and return `result_key` of the response (or the whole response).
    ///
    /// Errors whose code is listed in `expected_errors` are returned as `Ok(None)`.
    async fn get(
        &self,
        service: &str,
        action: &str,
        result_key: Option<&str>,
        expected_errors: &[&str],
    ) -> Result<Option<Value>>;
}

/// An API called by the collector
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ApiSpec {
    pub service: String,
    pub action: String,
}

impl ApiSpec {
    pub fn new(service: &str, action: &str) -> Self {
        Self {
            service: service.to_string(),
            action: action.to_string(),
        }
    }
}

impl fmt::Display for ApiSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.service, self.action)
    }
}
