//! Replay input
//!
//! A [`ReplayFile`] describes an account, its regions, the resource kinds to
//! collect and the recorded API responses per scope. [`ReplayClient`] answers
//! API calls from those recordings, so a full collection run can be executed
//! offline.

use crate::client::ApiClient;
use crate::error::classify_api_error;
use crate::graph::{Region, GLOBAL_REGION_ID};
use crate::resource::KindDef;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Recorded responses: scope id → `"service::action"` → response
pub type Recordings = HashMap<String, HashMap<String, RecordedResponse>>;

fn default_cloud() -> String {
    "aws".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayAccount {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Recorded API error
#[derive(Debug, Clone, Deserialize)]
pub struct RecordedError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A recorded API response: either an error or a response document
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RecordedResponse {
    Failure { error: RecordedError },
    Success(Value),
}

/// Complete input of an offline collection run
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayFile {
    #[serde(default = "default_cloud")]
    pub cloud: String,
    pub account: ReplayAccount,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub kinds: Vec<KindDef>,
    #[serde(default)]
    pub responses: Recordings,
}

impl ReplayFile {
    /// Load a replay file (JSON, or YAML for `.yaml`/`.yml`)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file {}", path.display()))?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse replay file {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse replay file {}", path.display()))
        }
    }

    /// Client answering from this file's recordings, bound to the global scope
    pub fn client(&self) -> ReplayClient {
        ReplayClient::new(Arc::new(self.responses.clone()), GLOBAL_REGION_ID)
    }
}

/// [`ApiClient`] answering from recorded responses
#[derive(Clone)]
pub struct ReplayClient {
    recordings: Arc<Recordings>,
    region: String,
}

impl ReplayClient {
    pub fn new(recordings: Arc<Recordings>, region: &str) -> Self {
        Self {
            recordings,
            region: region.to_string(),
        }
    }

    /// Client without any recordings; every call returns nothing
    pub fn empty(region: &str) -> Self {
        Self::new(Arc::new(HashMap::new()), region)
    }
}

#[async_trait]
impl ApiClient for ReplayClient {
    fn region(&self) -> &str {
        &self.region
    }

    fn for_region(&self, region: &Region) -> Arc<dyn ApiClient> {
        Arc::new(Self::new(self.recordings.clone(), &region.id))
    }

    async fn get(
        &self,
        service: &str,
        action: &str,
        result_key: Option<&str>,
        expected_errors: &[&str],
    ) -> Result<Option<Value>> {
        let call = format!("{service}::{action}");
        let recorded = self
            .recordings
            .get(&self.region)
            .and_then(|calls| calls.get(&call));

        let response = match recorded {
            None => {
                tracing::debug!(region = %self.region, call = %call, "No recorded response");
                return Ok(None);
            }
            Some(RecordedResponse::Failure { error }) => {
                let api_error = classify_api_error(error.code.as_deref(), error.message.as_deref());
                if api_error.has_code(expected_errors) {
                    return Ok(None);
                }
                return Err(anyhow::Error::new(api_error)
                    .context(format!("{call} failed in {}", self.region)));
            }
            Some(RecordedResponse::Success(value)) => value,
        };

        Ok(match result_key {
            Some(key) => response.get(key).cloned(),
            None => Some(response.clone()),
        })
    }
}
