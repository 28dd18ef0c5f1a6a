//! Configuration Management
//!
//! Collector settings: pool sizes, resource kind filters and regions.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_shared_pool_size() -> usize {
    32
}

fn default_region_pool_size() -> usize {
    20
}

fn default_region_resources_pool_size() -> usize {
    10
}

fn default_global_region_endpoint() -> String {
    "us-east-1".to_string()
}

/// Collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Workers shared by global collection and follow-up work of all regions
    #[serde(default = "default_shared_pool_size")]
    pub shared_pool_size: usize,
    /// Regions collected at the same time
    #[serde(default = "default_region_pool_size")]
    pub region_pool_size: usize,
    /// Resource kinds collected at the same time within one region
    #[serde(default = "default_region_resources_pool_size")]
    pub region_resources_pool_size: usize,
    /// Only collect these kinds (all when empty)
    #[serde(default)]
    pub collect: Vec<String>,
    /// Never collect these kinds
    #[serde(default)]
    pub no_collect: Vec<String>,
    /// Only collect these regions (all when unset)
    #[serde(default)]
    pub regions: Option<Vec<String>>,
    /// API region used for global calls
    #[serde(default = "default_global_region_endpoint")]
    pub global_region_endpoint: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            shared_pool_size: default_shared_pool_size(),
            region_pool_size: default_region_pool_size(),
            region_resources_pool_size: default_region_resources_pool_size(),
            collect: Vec::new(),
            no_collect: Vec::new(),
            regions: None,
            global_region_endpoint: default_global_region_endpoint(),
        }
    }
}

impl CollectorConfig {
    /// Get the default config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cloud-collector").join("config.yaml"))
    }

    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing default file yields the defaults; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        Ok(config.normalized())
    }

    /// Parse a JSON or YAML file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        }
    }

    /// Clamp pool sizes to at least one worker
    pub fn normalized(mut self) -> Self {
        for (name, size) in [
            ("shared_pool_size", &mut self.shared_pool_size),
            ("region_pool_size", &mut self.region_pool_size),
            ("region_resources_pool_size", &mut self.region_resources_pool_size),
        ] {
            if *size == 0 {
                tracing::warn!("{} must be at least 1, using 1", name);
                *size = 1;
            }
        }
        self
    }

    /// Whether resources of `kind` should be collected
    pub fn should_collect(&self, kind: &str) -> bool {
        if !self.collect.is_empty() && !self.collect.iter().any(|k| k == kind) {
            return false;
        }
        !self.no_collect.iter().any(|k| k == kind)
    }

    /// Whether `region` should be collected
    pub fn should_collect_region(&self, region: &str) -> bool {
        self.regions
            .as_ref()
            .map(|regions| regions.iter().any(|r| r == region))
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_should_collect_filters() {
        let mut config = CollectorConfig::default();
        assert!(config.should_collect("bucket"));

        config.no_collect = vec!["bucket".to_string()];
        assert!(!config.should_collect("bucket"));
        assert!(config.should_collect("instance"));

        config.collect = vec!["instance".to_string(), "bucket".to_string()];
        assert!(config.should_collect("instance"));
        assert!(!config.should_collect("bucket"));
        assert!(!config.should_collect("queue"));
    }

    #[test]
    fn test_region_filter() {
        let mut config = CollectorConfig::default();
        assert!(config.should_collect_region("eu-west-1"));
        config.regions = Some(vec!["us-east-1".to_string()]);
        assert!(config.should_collect_region("us-east-1"));
        assert!(!config.should_collect_region("eu-west-1"));
    }

    #[test]
    fn test_load_yaml_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "region_pool_size: 4\nno_collect: [queue]\nshared_pool_size: 0").unwrap();

        let config = CollectorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.region_pool_size, 4);
        assert_eq!(config.shared_pool_size, 1);
        assert_eq!(config.region_resources_pool_size, 10);
        assert_eq!(config.global_region_endpoint, "us-east-1");
        assert!(!config.should_collect("queue"));
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"collect": ["bucket"], "regions": ["eu-west-1"]}}"#).unwrap();

        let config = CollectorConfig::load(Some(file.path())).unwrap();
        assert!(config.should_collect("bucket"));
        assert!(!config.should_collect("instance"));
        assert_eq!(config.regions, Some(vec!["eu-west-1".to_string()]));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = CollectorConfig::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
