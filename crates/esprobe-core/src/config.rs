//! esprobe.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DiscoveredNode, NodeIdentity, KEY_DELIMITER};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Port of the `/metrics` endpoint.
    pub metrics_port: u16,
    /// Delay between two probe cycles.
    pub interval: String,
    pub consul: Option<ConsulConfig>,
    pub elasticsearch: ElasticsearchConfig,
    pub kibana: KibanaConfig,
    /// Nodes probed when no Consul agent is configured.
    pub static_nodes: Vec<StaticNode>,
    pub summaries: SummariesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    /// `host:port` of the Consul agent HTTP API.
    pub address: String,
    pub elasticsearch_service: String,
    pub kibana_service: Option<String>,
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticsearchConfig {
    /// Index pattern searched by the probe.
    pub index: String,
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KibanaConfig {
    pub status_path: String,
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticNode {
    pub name: String,
    pub cluster: String,
    pub address: String,
    pub kibana_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummariesConfig {
    pub latency: SummaryConfig,
    pub discovery: SummaryConfig,
    pub cleaning: SummaryConfig,
}

/// Sliding window of a summary metric, as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub max_age: String,
    pub age_buckets: u32,
    pub buf_cap: usize,
}

/// Resolved sliding window of a summary metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryWindow {
    /// Samples older than this no longer contribute to quantiles.
    pub max_age: Duration,
    /// Number of rotating buckets the window is split into.
    pub age_buckets: u32,
    /// Maximum samples retained per bucket.
    pub buf_cap: usize,
}

impl SummaryWindow {
    pub const fn new(max_age: Duration, age_buckets: u32, buf_cap: usize) -> Self {
        Self {
            max_age,
            age_buckets,
            buf_cap,
        }
    }
}

impl Default for SummaryWindow {
    fn default() -> Self {
        Self::new(Duration::from_secs(20 * 60), 20, 2000)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            metrics_port: 2112,
            interval: "30s".to_string(),
            consul: None,
            elasticsearch: ElasticsearchConfig::default(),
            kibana: KibanaConfig::default(),
            static_nodes: Vec::new(),
            summaries: SummariesConfig::default(),
        }
    }
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8500".to_string(),
            elasticsearch_service: "elasticsearch-all".to_string(),
            kibana_service: Some("kibana-all".to_string()),
            timeout: "5s".to_string(),
        }
    }
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            index: "*".to_string(),
            timeout: "5s".to_string(),
        }
    }
}

impl Default for KibanaConfig {
    fn default() -> Self {
        Self {
            status_path: "/api/status".to_string(),
            timeout: "5s".to_string(),
        }
    }
}

impl Default for SummariesConfig {
    fn default() -> Self {
        Self {
            latency: SummaryConfig::default(),
            discovery: SummaryConfig::default(),
            cleaning: SummaryConfig {
                max_age: "120m".to_string(),
                ..SummaryConfig::default()
            },
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_age: "20m".to_string(),
            age_buckets: 20,
            buf_cap: 2000,
        }
    }
}

impl SummaryConfig {
    pub fn window(&self) -> ConfigResult<SummaryWindow> {
        let max_age = duration_field("summaries.max_age", &self.max_age)?;
        if max_age.is_zero() || self.age_buckets == 0 || self.buf_cap == 0 {
            return Err(ConfigError::Invalid(
                "summary max_age, age_buckets and buf_cap must be non-zero".to_string(),
            ));
        }
        Ok(SummaryWindow::new(max_age, self.age_buckets, self.buf_cap))
    }
}

impl StaticNode {
    pub fn to_discovered(&self) -> DiscoveredNode {
        DiscoveredNode {
            identity: NodeIdentity::new(&self.name, &self.cluster),
            address: self.address.clone(),
            kibana_address: self.kibana_address.clone(),
        }
    }
}

impl ProbeConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: ProbeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn interval(&self) -> ConfigResult<Duration> {
        duration_field("interval", &self.interval)
    }

    pub fn elasticsearch_timeout(&self) -> ConfigResult<Duration> {
        duration_field("elasticsearch.timeout", &self.elasticsearch.timeout)
    }

    pub fn kibana_timeout(&self) -> ConfigResult<Duration> {
        duration_field("kibana.timeout", &self.kibana.timeout)
    }

    /// Check every field that cannot be checked by deserialization alone.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval()?.is_zero() {
            return Err(ConfigError::Invalid("interval must be non-zero".to_string()));
        }
        self.elasticsearch_timeout()?;
        self.kibana_timeout()?;
        if let Some(consul) = &self.consul {
            duration_field("consul.timeout", &consul.timeout)?;
        }
        self.summaries.latency.window()?;
        self.summaries.discovery.window()?;
        self.summaries.cleaning.window()?;

        // Names and clusters end up in `name|cluster` keys.
        for node in &self.static_nodes {
            if node.name.contains(KEY_DELIMITER) || node.cluster.contains(KEY_DELIMITER) {
                return Err(ConfigError::Invalid(format!(
                    "static node {:?} in cluster {:?} contains '{KEY_DELIMITER}'",
                    node.name, node.cluster
                )));
            }
        }
        Ok(())
    }
}

fn duration_field(field: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "20m".
///
/// A plain number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
