//! Node discovery — produces the live node set of a probe cycle.
//!
//! Two sources are supported: a static list from the config file and the
//! Consul health API. Consul entries carry the cluster name either in the
//! service meta (`cluster`) or as a `cluster:<name>` tag.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use esprobe_core::config::{parse_duration, ConsulConfig, StaticNode};
use esprobe_core::{ConfigError, ConfigResult, DiscoveredNode, NodeIdentity, KEY_DELIMITER};

use crate::checker::{http_get, ProbeError};

const CLUSTER_TAG_PREFIX: &str = "cluster:";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("consul request failed: {0}")]
    Consul(#[from] ProbeError),
    #[error("consul answered {status} for service {service}")]
    Status { service: String, status: u16 },
    #[error("invalid consul response for service {service}: {source}")]
    Decode {
        service: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Source of the live node set.
pub trait Discovery: Send + Sync {
    fn discover(&self) -> impl Future<Output = DiscoveryResult<Vec<DiscoveredNode>>> + Send;
}

/// Fixed node list, typically read from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    nodes: Vec<DiscoveredNode>,
}

impl StaticDiscovery {
    pub fn new(nodes: Vec<DiscoveredNode>) -> Self {
        Self { nodes }
    }

    pub fn from_config(nodes: &[StaticNode]) -> Self {
        Self::new(nodes.iter().map(StaticNode::to_discovered).collect())
    }
}

impl Discovery for StaticDiscovery {
    async fn discover(&self) -> DiscoveryResult<Vec<DiscoveredNode>> {
        Ok(self.nodes.clone())
    }
}

/// Discovery through the Consul agent health API.
#[derive(Debug, Clone)]
pub struct ConsulDiscovery {
    address: String,
    elasticsearch_service: String,
    kibana_service: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    node: ConsulNode,
    service: ConsulService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulNode {
    node: String,
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulService {
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    meta: Option<HashMap<String, String>>,
}

impl ConsulDiscovery {
    pub fn new(config: &ConsulConfig) -> ConfigResult<Self> {
        let timeout = parse_duration(&config.timeout).ok_or_else(|| ConfigError::InvalidDuration {
            field: "consul.timeout",
            value: config.timeout.clone(),
        })?;
        Ok(Self {
            address: config.address.clone(),
            elasticsearch_service: config.elasticsearch_service.clone(),
            kibana_service: config.kibana_service.clone(),
            timeout,
        })
    }

    /// Passing instances of a service, as `(identity, host:port)` pairs.
    async fn passing_instances(&self, service: &str) -> DiscoveryResult<Vec<(NodeIdentity, String)>> {
        let path = format!("/v1/health/service/{service}?passing");
        let (status, body) = http_get(&self.address, &path, self.timeout).await?;
        if !(200..300).contains(&status) {
            return Err(DiscoveryError::Status {
                service: service.to_string(),
                status,
            });
        }
        let entries: Vec<HealthEntry> =
            serde_json::from_slice(&body).map_err(|source| DiscoveryError::Decode {
                service: service.to_string(),
                source,
            })?;
        Ok(entries.into_iter().filter_map(|e| instance(service, e)).collect())
    }
}

impl Discovery for ConsulDiscovery {
    async fn discover(&self) -> DiscoveryResult<Vec<DiscoveredNode>> {
        let es = self.passing_instances(&self.elasticsearch_service).await?;

        let kibana: HashMap<NodeIdentity, String> = match &self.kibana_service {
            Some(service) => self.passing_instances(service).await?.into_iter().collect(),
            None => HashMap::new(),
        };

        let nodes: Vec<DiscoveredNode> = es
            .into_iter()
            .map(|(identity, address)| DiscoveredNode {
                kibana_address: kibana.get(&identity).cloned(),
                identity,
                address,
            })
            .collect();
        debug!(nodes = nodes.len(), kibana = kibana.len(), "consul discovery finished");
        Ok(nodes)
    }
}

/// Turn a health entry into an identity and probe address.
///
/// Entries without a cluster, or whose names would break the
/// `name|cluster` key form, are skipped.
fn instance(service: &str, entry: HealthEntry) -> Option<(NodeIdentity, String)> {
    let cluster = entry
        .service
        .meta
        .as_ref()
        .and_then(|m| m.get("cluster").cloned())
        .or_else(|| {
            entry
                .service
                .tags
                .iter()
                .flatten()
                .find_map(|t| t.strip_prefix(CLUSTER_TAG_PREFIX).map(str::to_string))
        });

    let Some(cluster) = cluster else {
        warn!(%service, node = %entry.node.node, "consul entry without cluster, skipping");
        return None;
    };
    if entry.node.node.contains(KEY_DELIMITER) || cluster.contains(KEY_DELIMITER) {
        warn!(%service, node = %entry.node.node, %cluster, "node name or cluster contains '|', skipping");
        return None;
    }

    let host = if entry.service.address.is_empty() {
        entry.node.address
    } else {
        entry.service.address
    };
    Some((
        NodeIdentity::new(entry.node.node, cluster),
        format!("{host}:{}", entry.service.port),
    ))
}

/// Runtime choice between the supported discovery sources.
#[derive(Debug, Clone)]
pub enum DiscoverySource {
    Static(StaticDiscovery),
    Consul(ConsulDiscovery),
}

impl Discovery for DiscoverySource {
    async fn discover(&self) -> DiscoveryResult<Vec<DiscoveredNode>> {
        match self {
            DiscoverySource::Static(d) => d.discover().await,
            DiscoverySource::Consul(d) => d.discover().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Vec<HealthEntry> {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn instance_uses_meta_cluster_and_service_address() {
        let entries = parse(
            r#"[{"Node":{"Node":"es-1","Address":"10.0.0.1"},
                 "Service":{"Service":"es","Address":"10.1.0.1","Port":9200,
                            "Tags":["cluster:ignored"],"Meta":{"cluster":"logs"}}}]"#,
        );
        let (id, addr) = entries.into_iter().find_map(|e| instance("es", e)).unwrap();
        assert_eq!(id, NodeIdentity::new("es-1", "logs"));
        assert_eq!(addr, "10.1.0.1:9200");
    }

    #[test]
    fn instance_falls_back_to_tag_and_node_address() {
        let entries = parse(
            r#"[{"Node":{"Node":"es-2","Address":"10.0.0.2"},
                 "Service":{"Service":"es","Address":"","Port":9201,"Tags":["hot","cluster:metrics"]}}]"#,
        );
        let (id, addr) = entries.into_iter().find_map(|e| instance("es", e)).unwrap();
        assert_eq!(id, NodeIdentity::new("es-2", "metrics"));
        assert_eq!(addr, "10.0.0.2:9201");
    }

    #[test]
    fn instance_without_cluster_is_skipped() {
        let entries = parse(
            r#"[{"Node":{"Node":"es-3","Address":"10.0.0.3"},
                 "Service":{"Service":"es","Port":9200,"Tags":null,"Meta":null}}]"#,
        );
        assert!(entries.into_iter().find_map(|e| instance("es", e)).is_none());
    }

    #[test]
    fn instance_with_delimiter_is_skipped() {
        let entries = parse(
            r#"[{"Node":{"Node":"es|4","Address":"10.0.0.4"},
                 "Service":{"Service":"es","Port":9200,"Meta":{"cluster":"logs"}}}]"#,
        );
        assert!(entries.into_iter().find_map(|e| instance("es", e)).is_none());
    }

    #[tokio::test]
    async fn static_discovery_returns_configured_nodes() {
        let nodes = vec![StaticNode {
            name: "es-1".to_string(),
            cluster: "logs".to_string(),
            address: "127.0.0.1:9200".to_string(),
            kibana_address: None,
        }];
        let discovery = DiscoverySource::Static(StaticDiscovery::from_config(&nodes));
        let found = discovery.discover().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].identity, NodeIdentity::new("es-1", "logs"));
    }

    #[test]
    fn consul_bad_timeout_is_rejected() {
        let err = ConsulDiscovery::new(&ConsulConfig {
            timeout: "whenever".to_string(),
            ..ConsulConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { field: "consul.timeout", .. }));
    }

    #[tokio::test]
    async fn consul_unreachable_is_an_error() {
        let discovery = ConsulDiscovery::new(&ConsulConfig {
            address: "127.0.0.1:1".to_string(),
            timeout: "200ms".to_string(),
            ..ConsulConfig::default()
        })
        .unwrap();
        assert!(matches!(
            discovery.discover().await,
            Err(DiscoveryError::Consul(_))
        ));
    }
}
