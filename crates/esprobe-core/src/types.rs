//! Shared types used across esprobe crates.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Delimiter between name and cluster in the serialized key form.
pub const KEY_DELIMITER: char = '|';

/// Identity of a monitored Elasticsearch node.
///
/// Two identities are equal iff both fields match exactly. No case folding
/// or trimming is applied anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub name: String,
    pub cluster: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("malformed node key {0:?}: missing '|' delimiter")]
    MissingDelimiter(String),
}

impl NodeIdentity {
    pub fn new(name: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster: cluster.into(),
        }
    }

    /// Serialized `name|cluster` form, used in log lines and key exchange.
    pub fn to_key(&self) -> String {
        format!("{}{KEY_DELIMITER}{}", self.name, self.cluster)
    }

    /// Decode a `name|cluster` key, splitting on the first `|` only.
    ///
    /// Anything after the first delimiter belongs to the cluster, so
    /// `"a|b|c"` decodes to name `a`, cluster `b|c`.
    pub fn from_key(key: &str) -> Result<Self, KeyError> {
        key.split_once(KEY_DELIMITER)
            .map(|(name, cluster)| Self::new(name, cluster))
            .ok_or_else(|| KeyError::MissingDelimiter(key.to_string()))
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_DELIMITER}{}", self.name, self.cluster)
    }
}

/// Which service of a node an availability sample refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Elasticsearch,
    Kibana,
}

/// A node returned by discovery, with the addresses to probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredNode {
    pub identity: NodeIdentity,
    /// `host:port` of the Elasticsearch HTTP endpoint.
    pub address: String,
    /// `host:port` of the companion Kibana, if one is deployed.
    pub kibana_address: Option<String>,
}
