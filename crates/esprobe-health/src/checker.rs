//! Probe logic for Elasticsearch and Kibana endpoints.
//!
//! Every probe is a single HTTP/1.1 GET over a fresh TCP connection,
//! bounded by a timeout. Elasticsearch is probed with a zero-size search
//! whose response carries the shard and hit counts; Kibana only needs a
//! 2xx on its status endpoint.

use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const USER_AGENT: &str = "esprobe/0.1";

/// Result of a single availability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The endpoint returned 2xx.
    Healthy,
    /// The endpoint returned non-2xx.
    Unhealthy,
    /// The probe could not be executed (connection error or timeout).
    Failed,
}

impl ProbeResult {
    pub fn is_up(&self) -> bool {
        *self == ProbeResult::Healthy
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },
    #[error("request to {uri} failed: {reason}")]
    Request { uri: String, reason: String },
    #[error("request to {uri} timed out after {timeout:?}")]
    Timeout { uri: String, timeout: Duration },
    #[error("{uri} answered {status}")]
    Status { uri: String, status: u16 },
    #[error("invalid response body from {uri}: {source}")]
    Decode {
        uri: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ProbeError {
    /// Whether the error points at the probe itself rather than at an
    /// unavailable node.
    pub fn is_internal(&self) -> bool {
        matches!(self, ProbeError::Decode { .. })
    }
}

pub type ProbeOutcome<T> = Result<T, ProbeError>;

/// Counters extracted from a probe search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchProbe {
    pub latency: Duration,
    pub shards_successful: u64,
    pub documents_hit: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "_shards")]
    shards: ShardStats,
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct ShardStats {
    successful: u64,
}

#[derive(Debug, Deserialize)]
struct Hits {
    total: HitsTotal,
}

/// `hits.total` is a plain number before Elasticsearch 7 and an object after.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HitsTotal {
    Count(u64),
    Object { value: u64 },
}

impl HitsTotal {
    fn value(&self) -> u64 {
        match self {
            HitsTotal::Count(v) | HitsTotal::Object { value: v } => *v,
        }
    }
}

/// Run a zero-size search against `index` on an Elasticsearch node.
///
/// Latency covers the whole request, connection included.
pub async fn search_probe(address: &str, index: &str, timeout: Duration) -> ProbeOutcome<SearchProbe> {
    let path = format!("/{index}/_search?size=0");
    let start = Instant::now();
    let (status, body) = http_get(address, &path, timeout).await?;
    let latency = start.elapsed();

    let uri = format!("http://{address}{path}");
    if !(200..300).contains(&status) {
        return Err(ProbeError::Status { uri, status });
    }

    let response: SearchResponse =
        serde_json::from_slice(&body).map_err(|source| ProbeError::Decode { uri, source })?;

    Ok(SearchProbe {
        latency,
        shards_successful: response.shards.successful,
        documents_hit: response.hits.total.value(),
    })
}

/// Perform an HTTP availability probe against an endpoint.
///
/// Returns `Healthy` if the response is 2xx, `Unhealthy` for non-2xx,
/// or `Failed` if the connection fails or times out.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> ProbeResult {
    match http_get(address, path, timeout).await {
        Ok((status, _)) if (200..300).contains(&status) => ProbeResult::Healthy,
        Ok((status, _)) => {
            debug!(status, %address, %path, "probe non-2xx");
            ProbeResult::Unhealthy
        }
        Err(e) => {
            debug!(error = %e, "probe failed");
            ProbeResult::Failed
        }
    }
}

/// GET `path` on `address` and return the status code and full body.
pub(crate) async fn http_get(address: &str, path: &str, timeout: Duration) -> ProbeOutcome<(u16, Bytes)> {
    let uri = format!("http://{address}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| ProbeError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| request_error(&uri, e))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", USER_AGENT)
            .header("accept", "application/json")
            .body(Empty::<Bytes>::new())
            .map_err(|e| request_error(&uri, e))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| request_error(&uri, e))?;
        let status = resp.status().as_u16();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| request_error(&uri, e))?
            .to_bytes();
        Ok::<_, ProbeError>((status, body))
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(_) => Err(ProbeError::Timeout { uri, timeout }),
    }
}

fn request_error(uri: &str, e: impl std::fmt::Display) -> ProbeError {
    ProbeError::Request {
        uri: uri.to_string(),
        reason: e.to_string(),
    }
}
