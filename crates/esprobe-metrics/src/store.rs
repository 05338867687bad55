//! Metric store — label-indexed storage of every exported series.
//!
//! Per-node series live in a single `RwLock`-protected map keyed by
//! `NodeIdentity`; global counters are atomics and the two global summaries
//! sit behind their own mutexes. Lock poisoning is recovered rather than
//! propagated, so no store operation can fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::trace;

use esprobe_core::config::SummariesConfig;
use esprobe_core::{ConfigResult, NodeIdentity, ServiceKind, SummaryWindow};

use crate::summary::{Summary, SummarySnapshot};

/// Sliding windows of the three summary families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricWindows {
    pub latency: SummaryWindow,
    pub discovery: SummaryWindow,
    pub cleaning: SummaryWindow,
}

impl Default for MetricWindows {
    fn default() -> Self {
        Self {
            latency: SummaryWindow::default(),
            discovery: SummaryWindow::default(),
            cleaning: SummaryWindow::new(Duration::from_secs(120 * 60), 20, 2000),
        }
    }
}

impl MetricWindows {
    pub fn from_config(config: &SummariesConfig) -> ConfigResult<Self> {
        Ok(Self {
            latency: config.latency.window()?,
            discovery: config.discovery.window()?,
            cleaning: config.cleaning.window()?,
        })
    }
}

/// Series bundle of one node. A field is `None` until first written.
#[derive(Debug, Default)]
struct NodeSeries {
    es_availability: Option<f64>,
    kibana_availability: Option<f64>,
    search_latency: Option<Summary>,
    shards_successful: Option<f64>,
    documents_hit: Option<f64>,
}

/// Read-only copy of one node's series.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSeriesSnapshot {
    pub identity: NodeIdentity,
    pub es_availability: Option<f64>,
    pub kibana_availability: Option<f64>,
    pub search_latency: Option<SummarySnapshot>,
    pub shards_successful: Option<f64>,
    pub documents_hit: Option<f64>,
}

/// Read-only copy of the whole store, consumed by the exposition renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub errors_count: u64,
    pub node_count: u64,
    /// Sorted by identity.
    pub nodes: Vec<NodeSeriesSnapshot>,
    pub discovery_duration: SummarySnapshot,
    pub cleaning_duration: SummarySnapshot,
}

/// Process-wide telemetry, shared by handle between the probe loop, the
/// reconciler and the exposition endpoint.
pub struct MetricStore {
    nodes: RwLock<HashMap<NodeIdentity, NodeSeries>>,
    errors_count: AtomicU64,
    node_count: AtomicU64,
    discovery_duration: Mutex<Summary>,
    cleaning_duration: Mutex<Summary>,
    latency_window: SummaryWindow,
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new(MetricWindows::default())
    }
}

impl MetricStore {
    pub fn new(windows: MetricWindows) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            errors_count: AtomicU64::new(0),
            node_count: AtomicU64::new(0),
            discovery_duration: Mutex::new(Summary::new(windows.discovery)),
            cleaning_duration: Mutex::new(Summary::new(windows.cleaning)),
            latency_window: windows.latency,
        }
    }

    /// Record 1 (up) or 0 (down) for one service of a node.
    pub fn set_availability(&self, node: &NodeIdentity, kind: ServiceKind, up: bool) {
        let value = if up { 1.0 } else { 0.0 };
        let mut nodes = self.write_nodes();
        let series = nodes.entry(node.clone()).or_default();
        match kind {
            ServiceKind::Elasticsearch => series.es_availability = Some(value),
            ServiceKind::Kibana => series.kibana_availability = Some(value),
        }
    }

    /// Add a search latency sample, in nanoseconds.
    pub fn observe_latency(&self, node: &NodeIdentity, duration_nanos: u64) {
        let window = self.latency_window;
        let mut nodes = self.write_nodes();
        nodes
            .entry(node.clone())
            .or_default()
            .search_latency
            .get_or_insert_with(|| Summary::new(window))
            .observe(duration_nanos as f64);
    }

    pub fn set_shard_count(&self, node: &NodeIdentity, shards: u64) {
        let mut nodes = self.write_nodes();
        nodes.entry(node.clone()).or_default().shards_successful = Some(shards as f64);
    }

    pub fn set_doc_count(&self, node: &NodeIdentity, docs: u64) {
        let mut nodes = self.write_nodes();
        nodes.entry(node.clone()).or_default().documents_hit = Some(docs as f64);
    }

    /// Drop every series of a node. Returns whether anything was removed;
    /// deleting an unknown node is a no-op.
    pub fn delete_series(&self, node: &NodeIdentity) -> bool {
        let removed = self.write_nodes().remove(node).is_some();
        trace!(cluster = %node.cluster, nodename = %node.name, removed, "series deleted");
        removed
    }

    pub fn increment_error_count(&self) {
        self.errors_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_total_node_count(&self, count: u64) {
        self.node_count.store(count, Ordering::Relaxed);
    }

    pub fn observe_discovery_duration(&self, elapsed: Duration) {
        lock(&self.discovery_duration).observe(elapsed.as_nanos() as f64);
    }

    pub fn observe_cleaning_duration(&self, elapsed: Duration) {
        lock(&self.cleaning_duration).observe(elapsed.as_nanos() as f64);
    }

    pub fn errors_count(&self) -> u64 {
        self.errors_count.load(Ordering::Relaxed)
    }

    pub fn total_node_count(&self) -> u64 {
        self.node_count.load(Ordering::Relaxed)
    }

    /// Whether any series exists for a node.
    pub fn has_series(&self, node: &NodeIdentity) -> bool {
        self.read_nodes().contains_key(node)
    }

    /// Identities that currently have at least one series, sorted.
    pub fn tracked_nodes(&self) -> Vec<NodeIdentity> {
        let mut ids: Vec<NodeIdentity> = self.read_nodes().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut nodes: Vec<NodeSeriesSnapshot> = self
            .read_nodes()
            .iter()
            .map(|(identity, s)| NodeSeriesSnapshot {
                identity: identity.clone(),
                es_availability: s.es_availability,
                kibana_availability: s.kibana_availability,
                search_latency: s.search_latency.as_ref().map(Summary::snapshot),
                shards_successful: s.shards_successful,
                documents_hit: s.documents_hit,
            })
            .collect();
        nodes.sort_by(|a, b| a.identity.cmp(&b.identity));

        MetricsSnapshot {
            errors_count: self.errors_count(),
            node_count: self.total_node_count(),
            nodes,
            discovery_duration: lock(&self.discovery_duration).snapshot(),
            cleaning_duration: lock(&self.cleaning_duration).snapshot(),
        }
    }

    fn read_nodes(&self) -> RwLockReadGuard<'_, HashMap<NodeIdentity, NodeSeries>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_nodes(&self) -> RwLockWriteGuard<'_, HashMap<NodeIdentity, NodeSeries>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock(summary: &Mutex<Summary>) -> MutexGuard<'_, Summary> {
    summary.lock().unwrap_or_else(PoisonError::into_inner)
}
