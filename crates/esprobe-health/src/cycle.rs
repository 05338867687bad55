//! Probe cycle — the periodic discover → probe → reconcile loop.
//!
//! Each cycle asks discovery for the live node set, records every identity
//! in the seen-node ledger, probes all nodes concurrently, writes the
//! observations to the metric store, and finally garbage collects the
//! series of nodes that are no longer discovered.
//!
//! The loop only communicates with the exposition endpoint through the
//! shared `MetricStore`, and stops when its shutdown channel fires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use esprobe_core::{ConfigResult, DiscoveredNode, NodeIdentity, ProbeConfig, ServiceKind};
use esprobe_metrics::MetricStore;
use esprobe_registry::{ReconcileReport, Reconciler, SeenNodeLedger};

use crate::checker::{http_probe, search_probe};
use crate::discovery::{Discovery, DiscoveryError};

/// Probe parameters shared by every node of a cycle.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub interval: Duration,
    pub index: String,
    pub elasticsearch_timeout: Duration,
    pub kibana_status_path: String,
    pub kibana_timeout: Duration,
}

impl ProbeSettings {
    pub fn from_config(config: &ProbeConfig) -> ConfigResult<Self> {
        Ok(Self {
            interval: config.interval()?,
            index: config.elasticsearch.index.clone(),
            elasticsearch_timeout: config.elasticsearch_timeout()?,
            kibana_status_path: config.kibana.status_path.clone(),
            kibana_timeout: config.kibana_timeout()?,
        })
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            index: "*".to_string(),
            elasticsearch_timeout: Duration::from_secs(5),
            kibana_status_path: "/api/status".to_string(),
            kibana_timeout: Duration::from_secs(5),
        }
    }
}

/// What a completed cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub discovered: usize,
    /// Identities seen for the first time.
    pub new_nodes: usize,
    pub reconcile: ReconcileReport,
}

pub struct ProbeCycle<D: Discovery> {
    discovery: D,
    store: Arc<MetricStore>,
    ledger: SeenNodeLedger,
    reconciler: Reconciler,
    settings: Arc<ProbeSettings>,
}

impl<D: Discovery> ProbeCycle<D> {
    pub fn new(discovery: D, store: Arc<MetricStore>, settings: ProbeSettings) -> Self {
        Self {
            discovery,
            reconciler: Reconciler::new(store.clone()),
            store,
            ledger: SeenNodeLedger::new(),
            settings: Arc::new(settings),
        }
    }

    pub fn ledger(&self) -> &SeenNodeLedger {
        &self.ledger
    }

    /// Run one full cycle.
    ///
    /// A discovery failure is counted and returned before anything else
    /// happens; an empty discovery result is a valid live set and leads to
    /// every known node being collected.
    pub async fn run_once(&self) -> Result<CycleReport, DiscoveryError> {
        let start = Instant::now();
        let nodes = match self.discovery.discover().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "node discovery failed, skipping cycle");
                self.store.increment_error_count();
                return Err(e);
            }
        };
        self.store.observe_discovery_duration(start.elapsed());
        self.store.set_total_node_count(nodes.len() as u64);

        let live: Vec<NodeIdentity> = nodes.iter().map(|n| n.identity.clone()).collect();
        let new_nodes = self.ledger.record_all(&live);

        let mut probes = JoinSet::new();
        for node in nodes {
            let store = self.store.clone();
            let settings = self.settings.clone();
            probes.spawn(async move { probe_node(&node, &settings, &store).await });
        }
        while let Some(joined) = probes.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "probe task failed");
                self.store.increment_error_count();
            }
        }

        let reconcile = self.reconciler.reconcile(&live, &self.ledger);

        Ok(CycleReport {
            discovered: live.len(),
            new_nodes,
            reconcile,
        })
    }

    /// Run cycles every `interval` until shutdown signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            "probe loop started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Ok(report) = self.run_once().await {
                        debug!(
                            discovered = report.discovered,
                            new_nodes = report.new_nodes,
                            vanished = report.reconcile.vanished.len(),
                            "probe cycle finished"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    info!("probe loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Probe one node and its Kibana companion, writing results to the store.
async fn probe_node(node: &DiscoveredNode, settings: &ProbeSettings, store: &MetricStore) {
    let id = &node.identity;

    match search_probe(&node.address, &settings.index, settings.elasticsearch_timeout).await {
        Ok(probe) => {
            store.set_availability(id, ServiceKind::Elasticsearch, true);
            store.observe_latency(id, probe.latency.as_nanos() as u64);
            store.set_shard_count(id, probe.shards_successful);
            store.set_doc_count(id, probe.documents_hit);
        }
        Err(e) => {
            warn!(cluster = %id.cluster, nodename = %id.name, error = %e, "elasticsearch probe failed");
            store.set_availability(id, ServiceKind::Elasticsearch, false);
            if e.is_internal() {
                store.increment_error_count();
            }
        }
    }

    if let Some(kibana) = &node.kibana_address {
        let result = http_probe(kibana, &settings.kibana_status_path, settings.kibana_timeout).await;
        if !result.is_up() {
            warn!(cluster = %id.cluster, nodename = %id.name, ?result, "kibana probe failed");
        }
        store.set_availability(id, ServiceKind::Kibana, result.is_up());
    }
}
