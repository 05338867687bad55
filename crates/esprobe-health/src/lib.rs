//! esprobe-health — node discovery and health probing.
//!
//! Discovers the live Elasticsearch nodes (static list or Consul), probes
//! each node with a zero-size search plus an optional Kibana status check,
//! and feeds the results into the shared `MetricStore`. Each cycle ends
//! with a reconcile pass that drops the series of vanished nodes.
//!
//! # Architecture
//!
//! ```text
//! ProbeCycle::run (every interval, until shutdown)
//!   ├── Discovery::discover() → Vec<DiscoveredNode>
//!   ├── SeenNodeLedger::record_all()
//!   ├── JoinSet: per node
//!   │   ├── search_probe() → availability, latency, shards, docs
//!   │   └── http_probe()   → kibana availability
//!   └── Reconciler::reconcile()
//! ```
//!
//! A node that cannot be reached is reported with availability `0`; only
//! failures of the prober itself (undecodable responses, failed discovery)
//! count towards `es_probe_errors_count`.

pub mod checker;
pub mod cycle;
pub mod discovery;

pub use checker::{http_probe, search_probe, ProbeError, ProbeResult, SearchProbe};
pub use cycle::{CycleReport, ProbeCycle, ProbeSettings};
pub use discovery::{
    ConsulDiscovery, Discovery, DiscoveryError, DiscoveryResult, DiscoverySource, StaticDiscovery,
};
