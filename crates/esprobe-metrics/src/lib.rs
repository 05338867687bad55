//! esprobe-metrics — telemetry storage and exposition for esprobe.
//!
//! Holds every exported series in an internally synchronized
//! [`MetricStore`] and renders it in the Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! MetricStore
//!   ├── per-node series keyed by NodeIdentity (cluster, nodename)
//!   │   ├── es / kibana availability gauges
//!   │   ├── search latency Summary (sliding window)
//!   │   └── shard / document gauges
//!   ├── global error counter + node count gauge
//!   └── discovery / cleaning duration summaries
//!
//! Prometheus exposition
//!   └── render_prometheus(snapshot) → text/plain for /metrics
//! ```

pub mod prometheus;
pub mod store;
pub mod summary;

pub use prometheus::{render_prometheus, CONTENT_TYPE};
pub use store::{MetricStore, MetricWindows, MetricsSnapshot, NodeSeriesSnapshot};
pub use summary::{Summary, SummarySnapshot};
