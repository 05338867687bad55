//! esprobe-registry — node telemetry registry and garbage collector.
//!
//! Remembers every node identity discovered during the process lifetime
//! and deletes the series of nodes that left the cluster, so that metric
//! cardinality follows cluster membership instead of growing forever.
//!
//! # Architecture
//!
//! ```text
//! probe cycle
//!   ├── SeenNodeLedger::record_all(live)   ← every discovered identity
//!   ├── MetricStore writes                 ← probe observations
//!   └── Reconciler::reconcile(live, ledger)
//!       ├── known − live → MetricStore::delete_series()
//!       ├── evict vanished identities from the ledger
//!       └── observe es_probe_metrics_cleaning_duration
//! ```

pub mod error;
pub mod ledger;
pub mod reconciler;

pub use error::RegistryError;
pub use ledger::{Generation, SeenNodeLedger};
pub use reconciler::{ReconcileReport, Reconciler, SeriesStore};
