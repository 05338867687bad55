//! Reconciler — garbage collects the series of vanished nodes.
//!
//! A pass compares the node identities known to the ledger against the live
//! set of the current discovery cycle. Every known identity missing from the
//! live set has all of its series deleted. Series of live identities are
//! never touched, so an interrupted pass can only leave stale series behind.
//!
//! Malformed ledger keys are logged, counted as internal errors and
//! skipped; they never abort the rest of the pass.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use esprobe_core::NodeIdentity;
use esprobe_metrics::MetricStore;

use crate::error::RegistryError;
use crate::ledger::SeenNodeLedger;

/// The slice of the metric store the reconciler drives.
pub trait SeriesStore: Send + Sync {
    /// Delete every series of a node; must be a no-op for unknown nodes.
    fn delete_series(&self, node: &NodeIdentity) -> bool;

    fn observe_cleaning_duration(&self, elapsed: Duration);

    fn increment_error_count(&self);
}

impl SeriesStore for MetricStore {
    fn delete_series(&self, node: &NodeIdentity) -> bool {
        MetricStore::delete_series(self, node)
    }

    fn observe_cleaning_duration(&self, elapsed: Duration) {
        MetricStore::observe_cleaning_duration(self, elapsed)
    }

    fn increment_error_count(&self) {
        MetricStore::increment_error_count(self)
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Known identities still present in the live set.
    pub kept: Vec<NodeIdentity>,
    /// Known identities whose series were deleted.
    pub vanished: Vec<NodeIdentity>,
    /// Ledger entries that could not be decoded.
    pub malformed: Vec<RegistryError>,
    /// Wall-clock cost of the pass.
    pub elapsed: Duration,
}

pub struct Reconciler<S: SeriesStore = MetricStore> {
    store: Arc<S>,
}

impl<S: SeriesStore> Reconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Run a pass over serialized `name|cluster` ledger keys.
    ///
    /// Duplicate keys share the verdict of their first occurrence, so each
    /// vanished identity is deleted exactly once per pass.
    pub fn reconcile_keys<K: AsRef<str>>(
        &self,
        live: &[NodeIdentity],
        ever_known: &[K],
    ) -> ReconcileReport {
        let start = Instant::now();
        let mut pass = Pass::new(live);

        for key in ever_known {
            let key = key.as_ref();
            match NodeIdentity::from_key(key) {
                Ok(identity) => {
                    pass.visit(self.store.as_ref(), identity);
                }
                Err(source) => {
                    warn!(%key, error = %source, "skipping malformed ledger entry");
                    self.store.increment_error_count();
                    pass.report.malformed.push(RegistryError::MalformedLedgerEntry {
                        key: key.to_string(),
                        source,
                    });
                }
            }
        }

        self.finish(start, pass.report)
    }

    /// Run a pass over the ledger and evict vanished identities from it.
    ///
    /// The ledger is read once at the start of the pass; nodes recorded
    /// while the pass runs are left for the next one. An identity recorded
    /// again after that read keeps its ledger entry even if its series were
    /// deleted, so whatever the concurrent cycle writes stays collectable.
    pub fn reconcile(&self, live: &[NodeIdentity], ledger: &SeenNodeLedger) -> ReconcileReport {
        let start = Instant::now();
        let mut pass = Pass::new(live);

        let mut evict = Vec::new();
        for (identity, generation) in ledger.snapshot() {
            if pass.visit(self.store.as_ref(), identity.clone()) {
                evict.push((identity, generation));
            }
        }
        for (identity, generation) in &evict {
            if !ledger.forget_if_unchanged(identity, *generation) {
                debug!(nodename = %identity.name, cluster = %identity.cluster, "node recorded again during pass, keeping ledger entry");
            }
        }

        self.finish(start, pass.report)
    }

    fn finish(&self, start: Instant, mut report: ReconcileReport) -> ReconcileReport {
        report.elapsed = start.elapsed();
        self.store.observe_cleaning_duration(report.elapsed);
        debug!(
            kept = report.kept.len(),
            vanished = report.vanished.len(),
            malformed = report.malformed.len(),
            elapsed_ns = report.elapsed.as_nanos() as u64,
            "metrics cleaning pass finished"
        );
        report
    }
}

/// Bookkeeping of a single pass.
struct Pass<'a> {
    live: HashSet<&'a NodeIdentity>,
    visited: HashSet<NodeIdentity>,
    report: ReconcileReport,
}

impl<'a> Pass<'a> {
    fn new(live: &'a [NodeIdentity]) -> Self {
        Self {
            live: live.iter().collect(),
            visited: HashSet::new(),
            report: ReconcileReport::default(),
        }
    }

    /// Judge one identity. Returns `true` if its series were deleted.
    fn visit<S: SeriesStore + ?Sized>(&mut self, store: &S, identity: NodeIdentity) -> bool {
        if self.visited.contains(&identity) {
            return false;
        }

        let vanished = !self.live.contains(&identity);
        if vanished {
            info!(nodename = %identity.name, cluster = %identity.cluster, "metrics removed for vanished node");
            store.delete_series(&identity);
            self.report.vanished.push(identity.clone());
        } else {
            debug!(nodename = %identity.name, cluster = %identity.cluster, "metrics are live, keeping them");
            self.report.kept.push(identity.clone());
        }
        self.visited.insert(identity);
        vanished
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Records every call instead of storing series.
    #[derive(Default)]
    struct RecordingStore {
        deletions: Mutex<Vec<NodeIdentity>>,
        durations: Mutex<Vec<Duration>>,
        errors: AtomicU64,
    }

    impl RecordingStore {
        fn deletions(&self) -> Vec<NodeIdentity> {
            self.deletions.lock().unwrap().clone()
        }

        fn deletions_of(&self, node: &NodeIdentity) -> usize {
            self.deletions().iter().filter(|d| *d == node).count()
        }

        fn durations(&self) -> Vec<Duration> {
            self.durations.lock().unwrap().clone()
        }
    }

    impl SeriesStore for RecordingStore {
        fn delete_series(&self, node: &NodeIdentity) -> bool {
            self.deletions.lock().unwrap().push(node.clone());
            true
        }

        fn observe_cleaning_duration(&self, elapsed: Duration) {
            self.durations.lock().unwrap().push(elapsed);
        }

        fn increment_error_count(&self) {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn node(name: &str, cluster: &str) -> NodeIdentity {
        NodeIdentity::new(name, cluster)
    }

    fn recording() -> (Arc<RecordingStore>, Reconciler<RecordingStore>) {
        let store = Arc::new(RecordingStore::default());
        (store.clone(), Reconciler::new(store))
    }

    #[test]
    fn vanished_node_deleted_once_live_nodes_untouched() {
        let (store, reconciler) = recording();
        let live = vec![node("n1", "c1"), node("n3", "c2")];

        let report = reconciler.reconcile_keys(&live, &["n1|c1", "n2|c1", "n3|c2"]);

        assert_eq!(store.deletions(), vec![node("n2", "c1")]);
        assert_eq!(report.vanished, vec![node("n2", "c1")]);
        assert_eq!(report.kept, live);
        assert!(report.malformed.is_empty());
    }

    #[test]
    fn empty_ledger_deletes_nothing() {
        let (store, reconciler) = recording();
        let keys: [&str; 0] = [];

        let report = reconciler.reconcile_keys(&[node("n1", "c1")], &keys);

        assert!(store.deletions().is_empty());
        assert_eq!(report, ReconcileReport { elapsed: report.elapsed, ..Default::default() });
        assert_eq!(store.durations().len(), 1);
    }

    #[test]
    fn empty_live_set_deletes_everything_known() {
        let (store, reconciler) = recording();

        reconciler.reconcile_keys(&[], &["n1|c1"]);

        assert_eq!(store.deletions(), vec![node("n1", "c1")]);
    }

    #[test]
    fn malformed_key_is_skipped_and_counted() {
        let (store, reconciler) = recording();

        let report = reconciler.reconcile_keys(&[node("n1", "c1")], &["garbage", "n2|c1", "n1|c1"]);

        assert_eq!(store.deletions(), vec![node("n2", "c1")]);
        assert_eq!(store.errors.load(Ordering::Relaxed), 1);
        assert_eq!(report.malformed.len(), 1);
        assert!(matches!(
            &report.malformed[0],
            RegistryError::MalformedLedgerEntry { key, .. } if key == "garbage"
        ));
        assert_eq!(store.durations().len(), 1);
    }

    #[test]
    fn match_requires_name_and_cluster() {
        let (store, reconciler) = recording();
        // Same name, other cluster; same cluster, other name.
        let live = vec![node("n1", "c2"), node("n2", "c1")];

        reconciler.reconcile_keys(&live, &["n1|c1"]);

        assert_eq!(store.deletions(), vec![node("n1", "c1")]);
    }

    #[test]
    fn match_is_case_sensitive() {
        let (store, reconciler) = recording();

        reconciler.reconcile_keys(&[node("N1", "c1")], &["n1|c1"]);

        assert_eq!(store.deletions(), vec![node("n1", "c1")]);
    }

    #[test]
    fn duplicates_do_not_change_the_outcome() {
        let (store, reconciler) = recording();
        let live = vec![node("n1", "c1"), node("n1", "c1")];

        let report = reconciler.reconcile_keys(&live, &["n1|c1", "n2|c1", "n2|c1", "n1|c1"]);

        assert_eq!(store.deletions_of(&node("n2", "c1")), 1);
        assert_eq!(store.deletions_of(&node("n1", "c1")), 0);
        assert_eq!(report.kept, vec![node("n1", "c1")]);
        assert_eq!(report.vanished, vec![node("n2", "c1")]);
    }

    #[test]
    fn key_with_extra_delimiter_keeps_it_in_cluster() {
        let (store, reconciler) = recording();

        reconciler.reconcile_keys(&[node("n1", "c|x")], &["n1|c|x", "n2|c|x"]);

        assert_eq!(store.deletions(), vec![node("n2", "c|x")]);
    }

    #[test]
    fn one_duration_observation_per_pass() {
        let (store, reconciler) = recording();
        let ledger = SeenNodeLedger::new();

        reconciler.reconcile_keys(&[], &["n1|c1"]);
        reconciler.reconcile_keys::<&str>(&[], &[]);
        reconciler.reconcile(&[], &ledger);

        let durations = store.durations();
        assert_eq!(durations.len(), 3);
        assert!(durations.iter().all(|d| *d >= Duration::ZERO));
    }

    #[test]
    fn reconcile_prunes_vanished_from_ledger() {
        let (store, reconciler) = recording();
        let ledger = SeenNodeLedger::new();
        for n in [node("n1", "c1"), node("n2", "c1"), node("n3", "c2")] {
            ledger.record(&n);
        }

        let report = reconciler.reconcile(&[node("n1", "c1"), node("n3", "c2")], &ledger);

        assert_eq!(report.vanished, vec![node("n2", "c1")]);
        assert_eq!(store.deletions(), vec![node("n2", "c1")]);
        assert_eq!(ledger.all_known(), vec![node("n1", "c1"), node("n3", "c2")]);

        // Nothing left to collect on the next identical pass.
        let report = reconciler.reconcile(&[node("n1", "c1"), node("n3", "c2")], &ledger);
        assert!(report.vanished.is_empty());
        assert_eq!(store.deletions().len(), 1);
    }

    #[test]
    fn reconcile_ignores_live_nodes_missing_from_ledger() {
        let (store, reconciler) = recording();
        let ledger = SeenNodeLedger::new();

        let report = reconciler.reconcile(&[node("n1", "c1")], &ledger);

        assert!(store.deletions().is_empty());
        assert!(report.kept.is_empty());
    }

    #[test]
    fn reconcile_against_real_store() {
        let store = Arc::new(MetricStore::default());
        let reconciler = Reconciler::new(store.clone());
        let ledger = SeenNodeLedger::new();
        let n1 = node("n1", "c1");
        let n2 = node("n2", "c1");
        for n in [&n1, &n2] {
            ledger.record(n);
            store.set_doc_count(n, 10);
        }

        reconciler.reconcile(&[n1.clone()], &ledger);

        assert_eq!(store.tracked_nodes(), vec![n1]);
        assert_eq!(store.snapshot().cleaning_duration.count, 1);
    }

    /// Store that sees its node rediscovered right after the deletion, the
    /// way a concurrent probe cycle would.
    struct RediscoveringStore {
        inner: Arc<MetricStore>,
        ledger: Arc<SeenNodeLedger>,
    }

    impl SeriesStore for RediscoveringStore {
        fn delete_series(&self, node: &NodeIdentity) -> bool {
            let deleted = self.inner.delete_series(node);
            self.ledger.record(node);
            self.inner
                .set_availability(node, esprobe_core::ServiceKind::Elasticsearch, true);
            deleted
        }

        fn observe_cleaning_duration(&self, elapsed: Duration) {
            self.inner.observe_cleaning_duration(elapsed);
        }

        fn increment_error_count(&self) {
            self.inner.increment_error_count();
        }
    }

    #[test]
    fn node_recorded_during_pass_stays_collectable() {
        let inner = Arc::new(MetricStore::default());
        let ledger = Arc::new(SeenNodeLedger::new());
        let x = node("x", "c1");
        ledger.record(&x);
        inner.set_doc_count(&x, 1);

        let racing = Reconciler::new(Arc::new(RediscoveringStore {
            inner: inner.clone(),
            ledger: ledger.clone(),
        }));
        let report = racing.reconcile(&[], &ledger);
        assert_eq!(report.vanished, vec![x.clone()]);
        // Rewritten by the concurrent cycle, and still known.
        assert!(inner.has_series(&x));
        assert!(ledger.contains(&x));

        // Once the node is really gone, a plain pass collects it.
        Reconciler::new(inner.clone()).reconcile(&[], &ledger);
        assert!(!inner.has_series(&x));
        assert!(ledger.is_empty());
    }
}
