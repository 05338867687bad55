//! Seen-node ledger — every node identity discovered since process start.
//!
//! The ledger is what makes disappearance detectable: a node probed once
//! and then missing from discovery is still known here, so its series can
//! be garbage collected. Entries are only removed by the reconciler once
//! their series are gone.
//!
//! Every `record` stamps the entry with a fresh generation. Eviction by
//! the reconciler is conditional on the generation it read at the start of
//! its pass, so a node re-recorded while the pass runs stays known.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use esprobe_core::NodeIdentity;

/// Record generation of a ledger entry.
pub type Generation = u64;

#[derive(Debug, Default)]
struct Entries {
    known: BTreeMap<NodeIdentity, Generation>,
    next_generation: Generation,
}

#[derive(Debug, Default)]
pub struct SeenNodeLedger {
    entries: RwLock<Entries>,
}

impl SeenNodeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember an identity. Returns `true` if it was not known yet.
    ///
    /// Recording a known identity refreshes its generation.
    pub fn record(&self, identity: &NodeIdentity) -> bool {
        let mut entries = self.write();
        entries.next_generation += 1;
        let generation = entries.next_generation;
        let inserted = entries
            .known
            .insert(identity.clone(), generation)
            .is_none();
        if inserted {
            debug!(cluster = %identity.cluster, nodename = %identity.name, "node recorded in ledger");
        }
        inserted
    }

    /// Remember every identity of a discovery cycle. Returns how many were new.
    pub fn record_all<'a>(&self, identities: impl IntoIterator<Item = &'a NodeIdentity>) -> usize {
        identities
            .into_iter()
            .filter(|id| self.record(id))
            .count()
    }

    /// Evict an identity. Returns `true` if it was known.
    pub fn forget(&self, identity: &NodeIdentity) -> bool {
        self.write().known.remove(identity).is_some()
    }

    /// Evict an identity only if it was not recorded again since
    /// `generation` was read. Returns `true` if it was evicted.
    pub fn forget_if_unchanged(&self, identity: &NodeIdentity, generation: Generation) -> bool {
        let mut entries = self.write();
        if entries.known.get(identity) == Some(&generation) {
            entries.known.remove(identity);
            true
        } else {
            false
        }
    }

    /// Every known identity, sorted.
    pub fn all_known(&self) -> Vec<NodeIdentity> {
        self.read().known.keys().cloned().collect()
    }

    /// Every known identity with its current generation, sorted by identity.
    pub fn snapshot(&self) -> Vec<(NodeIdentity, Generation)> {
        self.read()
            .known
            .iter()
            .map(|(id, generation)| (id.clone(), *generation))
            .collect()
    }

    /// Every known identity in `name|cluster` form, sorted by identity.
    pub fn all_keys(&self) -> Vec<String> {
        self.all_known().iter().map(NodeIdentity::to_key).collect()
    }

    pub fn contains(&self, identity: &NodeIdentity) -> bool {
        self.read().known.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.read().known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_idempotent() {
        let ledger = SeenNodeLedger::new();
        let n1 = NodeIdentity::new("n1", "c1");

        assert!(ledger.record(&n1));
        assert!(!ledger.record(&n1));
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains(&n1));
    }

    #[test]
    fn same_name_in_two_clusters_is_two_nodes() {
        let ledger = SeenNodeLedger::new();
        ledger.record(&NodeIdentity::new("n1", "c1"));
        ledger.record(&NodeIdentity::new("n1", "c2"));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn record_all_counts_new_entries() {
        let ledger = SeenNodeLedger::new();
        let nodes = vec![
            NodeIdentity::new("n1", "c1"),
            NodeIdentity::new("n2", "c1"),
            NodeIdentity::new("n1", "c1"),
        ];
        assert_eq!(ledger.record_all(&nodes), 2);
        assert_eq!(ledger.record_all(&nodes), 0);
    }

    #[test]
    fn all_known_is_sorted_and_stable() {
        let ledger = SeenNodeLedger::new();
        ledger.record(&NodeIdentity::new("n3", "c2"));
        ledger.record(&NodeIdentity::new("n1", "c1"));
        ledger.record(&NodeIdentity::new("n2", "c1"));

        let first = ledger.all_known();
        assert_eq!(first, ledger.all_known());
        assert_eq!(ledger.all_keys(), vec!["n1|c1", "n2|c1", "n3|c2"]);
    }

    #[test]
    fn forget_evicts() {
        let ledger = SeenNodeLedger::new();
        let n1 = NodeIdentity::new("n1", "c1");
        ledger.record(&n1);

        assert!(ledger.forget(&n1));
        assert!(!ledger.forget(&n1));
        assert!(ledger.is_empty());
        // A forgotten node can be recorded again.
        assert!(ledger.record(&n1));
    }

    #[test]
    fn rerecord_blocks_conditional_eviction() {
        let ledger = SeenNodeLedger::new();
        let n1 = NodeIdentity::new("n1", "c1");
        ledger.record(&n1);
        let (_, generation) = ledger.snapshot()[0].clone();

        ledger.record(&n1);
        assert!(!ledger.forget_if_unchanged(&n1, generation));
        assert!(ledger.contains(&n1));

        let (_, current) = ledger.snapshot()[0].clone();
        assert!(current > generation);
        assert!(ledger.forget_if_unchanged(&n1, current));
        assert!(ledger.is_empty());
    }
}
