//! Registry error types.

use esprobe_core::KeyError;
use thiserror::Error;

/// Errors that can occur during a reconciliation pass.
///
/// None of them aborts a pass; they are collected in the pass report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("malformed ledger entry {key:?}: {source}")]
    MalformedLedgerEntry {
        key: String,
        #[source]
        source: KeyError,
    },
}
