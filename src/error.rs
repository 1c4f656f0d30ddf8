use crate::events::{EventKey, EventKind};
use alloy_primitives::{Address, I256};
use thiserror::Error;

/// Failures raised while applying a single event to the ledger.
///
/// Every variant leaves the store exactly as it was before the event.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A record with the same `(transaction hash, log index)` already exists.
    #[error("duplicate {kind} event {key}")]
    DuplicateKey { kind: EventKind, key: EventKey },

    /// Only raised under [`NegativeBalancePolicy::Reject`](crate::NegativeBalancePolicy).
    #[error("balance of {address:?} would become {balance}")]
    NegativeBalance { address: Address, balance: I256 },

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, LedgerError::DuplicateKey { .. })
    }
}
