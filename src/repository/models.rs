use alloy_primitives::{Address, I256, U256};
use rusqlite::Row;
use std::str::FromStr;

pub use crate::events::TokenEvent as EventRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub address: Address,
    pub balance: I256,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            balance: I256::ZERO,
        }
    }
}

/// The token-wide running totals.
///
/// `total_supply` is signed: a burn delivered without its matching mint drives
/// it below zero rather than failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenStats {
    pub total_supply: I256,
    pub total_minted: U256,
    pub total_burned: U256,
    pub total_transferred: U256,
}

impl Default for TokenStats {
    fn default() -> Self {
        Self {
            total_supply: I256::ZERO,
            total_minted: U256::ZERO,
            total_burned: U256::ZERO,
            total_transferred: U256::ZERO,
        }
    }
}

impl TokenStats {
    /// `total_supply == total_minted - total_burned`, evaluated without overflow.
    pub fn is_consistent(&self) -> bool {
        let magnitude = self.total_supply.unsigned_abs();
        if self.total_supply.is_negative() {
            self.total_burned.checked_sub(self.total_minted) == Some(magnitude)
        } else {
            self.total_minted.checked_sub(self.total_burned) == Some(magnitude)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordCounts {
    pub mints: u64,
    pub burns: u64,
    pub transfers: u64,
    pub ownership_transfers: u64,
    pub approvals: u64,
    pub proposals: u64,
    pub executions: u64,
    pub votes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncState {
    pub contract_address: Address,
    pub start_block: u64,
    pub last_processed_block: Option<u64>,
}

/// Storage form of an address: lowercase `0x`-prefixed hex.
pub fn address_key(address: &Address) -> String {
    format!("{address:?}")
}

/// Read a TEXT column and parse it, reporting parse failures as conversion errors.
pub(crate) fn parse_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    row.get::<_, String>(idx)?.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_consistency() {
        let mut stats = TokenStats {
            total_supply: I256::try_from(80).unwrap(),
            total_minted: U256::from(100),
            total_burned: U256::from(20),
            total_transferred: U256::from(999),
        };
        assert!(stats.is_consistent());

        stats.total_supply = I256::try_from(-5).unwrap();
        stats.total_minted = U256::from(10);
        stats.total_burned = U256::from(15);
        assert!(stats.is_consistent());

        stats.total_burned = U256::from(16);
        assert!(!stats.is_consistent());
    }

    #[test]
    fn default_stats_are_zero() {
        let stats = TokenStats::default();
        assert_eq!(stats.total_supply, I256::ZERO);
        assert_eq!(stats.total_transferred, U256::ZERO);
        assert!(stats.is_consistent());
    }
}
