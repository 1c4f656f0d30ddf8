use super::models::{SyncState, address_key};
use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::{OptionalExtension, params};

/// Scan cursor per indexed contract.
pub struct SyncStateRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> SyncStateRepository<'a> {
    const INSERT_STATE: &'static str =
        "INSERT OR IGNORE INTO sync_state (contract_address, start_block, last_processed_block)
         VALUES (?1, ?2, NULL)";

    const UPDATE_LAST_PROCESSED_BLOCK: &'static str =
        "UPDATE sync_state SET last_processed_block = ?1 WHERE contract_address = ?2";

    const SELECT_STATE: &'static str =
        "SELECT start_block, last_processed_block FROM sync_state WHERE contract_address = ?1";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Register a contract. An existing entry keeps its original start block and cursor.
    pub fn init(&self, contract_address: &Address, start_block: u64) -> Result<SyncState> {
        self.conn.execute(
            Self::INSERT_STATE,
            params![address_key(contract_address), start_block],
        )?;
        self.get(contract_address)?
            .ok_or_else(|| anyhow::anyhow!("Sync state for {contract_address:?} vanished"))
    }

    pub fn get(&self, contract_address: &Address) -> Result<Option<SyncState>> {
        let state = self
            .conn
            .query_row(
                Self::SELECT_STATE,
                params![address_key(contract_address)],
                |row| {
                    Ok(SyncState {
                        contract_address: *contract_address,
                        start_block: row.get(0)?,
                        last_processed_block: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    pub fn update_last_processed_block(
        &self,
        contract_address: &Address,
        block_number: u64,
    ) -> Result<()> {
        let updated = self.conn.execute(
            Self::UPDATE_LAST_PROCESSED_BLOCK,
            params![block_number, address_key(contract_address)],
        )?;
        if updated == 0 {
            anyhow::bail!("No sync state registered for {contract_address:?}");
        }
        Ok(())
    }
}
