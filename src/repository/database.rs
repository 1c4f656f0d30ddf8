use anyhow::{Context, Result};
use rusqlite::Connection;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    const SCHEMA: &'static str = "
        CREATE TABLE IF NOT EXISTS sync_state (
            contract_address TEXT PRIMARY KEY,
            start_block INTEGER NOT NULL,
            last_processed_block INTEGER
        );

        CREATE TABLE IF NOT EXISTS accounts (
            address TEXT PRIMARY KEY,
            balance TEXT NOT NULL,
            balance_padded TEXT NOT NULL,
            is_negative INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_accounts_balance
            ON accounts(is_negative, balance_padded);

        CREATE TABLE IF NOT EXISTS token_stats (
            id TEXT PRIMARY KEY,
            total_supply TEXT NOT NULL,
            total_minted TEXT NOT NULL,
            total_burned TEXT NOT NULL,
            total_transferred TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS event_keys (
            transaction_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            kind TEXT NOT NULL,
            PRIMARY KEY (transaction_hash, log_index)
        );

        CREATE TABLE IF NOT EXISTS mints (
            transaction_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            block_number INTEGER NOT NULL,
            block_timestamp INTEGER NOT NULL,
            to_address TEXT NOT NULL,
            amount TEXT NOT NULL,
            PRIMARY KEY (transaction_hash, log_index)
        );

        CREATE TABLE IF NOT EXISTS burns (
            transaction_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            block_number INTEGER NOT NULL,
            block_timestamp INTEGER NOT NULL,
            from_address TEXT NOT NULL,
            amount TEXT NOT NULL,
            PRIMARY KEY (transaction_hash, log_index)
        );

        CREATE TABLE IF NOT EXISTS transfers (
            transaction_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            block_number INTEGER NOT NULL,
            block_timestamp INTEGER NOT NULL,
            from_address TEXT NOT NULL,
            to_address TEXT NOT NULL,
            amount TEXT NOT NULL,
            PRIMARY KEY (transaction_hash, log_index)
        );

        CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers(from_address);
        CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers(to_address);

        CREATE TABLE IF NOT EXISTS ownership_transfers (
            transaction_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            block_number INTEGER NOT NULL,
            block_timestamp INTEGER NOT NULL,
            previous_owner TEXT NOT NULL,
            new_owner TEXT NOT NULL,
            PRIMARY KEY (transaction_hash, log_index)
        );

        CREATE TABLE IF NOT EXISTS approvals (
            transaction_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            block_number INTEGER NOT NULL,
            block_timestamp INTEGER NOT NULL,
            owner TEXT NOT NULL,
            spender TEXT NOT NULL,
            amount TEXT NOT NULL,
            PRIMARY KEY (transaction_hash, log_index)
        );

        CREATE INDEX IF NOT EXISTS idx_approvals_owner ON approvals(owner);

        CREATE TABLE IF NOT EXISTS proposals (
            transaction_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            block_number INTEGER NOT NULL,
            block_timestamp INTEGER NOT NULL,
            proposal_id TEXT NOT NULL,
            description TEXT NOT NULL,
            recipient TEXT NOT NULL,
            amount TEXT NOT NULL,
            voting_deadline TEXT NOT NULL,
            min_votes_to_pass TEXT NOT NULL,
            PRIMARY KEY (transaction_hash, log_index)
        );

        CREATE TABLE IF NOT EXISTS proposal_executions (
            transaction_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            block_number INTEGER NOT NULL,
            block_timestamp INTEGER NOT NULL,
            proposal_id TEXT NOT NULL,
            PRIMARY KEY (transaction_hash, log_index)
        );

        CREATE TABLE IF NOT EXISTS votes (
            transaction_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            block_number INTEGER NOT NULL,
            block_timestamp INTEGER NOT NULL,
            proposal_id TEXT NOT NULL,
            voter TEXT NOT NULL,
            PRIMARY KEY (transaction_hash, log_index)
        );

        CREATE INDEX IF NOT EXISTS idx_votes_proposal ON votes(proposal_id);
    ";

    /// Open (or create) the database. Accepts plain paths, `sqlite:` URLs and `:memory:`.
    pub fn new(db_path: &str) -> Result<Self> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let db_path = db_path.strip_prefix("//").unwrap_or(db_path);
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {db_path}"))?;

        let db = Database { conn };
        db.create_tables()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Database { conn };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn
            .execute_batch(Self::SCHEMA)
            .context("Failed to create tables")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let db = Database::in_memory().unwrap();
        db.create_tables().unwrap();

        let tables: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 12);
    }

    #[test]
    fn accepts_sqlite_url_for_memory() {
        assert!(Database::new("sqlite::memory:").is_ok());
    }
}
