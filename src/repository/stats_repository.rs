use super::models::{TokenStats, parse_column};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

pub struct StatsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> StatsRepository<'a> {
    /// Fixed key of the singleton stats row.
    pub const STATS_ID: &'static str = "token-stats";

    const SELECT_STATS: &'static str =
        "SELECT total_supply, total_minted, total_burned, total_transferred
         FROM token_stats WHERE id = ?1";

    const UPSERT_STATS: &'static str = "INSERT INTO token_stats
            (id, total_supply, total_minted, total_burned, total_transferred)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            total_supply = excluded.total_supply,
            total_minted = excluded.total_minted,
            total_burned = excluded.total_burned,
            total_transferred = excluded.total_transferred";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self) -> Result<Option<TokenStats>> {
        let stats = self
            .conn
            .query_row(Self::SELECT_STATS, params![Self::STATS_ID], |row| {
                Ok(TokenStats {
                    total_supply: parse_column(row, 0)?,
                    total_minted: parse_column(row, 1)?,
                    total_burned: parse_column(row, 2)?,
                    total_transferred: parse_column(row, 3)?,
                })
            })
            .optional()?;
        Ok(stats)
    }

    pub fn get_or_default(&self) -> Result<TokenStats> {
        Ok(self.get()?.unwrap_or_default())
    }

    pub fn save(&self, stats: &TokenStats) -> Result<()> {
        self.conn.execute(
            Self::UPSERT_STATS,
            params![
                Self::STATS_ID,
                stats.total_supply.to_string(),
                stats.total_minted.to_string(),
                stats.total_burned.to_string(),
                stats.total_transferred.to_string(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Database;
    use alloy_primitives::{I256, U256};

    #[test]
    fn stats_are_a_singleton() {
        let db = Database::in_memory().unwrap();
        let repo = StatsRepository::new(&db.conn);

        assert!(repo.get().unwrap().is_none());
        assert_eq!(repo.get_or_default().unwrap(), TokenStats::default());

        let mut stats = TokenStats::default();
        stats.total_supply = I256::try_from(-7).unwrap();
        stats.total_burned = U256::from(7);
        repo.save(&stats).unwrap();

        stats.total_transferred = U256::MAX;
        repo.save(&stats).unwrap();

        assert_eq!(repo.get().unwrap().unwrap(), stats);
        let rows: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM token_stats", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
