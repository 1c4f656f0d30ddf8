use super::models::{Account, address_key, parse_column};
use alloy_primitives::{Address, I256};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};

pub struct AccountRepository<'a> {
    conn: &'a Connection,
}

impl<'a> AccountRepository<'a> {
    const UPSERT_ACCOUNT: &'static str =
        "INSERT INTO accounts (address, balance, balance_padded, is_negative)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(address) DO UPDATE SET
            balance = excluded.balance,
            balance_padded = excluded.balance_padded,
            is_negative = excluded.is_negative";

    const SELECT_ACCOUNT: &'static str = "SELECT address, balance FROM accounts WHERE address = ?1";

    const SELECT_TOP_HOLDERS: &'static str = "SELECT address, balance FROM accounts
         WHERE is_negative = 0 AND balance != '0'
         ORDER BY balance_padded DESC
         LIMIT ?1";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Pad the magnitude of a balance to 78 digits so TEXT ordering matches numeric ordering.
    pub fn pad_balance(balance: &I256) -> String {
        format!("{:0>78}", balance.unsigned_abs())
    }

    pub fn get(&self, address: &Address) -> Result<Option<Account>> {
        let account = self
            .conn
            .query_row(
                Self::SELECT_ACCOUNT,
                params![address_key(address)],
                Self::row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    /// Load an account, or a zero-balance one if it has never been seen.
    pub fn get_or_default(&self, address: &Address) -> Result<Account> {
        Ok(self.get(address)?.unwrap_or_else(|| Account::new(*address)))
    }

    pub fn save(&self, account: &Account) -> Result<()> {
        self.conn.execute(
            Self::UPSERT_ACCOUNT,
            params![
                address_key(&account.address),
                account.balance.to_string(),
                Self::pad_balance(&account.balance),
                account.balance.is_negative(),
            ],
        )?;
        Ok(())
    }

    /// Accounts with the largest positive balances, descending.
    pub fn top_holders(&self, limit: usize) -> Result<Vec<Account>> {
        let mut stmt = self.conn.prepare(Self::SELECT_TOP_HOLDERS)?;
        let holders = stmt
            .query_map(params![limit], Self::row_to_account)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(holders)
    }

    pub fn count(&self) -> Result<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Number of accounts that were debited below zero.
    pub fn count_negative(&self) -> Result<u64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM accounts WHERE is_negative = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn sum_balances(&self) -> Result<I256> {
        let mut stmt = self.conn.prepare("SELECT balance FROM accounts")?;
        let balances = stmt
            .query_map([], |row| parse_column::<I256>(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut total = I256::ZERO;
        for balance in balances {
            total = total
                .checked_add(balance)
                .ok_or_else(|| anyhow::anyhow!("Overflow in balance sum"))?;
        }
        Ok(total)
    }

    fn row_to_account(row: &Row) -> rusqlite::Result<Account> {
        Ok(Account {
            address: parse_column(row, 0)?,
            balance: parse_column(row, 1)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Database;
    use alloy_primitives::address;

    const ALICE: Address = address!("0x00000000000000000000000000000000000000a1");
    const BOB: Address = address!("0x00000000000000000000000000000000000000b0");
    const CAROL: Address = address!("0x00000000000000000000000000000000000000c0");

    fn int(v: i64) -> I256 {
        I256::try_from(v).unwrap()
    }

    #[test]
    fn missing_account_defaults_to_zero() {
        let db = Database::in_memory().unwrap();
        let repo = AccountRepository::new(&db.conn);

        assert!(repo.get(&ALICE).unwrap().is_none());
        let account = repo.get_or_default(&ALICE).unwrap();
        assert_eq!(account, Account::new(ALICE));
        // get_or_default does not persist
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn save_round_trips_negative_balances() {
        let db = Database::in_memory().unwrap();
        let repo = AccountRepository::new(&db.conn);

        repo.save(&Account {
            address: ALICE,
            balance: int(-40),
        })
        .unwrap();

        assert_eq!(repo.get(&ALICE).unwrap().unwrap().balance, int(-40));
        assert_eq!(repo.count_negative().unwrap(), 1);

        repo.save(&Account {
            address: ALICE,
            balance: int(60),
        })
        .unwrap();
        assert_eq!(repo.get(&ALICE).unwrap().unwrap().balance, int(60));
        assert_eq!(repo.count_negative().unwrap(), 0);
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn top_holders_skip_negative_and_zero() {
        let db = Database::in_memory().unwrap();
        let repo = AccountRepository::new(&db.conn);

        for (address, balance) in [(ALICE, 5), (BOB, 1_000), (CAROL, -2_000)] {
            repo.save(&Account {
                address,
                balance: int(balance),
            })
            .unwrap();
        }
        repo.save(&Account::new(Address::ZERO)).unwrap();

        let holders = repo.top_holders(10).unwrap();
        let addresses: Vec<_> = holders.iter().map(|a| a.address).collect();
        assert_eq!(addresses, vec![BOB, ALICE]);

        assert_eq!(repo.sum_balances().unwrap(), int(-995));
    }
}
