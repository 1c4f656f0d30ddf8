use super::models::{EventRecord, RecordCounts, address_key, parse_column};
use crate::events::{EventKey, EventKind, EventMeta, LedgerEvent};
use alloy_primitives::Address;
use anyhow::{Result, bail};
use rusqlite::{Connection, OptionalExtension, Row, params};

/// Append-only store of event records, one table per event kind.
///
/// `event_keys` holds every key regardless of kind, so a key can be claimed once.
/// Records are never updated or deleted; inserting an existing key is a no-op
/// that the caller observes through the `false` return of [`RecordRepository::insert`].
pub struct RecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> RecordRepository<'a> {
    const CLAIM_KEY: &'static str =
        "INSERT OR IGNORE INTO event_keys (transaction_hash, log_index, kind) VALUES (?1, ?2, ?3)";

    const SELECT_KIND: &'static str =
        "SELECT kind FROM event_keys WHERE transaction_hash = ?1 AND log_index = ?2";

    const INSERT_MINT: &'static str = "INSERT OR IGNORE INTO mints (
            transaction_hash, log_index, block_number, block_timestamp, to_address, amount
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

    const INSERT_BURN: &'static str = "INSERT OR IGNORE INTO burns (
            transaction_hash, log_index, block_number, block_timestamp, from_address, amount
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

    const INSERT_TRANSFER: &'static str = "INSERT OR IGNORE INTO transfers (
            transaction_hash, log_index, block_number, block_timestamp,
            from_address, to_address, amount
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

    const INSERT_OWNERSHIP: &'static str = "INSERT OR IGNORE INTO ownership_transfers (
            transaction_hash, log_index, block_number, block_timestamp,
            previous_owner, new_owner
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

    const INSERT_APPROVAL: &'static str = "INSERT OR IGNORE INTO approvals (
            transaction_hash, log_index, block_number, block_timestamp,
            owner, spender, amount
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

    const INSERT_PROPOSAL: &'static str = "INSERT OR IGNORE INTO proposals (
            transaction_hash, log_index, block_number, block_timestamp,
            proposal_id, description, recipient, amount, voting_deadline, min_votes_to_pass
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

    const INSERT_EXECUTION: &'static str = "INSERT OR IGNORE INTO proposal_executions (
            transaction_hash, log_index, block_number, block_timestamp, proposal_id
        ) VALUES (?1, ?2, ?3, ?4, ?5)";

    const INSERT_VOTE: &'static str = "INSERT OR IGNORE INTO votes (
            transaction_hash, log_index, block_number, block_timestamp, proposal_id, voter
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn table(kind: EventKind) -> &'static str {
        match kind {
            EventKind::Mint => "mints",
            EventKind::Burn => "burns",
            EventKind::Transfer => "transfers",
            EventKind::OwnershipTransferred => "ownership_transfers",
            EventKind::Approval => "approvals",
            EventKind::ProposalCreated => "proposals",
            EventKind::ProposalExecuted => "proposal_executions",
            EventKind::Vote => "votes",
        }
    }

    fn select(kind: EventKind) -> &'static str {
        match kind {
            EventKind::Mint => {
                "SELECT transaction_hash, log_index, block_number, block_timestamp,
                    to_address, amount FROM mints"
            }
            EventKind::Burn => {
                "SELECT transaction_hash, log_index, block_number, block_timestamp,
                    from_address, amount FROM burns"
            }
            EventKind::Transfer => {
                "SELECT transaction_hash, log_index, block_number, block_timestamp,
                    from_address, to_address, amount FROM transfers"
            }
            EventKind::OwnershipTransferred => {
                "SELECT transaction_hash, log_index, block_number, block_timestamp,
                    previous_owner, new_owner FROM ownership_transfers"
            }
            EventKind::Approval => {
                "SELECT transaction_hash, log_index, block_number, block_timestamp,
                    owner, spender, amount FROM approvals"
            }
            EventKind::ProposalCreated => {
                "SELECT transaction_hash, log_index, block_number, block_timestamp,
                    proposal_id, description, recipient, amount, voting_deadline,
                    min_votes_to_pass FROM proposals"
            }
            EventKind::ProposalExecuted => {
                "SELECT transaction_hash, log_index, block_number, block_timestamp,
                    proposal_id FROM proposal_executions"
            }
            EventKind::Vote => {
                "SELECT transaction_hash, log_index, block_number, block_timestamp,
                    proposal_id, voter FROM votes"
            }
        }
    }

    /// Condition matching every record an address takes part in, if the kind names any.
    fn address_filter(kind: EventKind) -> Option<&'static str> {
        match kind {
            EventKind::Mint => Some("to_address = ?1"),
            EventKind::Burn => Some("from_address = ?1"),
            EventKind::Transfer => Some("(from_address = ?1 OR to_address = ?1)"),
            EventKind::OwnershipTransferred => Some("(previous_owner = ?1 OR new_owner = ?1)"),
            EventKind::Approval => Some("(owner = ?1 OR spender = ?1)"),
            EventKind::ProposalCreated => Some("recipient = ?1"),
            EventKind::ProposalExecuted => None,
            EventKind::Vote => Some("voter = ?1"),
        }
    }

    /// Append the record for `record`. Returns `false` if its key was already taken.
    pub fn insert(&self, record: &EventRecord) -> Result<bool> {
        let meta = &record.meta;
        let tx_hash = format!("{:?}", meta.transaction_hash);

        let claimed = self.conn.execute(
            Self::CLAIM_KEY,
            params![tx_hash, meta.log_index, record.kind().as_str()],
        )?;
        if claimed == 0 {
            return Ok(false);
        }

        let inserted = match &record.event {
            LedgerEvent::Mint { to, amount } => self.conn.execute(
                Self::INSERT_MINT,
                params![
                    tx_hash,
                    meta.log_index,
                    meta.block_number,
                    meta.block_timestamp,
                    address_key(to),
                    amount.to_string(),
                ],
            )?,
            LedgerEvent::Burn { from, amount } => self.conn.execute(
                Self::INSERT_BURN,
                params![
                    tx_hash,
                    meta.log_index,
                    meta.block_number,
                    meta.block_timestamp,
                    address_key(from),
                    amount.to_string(),
                ],
            )?,
            LedgerEvent::Transfer { from, to, amount } => self.conn.execute(
                Self::INSERT_TRANSFER,
                params![
                    tx_hash,
                    meta.log_index,
                    meta.block_number,
                    meta.block_timestamp,
                    address_key(from),
                    address_key(to),
                    amount.to_string(),
                ],
            )?,
            LedgerEvent::OwnershipTransferred {
                previous_owner,
                new_owner,
            } => self.conn.execute(
                Self::INSERT_OWNERSHIP,
                params![
                    tx_hash,
                    meta.log_index,
                    meta.block_number,
                    meta.block_timestamp,
                    address_key(previous_owner),
                    address_key(new_owner),
                ],
            )?,
            LedgerEvent::Approval {
                owner,
                spender,
                amount,
            } => self.conn.execute(
                Self::INSERT_APPROVAL,
                params![
                    tx_hash,
                    meta.log_index,
                    meta.block_number,
                    meta.block_timestamp,
                    address_key(owner),
                    address_key(spender),
                    amount.to_string(),
                ],
            )?,
            LedgerEvent::ProposalCreated {
                proposal_id,
                description,
                recipient,
                amount,
                voting_deadline,
                min_votes_to_pass,
            } => self.conn.execute(
                Self::INSERT_PROPOSAL,
                params![
                    tx_hash,
                    meta.log_index,
                    meta.block_number,
                    meta.block_timestamp,
                    proposal_id.to_string(),
                    description,
                    address_key(recipient),
                    amount.to_string(),
                    voting_deadline.to_string(),
                    min_votes_to_pass.to_string(),
                ],
            )?,
            LedgerEvent::ProposalExecuted { proposal_id } => self.conn.execute(
                Self::INSERT_EXECUTION,
                params![
                    tx_hash,
                    meta.log_index,
                    meta.block_number,
                    meta.block_timestamp,
                    proposal_id.to_string(),
                ],
            )?,
            LedgerEvent::Voted { proposal_id, voter } => self.conn.execute(
                Self::INSERT_VOTE,
                params![
                    tx_hash,
                    meta.log_index,
                    meta.block_number,
                    meta.block_timestamp,
                    proposal_id.to_string(),
                    address_key(voter),
                ],
            )?,
        };

        Ok(inserted == 1)
    }

    pub fn get(&self, kind: EventKind, key: &EventKey) -> Result<Option<EventRecord>> {
        let query = format!(
            "{} WHERE transaction_hash = ?1 AND log_index = ?2",
            Self::select(kind)
        );
        let record = self
            .conn
            .query_row(
                &query,
                params![format!("{:?}", key.transaction_hash), key.log_index],
                |row| Self::row_to_record(kind, row),
            )
            .optional()?;
        Ok(record)
    }

    /// Look a key up regardless of its kind.
    pub fn find(&self, key: &EventKey) -> Result<Option<EventRecord>> {
        let kind: Option<String> = self
            .conn
            .query_row(
                Self::SELECT_KIND,
                params![format!("{:?}", key.transaction_hash), key.log_index],
                |row| row.get(0),
            )
            .optional()?;

        match kind {
            Some(kind) => self.get(kind.parse()?, key),
            None => Ok(None),
        }
    }

    /// Records of one kind in delivery order, optionally restricted to an address.
    pub fn list(
        &self,
        kind: EventKind,
        address: Option<&Address>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>> {
        let mut query = Self::select(kind).to_string();
        if address.is_some() {
            let Some(filter) = Self::address_filter(kind) else {
                bail!("{} records cannot be filtered by address", kind.as_str());
            };
            query.push_str(" WHERE ");
            query.push_str(filter);
        }
        query.push_str(&format!(
            " ORDER BY block_number, log_index LIMIT {limit} OFFSET {offset}"
        ));

        let mut stmt = self.conn.prepare(&query)?;
        let records = match address {
            Some(address) => stmt
                .query_map(params![address_key(address)], |row| {
                    Self::row_to_record(kind, row)
                })?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map([], |row| Self::row_to_record(kind, row))?
                .collect::<Result<Vec<_>, _>>()?,
        };

        Ok(records)
    }

    pub fn count(&self, kind: EventKind) -> Result<u64> {
        let query = format!("SELECT COUNT(*) FROM {}", Self::table(kind));
        let count = self.conn.query_row(&query, [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn counts(&self) -> Result<RecordCounts> {
        Ok(RecordCounts {
            mints: self.count(EventKind::Mint)?,
            burns: self.count(EventKind::Burn)?,
            transfers: self.count(EventKind::Transfer)?,
            ownership_transfers: self.count(EventKind::OwnershipTransferred)?,
            approvals: self.count(EventKind::Approval)?,
            proposals: self.count(EventKind::ProposalCreated)?,
            executions: self.count(EventKind::ProposalExecuted)?,
            votes: self.count(EventKind::Vote)?,
        })
    }

    fn row_to_record(kind: EventKind, row: &Row) -> rusqlite::Result<EventRecord> {
        let meta = EventMeta {
            transaction_hash: parse_column(row, 0)?,
            log_index: row.get(1)?,
            block_number: row.get(2)?,
            block_timestamp: row.get(3)?,
        };

        let event = match kind {
            EventKind::Mint => LedgerEvent::Mint {
                to: parse_column(row, 4)?,
                amount: parse_column(row, 5)?,
            },
            EventKind::Burn => LedgerEvent::Burn {
                from: parse_column(row, 4)?,
                amount: parse_column(row, 5)?,
            },
            EventKind::Transfer => LedgerEvent::Transfer {
                from: parse_column(row, 4)?,
                to: parse_column(row, 5)?,
                amount: parse_column(row, 6)?,
            },
            EventKind::OwnershipTransferred => LedgerEvent::OwnershipTransferred {
                previous_owner: parse_column(row, 4)?,
                new_owner: parse_column(row, 5)?,
            },
            EventKind::Approval => LedgerEvent::Approval {
                owner: parse_column(row, 4)?,
                spender: parse_column(row, 5)?,
                amount: parse_column(row, 6)?,
            },
            EventKind::ProposalCreated => LedgerEvent::ProposalCreated {
                proposal_id: parse_column(row, 4)?,
                description: row.get(5)?,
                recipient: parse_column(row, 6)?,
                amount: parse_column(row, 7)?,
                voting_deadline: parse_column(row, 8)?,
                min_votes_to_pass: parse_column(row, 9)?,
            },
            EventKind::ProposalExecuted => LedgerEvent::ProposalExecuted {
                proposal_id: parse_column(row, 4)?,
            },
            EventKind::Vote => LedgerEvent::Voted {
                proposal_id: parse_column(row, 4)?,
                voter: parse_column(row, 5)?,
            },
        };

        Ok(EventRecord { meta, event })
    }
}
