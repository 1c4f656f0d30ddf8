use crate::error::LedgerError;
use crate::events::{EventKey, EventKind, EventMeta, LedgerEvent, ProposalCreated, TokenEvent};
use crate::repository::{
    AccountRepository, Database, EventRecord, RecordRepository, StatsRepository, TokenStats,
};
use alloy_primitives::{Address, I256, U256};
use rusqlite::Connection;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// What happens when a debit takes an account below zero.
///
/// The event source is trusted for conservation of value, so the default is to
/// record the negative balance as-is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NegativeBalancePolicy {
    #[default]
    Allow,
    /// Floor the debited account at zero. Breaks balance conservation.
    Clamp,
    /// Fail the event with [`LedgerError::NegativeBalance`].
    Reject,
}

impl fmt::Display for NegativeBalancePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NegativeBalancePolicy::Allow => "allow",
            NegativeBalancePolicy::Clamp => "clamp",
            NegativeBalancePolicy::Reject => "reject",
        })
    }
}

impl FromStr for NegativeBalancePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "allow" | "allow-negative" => Ok(NegativeBalancePolicy::Allow),
            "clamp" | "clamp-to-zero" => Ok(NegativeBalancePolicy::Clamp),
            "reject" | "panic" => Ok(NegativeBalancePolicy::Reject),
            other => Err(anyhow::anyhow!(
                "Invalid negative balance policy '{}', expected allow, clamp or reject",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: usize,
    pub duplicates: usize,
}

/// Folds token events into account balances and token-wide totals.
///
/// Events must arrive in chain order; totals are running sums and the
/// aggregator has no way to detect a reordered stream. Each event is applied
/// in its own transaction: the audit record and every aggregate write commit
/// together or not at all.
pub struct Aggregator {
    db: Database,
    policy: NegativeBalancePolicy,
}

impl Aggregator {
    pub fn new(db: Database, policy: NegativeBalancePolicy) -> Self {
        Self { db, policy }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn policy(&self) -> NegativeBalancePolicy {
        self.policy
    }

    pub fn handle_mint(
        &self,
        meta: EventMeta,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        self.apply(&TokenEvent::new(meta, LedgerEvent::Mint { to, amount }))
    }

    pub fn handle_burn(
        &self,
        meta: EventMeta,
        from: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        self.apply(&TokenEvent::new(meta, LedgerEvent::Burn { from, amount }))
    }

    pub fn handle_transfer(
        &self,
        meta: EventMeta,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        self.apply(&TokenEvent::new(meta, LedgerEvent::Transfer { from, to, amount }))
    }

    pub fn handle_ownership_transferred(
        &self,
        meta: EventMeta,
        previous_owner: Address,
        new_owner: Address,
    ) -> Result<(), LedgerError> {
        self.apply(&TokenEvent::new(
            meta,
            LedgerEvent::OwnershipTransferred {
                previous_owner,
                new_owner,
            },
        ))
    }

    pub fn handle_approval(
        &self,
        meta: EventMeta,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        self.apply(&TokenEvent::new(
            meta,
            LedgerEvent::Approval {
                owner,
                spender,
                amount,
            },
        ))
    }

    pub fn handle_proposal_created(
        &self,
        meta: EventMeta,
        proposal: ProposalCreated,
    ) -> Result<(), LedgerError> {
        self.apply(&TokenEvent::new(
            meta,
            LedgerEvent::ProposalCreated {
                proposal_id: proposal.proposalId,
                description: proposal.description,
                recipient: proposal.recipient,
                amount: proposal.amount,
                voting_deadline: proposal.votingDeadline,
                min_votes_to_pass: proposal.minVotesToPass,
            },
        ))
    }

    pub fn handle_proposal_executed(
        &self,
        meta: EventMeta,
        proposal_id: U256,
    ) -> Result<(), LedgerError> {
        self.apply(&TokenEvent::new(meta, LedgerEvent::ProposalExecuted { proposal_id }))
    }

    pub fn handle_voted(
        &self,
        meta: EventMeta,
        proposal_id: U256,
        voter: Address,
    ) -> Result<(), LedgerError> {
        self.apply(&TokenEvent::new(meta, LedgerEvent::Voted { proposal_id, voter }))
    }

    /// Apply one event atomically.
    pub fn apply(&self, event: &TokenEvent) -> Result<(), LedgerError> {
        // Dropping `tx` without commit rolls back every write below.
        let tx = self.db.conn.unchecked_transaction()?;

        if !RecordRepository::new(&tx).insert(event)? {
            return Err(LedgerError::DuplicateKey {
                kind: event.kind(),
                key: event.key(),
            });
        }

        self.apply_aggregates(&tx, &event.event)?;
        tx.commit()?;

        debug!(
            "Applied {} event {} at block {}",
            event.kind(),
            event.key(),
            event.meta.block_number
        );
        Ok(())
    }

    /// Apply events in the given order, skipping replays.
    ///
    /// Any error other than a duplicate stops the run; events before it stay applied.
    pub fn apply_all<'e, I>(&self, events: I) -> Result<ApplySummary, LedgerError>
    where
        I: IntoIterator<Item = &'e TokenEvent>,
    {
        let mut summary = ApplySummary::default();

        for event in events {
            match self.apply(event) {
                Ok(()) => summary.applied += 1,
                Err(e) if e.is_duplicate() => {
                    warn!("Skipping replayed event: {}", e);
                    summary.duplicates += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if summary.duplicates > 0 {
            info!(
                "Applied {} events, skipped {} duplicates",
                summary.applied, summary.duplicates
            );
        }
        Ok(summary)
    }

    pub fn account_balance(&self, address: &Address) -> Result<I256, LedgerError> {
        let account = AccountRepository::new(&self.db.conn).get_or_default(address)?;
        Ok(account.balance)
    }

    pub fn token_stats(&self) -> Result<TokenStats, LedgerError> {
        Ok(StatsRepository::new(&self.db.conn).get_or_default()?)
    }

    pub fn record(
        &self,
        kind: EventKind,
        key: &EventKey,
    ) -> Result<Option<EventRecord>, LedgerError> {
        Ok(RecordRepository::new(&self.db.conn).get(kind, key)?)
    }

    fn apply_aggregates(&self, conn: &Connection, event: &LedgerEvent) -> Result<(), LedgerError> {
        let accounts = AccountRepository::new(conn);
        let stats_repo = StatsRepository::new(conn);

        match event {
            LedgerEvent::Mint { to, amount } => {
                let delta = to_signed(*amount)?;
                self.credit(&accounts, to, delta)?;

                let mut stats = stats_repo.get_or_default()?;
                stats.total_supply = stats
                    .total_supply
                    .checked_add(delta)
                    .ok_or(LedgerError::Overflow("total supply"))?;
                stats.total_minted = stats
                    .total_minted
                    .checked_add(*amount)
                    .ok_or(LedgerError::Overflow("total minted"))?;
                stats_repo.save(&stats)?;
            }
            LedgerEvent::Burn { from, amount } => {
                let delta = to_signed(*amount)?;
                self.debit(&accounts, from, delta)?;

                let mut stats = stats_repo.get_or_default()?;
                stats.total_supply = stats
                    .total_supply
                    .checked_sub(delta)
                    .ok_or(LedgerError::Overflow("total supply"))?;
                stats.total_burned = stats
                    .total_burned
                    .checked_add(*amount)
                    .ok_or(LedgerError::Overflow("total burned"))?;
                stats_repo.save(&stats)?;
            }
            LedgerEvent::Transfer { from, to, amount } => {
                let delta = to_signed(*amount)?;
                if from == to {
                    // Moving tokens to oneself leaves the balance as it was.
                    accounts.save(&accounts.get_or_default(from)?)?;
                } else {
                    self.debit(&accounts, from, delta)?;
                    self.credit(&accounts, to, delta)?;
                }

                let mut stats = stats_repo.get_or_default()?;
                stats.total_transferred = stats
                    .total_transferred
                    .checked_add(*amount)
                    .ok_or(LedgerError::Overflow("total transferred"))?;
                stats_repo.save(&stats)?;
            }
            LedgerEvent::OwnershipTransferred { .. }
            | LedgerEvent::Approval { .. }
            | LedgerEvent::ProposalCreated { .. }
            | LedgerEvent::ProposalExecuted { .. }
            | LedgerEvent::Voted { .. } => {}
        }

        Ok(())
    }

    fn credit(
        &self,
        accounts: &AccountRepository,
        address: &Address,
        amount: I256,
    ) -> Result<(), LedgerError> {
        let mut account = accounts.get_or_default(address)?;
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow("account balance"))?;
        accounts.save(&account)?;
        Ok(())
    }

    fn debit(
        &self,
        accounts: &AccountRepository,
        address: &Address,
        amount: I256,
    ) -> Result<(), LedgerError> {
        let mut account = accounts.get_or_default(address)?;
        let balance = account
            .balance
            .checked_sub(amount)
            .ok_or(LedgerError::Overflow("account balance"))?;

        account.balance = if balance.is_negative() {
            match self.policy {
                NegativeBalancePolicy::Allow => {
                    debug!("Balance of {:?} went negative: {}", address, balance);
                    balance
                }
                NegativeBalancePolicy::Clamp => {
                    warn!("Clamping balance of {:?} from {} to zero", address, balance);
                    I256::ZERO
                }
                NegativeBalancePolicy::Reject => {
                    return Err(LedgerError::NegativeBalance {
                        address: *address,
                        balance,
                    });
                }
            }
        } else {
            balance
        };

        accounts.save(&account)?;
        Ok(())
    }
}

fn to_signed(amount: U256) -> Result<I256, LedgerError> {
    I256::try_from(amount).map_err(|_| LedgerError::Overflow("event amount"))
}
