use crate::events::{EventKey, EventKind};
use crate::query::formatters::{
    LedgerSummary, OutputFormat, format_balance, format_records, format_stats, format_top_holders,
};
use crate::repository::{AccountRepository, RecordRepository, StatsRepository, SyncStateRepository};
use alloy_primitives::{Address, B256};
use anyhow::Result;
use std::str::FromStr;

fn parse_address(address: &str) -> Result<Address> {
    Address::from_str(address).map_err(|_| anyhow::anyhow!("Invalid address format: {}", address))
}

pub fn cmd_balance(
    account_repo: &AccountRepository,
    address: &str,
    decimals: u8,
    format: OutputFormat,
) -> Result<String> {
    let address = parse_address(address)?;
    let account = account_repo.get_or_default(&address)?;
    Ok(format_balance(&account, decimals, format))
}

pub fn cmd_top_holders(
    account_repo: &AccountRepository,
    count: usize,
    decimals: u8,
    format: OutputFormat,
) -> Result<String> {
    let holders = account_repo.top_holders(count)?;
    Ok(format_top_holders(&holders, decimals, format))
}

pub fn cmd_stats(
    account_repo: &AccountRepository,
    stats_repo: &StatsRepository,
    record_repo: &RecordRepository,
    sync_repo: &SyncStateRepository,
    contract_address: Option<&Address>,
    decimals: u8,
    format: OutputFormat,
) -> Result<String> {
    let last_processed_block = match contract_address {
        Some(address) => sync_repo
            .get(address)?
            .and_then(|state| state.last_processed_block),
        None => None,
    };

    let summary = LedgerSummary {
        stats: stats_repo.get_or_default()?,
        accounts: account_repo.count()?,
        negative_accounts: account_repo.count_negative()?,
        records: record_repo.counts()?,
        last_processed_block,
    };
    Ok(format_stats(&summary, decimals, format))
}

#[derive(Debug, Clone)]
pub struct RecordQuery {
    pub kind: EventKind,
    pub address: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

pub fn cmd_records(
    record_repo: &RecordRepository,
    query: RecordQuery,
    decimals: u8,
    format: OutputFormat,
) -> Result<String> {
    let address = query.address.as_deref().map(parse_address).transpose()?;
    let records = record_repo.list(query.kind, address.as_ref(), query.limit, query.offset)?;
    Ok(format_records(&records, decimals, format))
}

pub fn cmd_record(
    record_repo: &RecordRepository,
    transaction_hash: &str,
    log_index: u64,
    decimals: u8,
    format: OutputFormat,
) -> Result<String> {
    let transaction_hash = B256::from_str(transaction_hash)
        .map_err(|_| anyhow::anyhow!("Invalid transaction hash: {}", transaction_hash))?;
    let key = EventKey {
        transaction_hash,
        log_index,
    };

    match record_repo.find(&key)? {
        Some(record) => Ok(format_records(&[record], decimals, format)),
        None => Err(anyhow::anyhow!("No record found for {}", key)),
    }
}
