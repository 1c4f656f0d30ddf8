use crate::events::LedgerEvent;
use crate::repository::{Account, EventRecord, RecordCounts, TokenStats};
use alloy_primitives::U256;
use alloy_primitives::utils::{ParseUnits, format_units};
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

/// Human-readable amount; falls back to the raw integer if `decimals` is out of range.
pub fn format_amount<T>(value: T, decimals: u8) -> String
where
    T: Into<ParseUnits> + Copy + ToString,
{
    format_units(value, decimals).unwrap_or_else(|_| value.to_string())
}

/// Flat view of any record kind, shared by all three output formats.
#[derive(Debug, Serialize)]
struct RecordRow {
    kind: &'static str,
    block_number: u64,
    block_timestamp: u64,
    transaction_hash: String,
    log_index: u64,
    from: Option<String>,
    to: Option<String>,
    amount: Option<String>,
    amount_raw: Option<String>,
    proposal_id: Option<String>,
    description: Option<String>,
    voting_deadline: Option<String>,
    min_votes_to_pass: Option<String>,
}

impl RecordRow {
    fn new(record: &EventRecord, decimals: u8) -> Self {
        let mut row = RecordRow {
            kind: record.kind().as_str(),
            block_number: record.meta.block_number,
            block_timestamp: record.meta.block_timestamp,
            transaction_hash: format!("{:?}", record.meta.transaction_hash),
            log_index: record.meta.log_index,
            from: None,
            to: None,
            amount: None,
            amount_raw: None,
            proposal_id: None,
            description: None,
            voting_deadline: None,
            min_votes_to_pass: None,
        };

        match &record.event {
            LedgerEvent::Mint { to, amount } => {
                row.to = Some(format!("{to:?}"));
                row.set_amount(*amount, decimals);
            }
            LedgerEvent::Burn { from, amount } => {
                row.from = Some(format!("{from:?}"));
                row.set_amount(*amount, decimals);
            }
            LedgerEvent::Transfer { from, to, amount } => {
                row.from = Some(format!("{from:?}"));
                row.to = Some(format!("{to:?}"));
                row.set_amount(*amount, decimals);
            }
            LedgerEvent::OwnershipTransferred {
                previous_owner,
                new_owner,
            } => {
                row.from = Some(format!("{previous_owner:?}"));
                row.to = Some(format!("{new_owner:?}"));
            }
            LedgerEvent::Approval {
                owner,
                spender,
                amount,
            } => {
                row.from = Some(format!("{owner:?}"));
                row.to = Some(format!("{spender:?}"));
                row.set_amount(*amount, decimals);
            }
            LedgerEvent::ProposalCreated {
                proposal_id,
                description,
                recipient,
                amount,
                voting_deadline,
                min_votes_to_pass,
            } => {
                row.proposal_id = Some(proposal_id.to_string());
                row.description = Some(description.clone());
                row.to = Some(format!("{recipient:?}"));
                row.set_amount(*amount, decimals);
                row.voting_deadline = Some(voting_deadline.to_string());
                row.min_votes_to_pass = Some(min_votes_to_pass.to_string());
            }
            LedgerEvent::ProposalExecuted { proposal_id } => {
                row.proposal_id = Some(proposal_id.to_string());
            }
            LedgerEvent::Voted { proposal_id, voter } => {
                row.proposal_id = Some(proposal_id.to_string());
                row.from = Some(format!("{voter:?}"));
            }
        }

        row
    }

    fn set_amount(&mut self, amount: U256, decimals: u8) {
        self.amount = Some(format_amount(amount, decimals));
        self.amount_raw = Some(amount.to_string());
    }
}

pub fn format_records(records: &[EventRecord], decimals: u8, format: OutputFormat) -> String {
    let rows: Vec<RecordRow> = records
        .iter()
        .map(|r| RecordRow::new(r, decimals))
        .collect();

    match format {
        OutputFormat::Table => format_records_table(&rows),
        OutputFormat::Json => {
            serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            for row in &rows {
                let _ = wtr.serialize(row);
            }
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}

fn format_records_table(rows: &[RecordRow]) -> String {
    if rows.is_empty() {
        return "No records found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            "Kind",
            "Block",
            "Timestamp",
            "From",
            "To",
            "Amount",
            "Proposal",
            "Tx Hash",
            "Log",
        ]);

    let dash = || "-".to_string();
    for row in rows {
        table.add_row(vec![
            Cell::new(row.kind),
            Cell::new(row.block_number),
            Cell::new(row.block_timestamp),
            Cell::new(row.from.clone().unwrap_or_else(dash)),
            Cell::new(row.to.clone().unwrap_or_else(dash)),
            Cell::new(row.amount.clone().unwrap_or_else(dash)),
            Cell::new(row.proposal_id.clone().unwrap_or_else(dash)),
            Cell::new(format_tx_hash(&row.transaction_hash)),
            Cell::new(row.log_index),
        ]);
    }

    table.to_string()
}

pub fn format_balance(account: &Account, decimals: u8, format: OutputFormat) -> String {
    let formatted = format_amount(account.balance, decimals);
    let raw = account.balance.to_string();
    let address = format!("{:?}", account.address);

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Address", "Balance", "Balance (Raw)"]);
            table.add_row(vec![
                Cell::new(address),
                Cell::new(formatted),
                Cell::new(raw),
            ]);
            table.to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(&json!({
            "address": address,
            "balance": formatted,
            "balance_raw": raw,
        }))
        .unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["address", "balance", "balance_raw"]);
            let _ = wtr.write_record([&address, &formatted, &raw]);
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}

pub fn format_top_holders(holders: &[Account], decimals: u8, format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if holders.is_empty() {
                return "No holders found.".to_string();
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Rank", "Address", "Balance", "Balance (Raw)"]);

            for (i, holder) in holders.iter().enumerate() {
                table.add_row(vec![
                    Cell::new(i + 1),
                    Cell::new(format!("{:#}", holder.address)),
                    Cell::new(format_amount(holder.balance, decimals)),
                    Cell::new(holder.balance.to_string()),
                ]);
            }

            table.to_string()
        }
        OutputFormat::Json => {
            let json_holders: Vec<_> = holders
                .iter()
                .enumerate()
                .map(|(i, holder)| {
                    json!({
                        "rank": i + 1,
                        "address": format!("{:?}", holder.address),
                        "balance": format_amount(holder.balance, decimals),
                        "balance_raw": holder.balance.to_string(),
                    })
                })
                .collect();
            serde_json::to_string_pretty(&json_holders).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["rank", "address", "balance", "balance_raw"]);
            for (i, holder) in holders.iter().enumerate() {
                let _ = wtr.write_record([
                    &(i + 1).to_string(),
                    &format!("{:?}", holder.address),
                    &format_amount(holder.balance, decimals),
                    &holder.balance.to_string(),
                ]);
            }
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}

/// Everything the `stats` command reports.
#[derive(Debug, Clone)]
pub struct LedgerSummary {
    pub stats: TokenStats,
    pub accounts: u64,
    pub negative_accounts: u64,
    pub records: RecordCounts,
    pub last_processed_block: Option<u64>,
}

pub fn format_stats(summary: &LedgerSummary, decimals: u8, format: OutputFormat) -> String {
    let stats = &summary.stats;
    let last_block = summary
        .last_processed_block
        .map_or("N/A".to_string(), |b| b.to_string());

    let count = |metric: &'static str, value: u64| (metric, value.to_string(), String::new());
    let records = &summary.records;

    let rows: Vec<(&str, String, String)> = vec![
        (
            "total_supply",
            format_amount(stats.total_supply, decimals),
            stats.total_supply.to_string(),
        ),
        (
            "total_minted",
            format_amount(stats.total_minted, decimals),
            stats.total_minted.to_string(),
        ),
        (
            "total_burned",
            format_amount(stats.total_burned, decimals),
            stats.total_burned.to_string(),
        ),
        (
            "total_transferred",
            format_amount(stats.total_transferred, decimals),
            stats.total_transferred.to_string(),
        ),
        (
            "supply_consistent",
            stats.is_consistent().to_string(),
            String::new(),
        ),
        count("accounts", summary.accounts),
        count("negative_accounts", summary.negative_accounts),
        count("mints", records.mints),
        count("burns", records.burns),
        count("transfers", records.transfers),
        count("ownership_transfers", records.ownership_transfers),
        count("approvals", records.approvals),
        count("proposals", records.proposals),
        count("executions", records.executions),
        count("votes", records.votes),
        ("last_processed_block", last_block, String::new()),
    ];

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Metric", "Value", "Raw"]);
            for (metric, value, raw) in &rows {
                table.add_row(vec![Cell::new(metric), Cell::new(value), Cell::new(raw)]);
            }
            table.to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(&json!({
            "total_supply": format_amount(stats.total_supply, decimals),
            "total_supply_raw": stats.total_supply.to_string(),
            "total_minted": format_amount(stats.total_minted, decimals),
            "total_minted_raw": stats.total_minted.to_string(),
            "total_burned": format_amount(stats.total_burned, decimals),
            "total_burned_raw": stats.total_burned.to_string(),
            "total_transferred": format_amount(stats.total_transferred, decimals),
            "total_transferred_raw": stats.total_transferred.to_string(),
            "supply_consistent": stats.is_consistent(),
            "accounts": summary.accounts,
            "negative_accounts": summary.negative_accounts,
            "records": {
                "mints": records.mints,
                "burns": records.burns,
                "transfers": records.transfers,
                "ownership_transfers": records.ownership_transfers,
                "approvals": records.approvals,
                "proposals": records.proposals,
                "executions": records.executions,
                "votes": records.votes,
            },
            "last_processed_block": summary.last_processed_block,
        }))
        .unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["metric", "value", "raw"]);
            for (metric, value, raw) in &rows {
                let _ = wtr.write_record([*metric, value.as_str(), raw.as_str()]);
            }
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}

fn format_tx_hash(hash: &str) -> String {
    if hash.len() <= 10 {
        return hash.to_string();
    }
    format!("{}...{}", &hash[..6], &hash[hash.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventMeta;
    use alloy_primitives::{Address, B256, I256, address};

    const HOLDER: Address = address!("0x0000000000000000000000000000000000000011");

    #[test]
    fn signed_amounts_keep_their_sign() {
        let balance = I256::try_from(-1_500_000_000_000_000_000i128).unwrap();
        assert_eq!(format_amount(balance, 18), "-1.500000000000000000");
        assert_eq!(format_amount(U256::from(25), 1), "2.5");
    }

    #[test]
    fn output_format_defaults_to_table() {
        assert_eq!(OutputFormat::from("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from("csv"), OutputFormat::Csv);
        assert_eq!(OutputFormat::from("anything"), OutputFormat::Table);
    }

    #[test]
    fn records_render_as_csv_rows() {
        let record = EventRecord::new(
            EventMeta {
                transaction_hash: B256::ZERO,
                log_index: 2,
                block_number: 7,
                block_timestamp: 99,
            },
            LedgerEvent::Mint {
                to: HOLDER,
                amount: U256::from(50),
            },
        );

        let csv = format_records(&[record], 1, OutputFormat::Csv);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "kind,block_number,block_timestamp,transaction_hash,log_index,from,to,amount,\
             amount_raw,proposal_id,description,voting_deadline,min_votes_to_pass"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("mint,7,99,"));
        assert!(row.ends_with(",2,,0x0000000000000000000000000000000000000011,5.0,50,,,,"));
    }

    #[test]
    fn proposals_render_their_terms() {
        let meta = EventMeta {
            transaction_hash: B256::ZERO,
            log_index: 0,
            block_number: 8,
            block_timestamp: 100,
        };
        let created = EventRecord::new(
            meta,
            LedgerEvent::ProposalCreated {
                proposal_id: U256::from(3),
                description: "grant".to_string(),
                recipient: HOLDER,
                amount: U256::from(20),
                voting_deadline: U256::from(500),
                min_votes_to_pass: U256::from(2),
            },
        );
        let vote = EventRecord::new(
            meta,
            LedgerEvent::Voted {
                proposal_id: U256::from(3),
                voter: HOLDER,
            },
        );

        let out = format_records(&[created, vote], 1, OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value[0]["kind"], "proposal");
        assert_eq!(value[0]["description"], "grant");
        assert_eq!(value[0]["amount"], "2.0");
        assert_eq!(value[0]["min_votes_to_pass"], "2");
        assert_eq!(value[1]["kind"], "vote");
        assert_eq!(value[1]["proposal_id"], "3");
        assert_eq!(value[1]["amount"], serde_json::Value::Null);
    }

    #[test]
    fn empty_tables_have_a_message() {
        assert_eq!(
            format_records(&[], 18, OutputFormat::Table),
            "No records found."
        );
        assert_eq!(
            format_top_holders(&[], 18, OutputFormat::Table),
            "No holders found."
        );
    }

    #[test]
    fn short_hashes_are_not_truncated() {
        assert_eq!(format_tx_hash("0x12"), "0x12");
        assert_eq!(
            format_tx_hash(&format!("{:?}", B256::ZERO)),
            "0x0000...0000"
        );
    }
}
