use crate::aggregator::{Aggregator, ApplySummary};
use crate::config::Config;
use crate::events::{TokenEvent, decode_log, proposal_topics, sort_canonical, token_topics};
use crate::repository::SyncStateRepository;
use crate::rpc::RpcClient;
use alloy::rpc::types::Log;
use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use futures::{StreamExt, TryStreamExt, stream};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

const RATE_LIMIT_DELAY_MS: u64 = 200; // 5 requests per second
const TIMESTAMP_CONCURRENCY: usize = 8;

/// A contract and the event signatures read from it.
#[derive(Debug, Clone)]
struct Source {
    address: Address,
    topics: Vec<B256>,
}

/// Pulls token (and optionally proposal) logs from the chain and feeds them to
/// the aggregator in block order.
///
/// The scan cursor is kept under the token contract's address and covers every source.
pub struct Scanner {
    client: RpcClient,
    aggregator: Aggregator,
    contract_address: Address,
    sources: Vec<Source>,
    batch_size: u64,
    poll_interval: Duration,
    configured_start_block: Option<u64>,
}

impl Scanner {
    pub fn new(client: RpcClient, aggregator: Aggregator, config: &Config) -> Result<Self> {
        let contract_address = config.contract_address()?;

        let mut sources = vec![Source {
            address: contract_address,
            topics: token_topics(),
        }];
        if let Some(address) = config.proposal_contract_address {
            sources.push(Source {
                address,
                topics: proposal_topics(),
            });
        }

        Ok(Scanner {
            client,
            aggregator,
            contract_address,
            sources,
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
            configured_start_block: config.start_block,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut next_block = self.resume_block().await?;
        info!("Starting scan from block {}", next_block);

        loop {
            let loop_start = Instant::now();

            let latest_block = self.client.get_latest_block().await?;
            if next_block > latest_block {
                info!(
                    "Caught up to latest block {}. Polling every {}s...",
                    latest_block,
                    self.poll_interval.as_secs()
                );
                sleep(self.poll_interval).await;
                continue;
            }

            let to_block = (next_block + self.batch_size - 1).min(latest_block);
            self.process_range(next_block, to_block).await?;
            next_block = to_block + 1;

            let elapsed = loop_start.elapsed();
            let target = Duration::from_millis(RATE_LIMIT_DELAY_MS);
            if elapsed < target {
                sleep(target - elapsed).await;
            }
        }
    }

    /// Fetch, decode and apply every tracked event in `[from, to]`, then advance the cursor.
    pub async fn process_range(&self, from: u64, to: u64) -> Result<ApplySummary> {
        info!("Fetching logs for blocks {} to {}", from, to);

        let mut logs = Vec::new();
        for source in &self.sources {
            logs.extend(self.fetch_logs(source, from, to).await?);
        }
        info!("Received {} logs for blocks {} to {}", logs.len(), from, to);

        let timestamps = self.fetch_missing_timestamps(&logs).await?;
        let summary = self.apply_batch(&logs, &timestamps, to)?;

        info!(
            "Applied {} events ({} replays skipped), last processed block {}",
            summary.applied, summary.duplicates, to
        );
        Ok(summary)
    }

    /// Decode and apply one batch, then move the cursor to `to`.
    ///
    /// A log that cannot be decoded fails the whole batch before anything is
    /// applied, and the cursor stays where it was.
    fn apply_batch(
        &self,
        logs: &[Log],
        timestamps: &HashMap<u64, u64>,
        to: u64,
    ) -> Result<ApplySummary> {
        let events = decode_logs(logs, timestamps)?;
        let summary = self.aggregator.apply_all(&events)?;

        let sync = SyncStateRepository::new(&self.aggregator.database().conn);
        sync.update_last_processed_block(&self.contract_address, to)?;
        Ok(summary)
    }

    async fn fetch_logs(&self, source: &Source, from: u64, to: u64) -> Result<Vec<Log>> {
        match self
            .client
            .get_logs(from, to, source.address, &source.topics)
            .await
        {
            Ok(logs) => Ok(logs),
            Err(e) if format!("{e:#}").contains("429") => {
                warn!("Rate limited, waiting 1 second before retry...");
                sleep(Duration::from_secs(1)).await;
                self.client
                    .get_logs(from, to, source.address, &source.topics)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// First block still to scan: one past the stored cursor, else the start block.
    async fn resume_block(&self) -> Result<u64> {
        let sync = SyncStateRepository::new(&self.aggregator.database().conn);

        if let Some(state) = sync.get(&self.contract_address)? {
            info!(
                "Resuming {:?}: start block {}, last processed {:?}",
                self.contract_address, state.start_block, state.last_processed_block
            );
            return Ok(state
                .last_processed_block
                .map_or(state.start_block, |block| block + 1));
        }

        let start_block = match self.configured_start_block {
            Some(block) => block,
            None => {
                let latest_block = self.client.get_latest_block().await?;
                let mut earliest = latest_block;
                for source in &self.sources {
                    let deployed =
                        find_deployment_block(&self.client, source.address, latest_block).await?;
                    earliest = earliest.min(deployed);
                }
                earliest
            }
        };

        let state = sync.init(&self.contract_address, start_block)?;
        Ok(state.start_block)
    }

    async fn fetch_missing_timestamps(&self, logs: &[Log]) -> Result<HashMap<u64, u64>> {
        let missing: BTreeSet<u64> = logs
            .iter()
            .filter(|log| log.block_timestamp.is_none())
            .filter_map(|log| log.block_number)
            .collect();

        if missing.is_empty() {
            return Ok(HashMap::new());
        }

        let timestamps = stream::iter(missing)
            .map(|block| async move {
                let timestamp = self
                    .client
                    .get_block_timestamp(block)
                    .await
                    .with_context(|| format!("Failed to fetch timestamp of block {block}"))?;
                Ok::<_, anyhow::Error>((block, timestamp))
            })
            .buffer_unordered(TIMESTAMP_CONCURRENCY)
            .try_collect::<HashMap<_, _>>()
            .await?;

        Ok(timestamps)
    }
}

/// Decode logs into events in canonical order.
///
/// Logs dropped by a reorg and logs that are not ours (see [`decode_log`]) are
/// skipped. Any other decoding failure is returned.
pub fn decode_logs(logs: &[Log], timestamps: &HashMap<u64, u64>) -> Result<Vec<TokenEvent>> {
    let mut events = Vec::with_capacity(logs.len());

    for log in logs {
        if log.removed {
            warn!(
                "Ignoring removed log {:?}-{:?}",
                log.transaction_hash, log.log_index
            );
            continue;
        }

        let fallback = log
            .block_number
            .and_then(|block| timestamps.get(&block).copied());
        let decoded = decode_log(log, fallback).with_context(|| {
            format!(
                "Failed to decode log {:?}-{:?} in block {:?}",
                log.transaction_hash, log.log_index, log.block_number
            )
        })?;
        events.extend(decoded);
    }

    sort_canonical(&mut events);
    Ok(events)
}

/// Binary search for the first block at which `address` has code.
pub async fn find_deployment_block(
    client: &RpcClient,
    address: Address,
    latest_block: u64,
) -> Result<u64> {
    info!("Searching for deployment block of contract {:?}", address);

    let code = client.get_code_at_block(address, latest_block).await?;
    if code.is_empty() {
        anyhow::bail!("Address {:?} is not a deployed contract", address);
    }

    let (mut low, mut high) = (0u64, latest_block);
    while low < high {
        let mid = low + (high - low) / 2;
        if client.get_code_at_block(address, mid).await?.is_empty() {
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    info!("Contract {:?} deployed at block {}", address, low);
    Ok(low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::NegativeBalancePolicy;
    use crate::events::{LedgerEvent, TokensMinted, Transfer};
    use crate::repository::Database;
    use alloy::sol_types::SolEvent;
    use alloy_primitives::{I256, LogData, U256, address};

    const TOKEN: Address = address!("0x00000000000000000000000000000000000000ee");
    const PROPOSALS: Address = address!("0x00000000000000000000000000000000000000dd");
    const ALICE: Address = address!("0x00000000000000000000000000000000000000a1");
    const BOB: Address = address!("0x00000000000000000000000000000000000000b0");
    const TOKEN_VAR: (&str, &str) = (
        "TOKEN_CONTRACT_ADDRESS",
        "0x00000000000000000000000000000000000000ee",
    );

    fn log(data: LogData, block: u64, index: u64, timestamp: Option<u64>) -> Log {
        Log {
            inner: alloy_primitives::Log {
                address: TOKEN,
                data,
            },
            block_hash: None,
            block_number: Some(block),
            block_timestamp: timestamp,
            transaction_hash: Some(B256::with_last_byte(index as u8)),
            transaction_index: None,
            log_index: Some(index),
            removed: false,
        }
    }

    fn mint(amount: u64) -> LogData {
        TokensMinted {
            to: ALICE,
            amount: U256::from(amount),
        }
        .encode_log_data()
    }

    fn scanner(vars: &[(&str, &str)]) -> Scanner {
        let vars: HashMap<&str, &str> = vars.iter().copied().collect();
        let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        let client = RpcClient::new(&["http://localhost:8545".to_string()]).unwrap();
        let policy = NegativeBalancePolicy::Allow;
        let aggregator = Aggregator::new(Database::in_memory().unwrap(), policy);
        Scanner::new(client, aggregator, &config).unwrap()
    }

    #[test]
    fn decode_logs_orders_and_fills_timestamps() {
        let transfer = Transfer {
            from: ALICE,
            to: BOB,
            value: U256::from(40),
        }
        .encode_log_data();

        let logs = vec![log(transfer, 11, 0, None), log(mint(7), 10, 5, Some(500))];
        let timestamps = HashMap::from([(11, 1_100)]);

        let events = decode_logs(&logs, &timestamps).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].event, LedgerEvent::Mint { .. }));
        assert_eq!(events[0].meta.block_timestamp, 500);
        assert!(matches!(events[1].event, LedgerEvent::Transfer { .. }));
        assert_eq!(events[1].meta.block_timestamp, 1_100);
    }

    #[test]
    fn decode_logs_skips_removed_logs() {
        let mut removed = log(mint(1), 1, 0, Some(1));
        removed.removed = true;

        let events = decode_logs(&[removed], &HashMap::new()).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn decode_logs_fails_on_a_log_without_timestamp() {
        let untimed = log(mint(1), 2, 1, None);
        assert!(decode_logs(&[untimed], &HashMap::new()).is_err());
    }

    #[test]
    fn proposal_contract_is_an_extra_source() {
        let token_only = scanner(&[TOKEN_VAR]);
        assert_eq!(token_only.sources.len(), 1);

        let both = scanner(&[
            TOKEN_VAR,
            ("PROPOSAL_CONTRACT_ADDRESS", "0x00000000000000000000000000000000000000dd"),
        ]);
        let addresses: Vec<_> = both.sources.iter().map(|s| s.address).collect();
        assert_eq!(addresses, vec![TOKEN, PROPOSALS]);
        assert_eq!(both.sources[1].topics, proposal_topics());
    }

    #[test]
    fn malformed_log_fails_the_batch_and_keeps_the_cursor() -> Result<()> {
        let scanner = scanner(&[TOKEN_VAR]);
        let sync = SyncStateRepository::new(&scanner.aggregator.database().conn);
        sync.init(&TOKEN, 1)?;

        // A mint with its amount word missing.
        let truncated = LogData::new_unchecked(
            vec![TokensMinted::SIGNATURE_HASH, B256::with_last_byte(1)],
            Default::default(),
        );
        let logs = vec![
            log(mint(100), 5, 0, Some(50)),
            log(truncated, 6, 1, Some(60)),
        ];

        assert!(scanner.apply_batch(&logs, &HashMap::new(), 10).is_err());
        let state = sync.get(&TOKEN)?.context("sync state")?;
        assert_eq!(state.last_processed_block, None);
        let balance = scanner.aggregator.account_balance(&ALICE)?;
        assert_eq!(balance, I256::ZERO);

        let summary = scanner.apply_batch(&logs[..1], &HashMap::new(), 10)?;
        assert_eq!(summary.applied, 1);
        let state = sync.get(&TOKEN)?.context("sync state")?;
        assert_eq!(state.last_processed_block, Some(10));
        Ok(())
    }
}
