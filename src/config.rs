use crate::aggregator::NegativeBalancePolicy;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub json_rpc_urls: Vec<String>,
    pub token_contract_address: Option<Address>,
    pub proposal_contract_address: Option<Address>,
    pub database_url: String,
    pub start_block: Option<u64>,
    pub batch_size: u64,
    pub poll_interval: Duration,
    pub negative_balance_policy: NegativeBalancePolicy,
    pub token_decimals: u8,
}

impl Config {
    pub const DEFAULT_DATABASE_URL: &'static str = "sqlite:./ledger.db";
    // Most public RPCs allow up to 1k logs per request
    pub const DEFAULT_BATCH_SIZE: u64 = 1000;
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 12;
    pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;

    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let json_rpc_urls = lookup("JSON_RPC_URLS")
            .or_else(|| lookup("JSON_RPC_URL"))
            .map(|urls| {
                urls.split(',')
                    .map(|url| url.trim().to_string())
                    .filter(|url| !url.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let token_contract_address = parse_var(&lookup, "TOKEN_CONTRACT_ADDRESS")?;
        let proposal_contract_address = parse_var(&lookup, "PROPOSAL_CONTRACT_ADDRESS")?;

        let database_url = lookup("DATABASE_URL")
            .unwrap_or_else(|| Self::DEFAULT_DATABASE_URL.to_string());

        let start_block = parse_var(&lookup, "START_BLOCK")?;

        let batch_size = parse_var(&lookup, "BATCH_SIZE")?.unwrap_or(Self::DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            anyhow::bail!("BATCH_SIZE must be greater than zero");
        }

        let poll_secs =
            parse_var(&lookup, "POLL_INTERVAL_SECS")?.unwrap_or(Self::DEFAULT_POLL_INTERVAL_SECS);
        let poll_interval = Duration::from_secs(poll_secs);

        let negative_balance_policy =
            parse_var(&lookup, "NEGATIVE_BALANCE_POLICY")?.unwrap_or_default();

        let token_decimals =
            parse_var(&lookup, "TOKEN_DECIMALS")?.unwrap_or(Self::DEFAULT_TOKEN_DECIMALS);

        Ok(Config {
            json_rpc_urls,
            token_contract_address,
            proposal_contract_address,
            database_url,
            start_block,
            batch_size,
            poll_interval,
            negative_balance_policy,
            token_decimals,
        })
    }

    /// The indexed contract; required by the indexer but not by read-only tools.
    pub fn contract_address(&self) -> Result<Address> {
        self.token_contract_address
            .context("TOKEN_CONTRACT_ADDRESS must be set in .env")
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {} '{}': {}", key, raw, e)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert!(config.json_rpc_urls.is_empty());
        assert!(config.token_contract_address.is_none());
        assert!(config.proposal_contract_address.is_none());
        assert!(config.contract_address().is_err());
        assert_eq!(config.database_url, Config::DEFAULT_DATABASE_URL);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.poll_interval, Duration::from_secs(12));
        assert_eq!(config.negative_balance_policy, NegativeBalancePolicy::Allow);
        assert_eq!(config.token_decimals, 18);
    }

    #[test]
    fn parses_all_values() {
        let config = config(&[
            ("JSON_RPC_URLS", "https://a.example, https://b.example,"),
            ("TOKEN_CONTRACT_ADDRESS", "0x00000000000000000000000000000000000000ee"),
            ("PROPOSAL_CONTRACT_ADDRESS", "0x00000000000000000000000000000000000000dd"),
            ("START_BLOCK", "123"),
            ("BATCH_SIZE", "50"),
            ("NEGATIVE_BALANCE_POLICY", "reject"),
            ("TOKEN_DECIMALS", "6"),
        ])
        .unwrap();

        assert_eq!(config.json_rpc_urls, vec!["https://a.example", "https://b.example"]);
        assert!(config.contract_address().is_ok());
        assert!(config.proposal_contract_address.is_some());
        assert_eq!(config.start_block, Some(123));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.negative_balance_policy, NegativeBalancePolicy::Reject);
        assert_eq!(config.token_decimals, 6);
    }

    #[test]
    fn single_url_variable_is_accepted() {
        let config = config(&[("JSON_RPC_URL", "https://only.example")]).unwrap();
        assert_eq!(config.json_rpc_urls, vec!["https://only.example"]);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(config(&[("TOKEN_CONTRACT_ADDRESS", "0x1234")]).is_err());
        assert!(config(&[("BATCH_SIZE", "0")]).is_err());
        assert!(config(&[("NEGATIVE_BALANCE_POLICY", "ignore")]).is_err());
    }
}
