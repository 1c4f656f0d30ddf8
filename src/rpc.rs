use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log};
use alloy::transports::TransportResult;
use alloy_primitives::{Address, B256, Bytes};
use anyhow::{Context, Result};
use regex::Regex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_ATTEMPTS: usize = 5;
const MAX_RESULTS_ERROR: &str = "exceeds max results";

#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error("request timed out after {}s", REQUEST_TIMEOUT.as_secs())]
    Timeout,
    #[error("{0}")]
    Node(String),
    /// The node refused the log range as too large. Retrying the same range cannot help.
    #[error("{message}")]
    TooManyResults {
        message: String,
        suggested_to: Option<u64>,
    },
}

impl RequestError {
    fn is_retryable(&self) -> bool {
        !matches!(self, RequestError::TooManyResults { .. })
    }
}

struct Endpoint {
    url: String,
    provider: DynProvider,
}

/// JSON-RPC access to the chain over one or more HTTP endpoints.
///
/// Every request is bounded by a timeout and retried with jittered backoff.
/// A failed attempt moves all later requests to the next endpoint.
#[derive(Clone)]
pub struct RpcClient {
    endpoints: Arc<[Endpoint]>,
    active: Arc<AtomicUsize>,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String]) -> Result<Self> {
        if rpc_urls.is_empty() {
            anyhow::bail!("At least one RPC URL must be provided in JSON_RPC_URLS");
        }

        let endpoints = rpc_urls
            .iter()
            .map(|url| {
                let parsed = url
                    .parse()
                    .with_context(|| format!("Invalid RPC URL: {url}"))?;
                Ok(Endpoint {
                    url: url.clone(),
                    provider: ProviderBuilder::new().connect_http(parsed).erased(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RpcClient {
            endpoints: endpoints.into(),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn active_index(&self) -> usize {
        self.active.load(Ordering::Relaxed) % self.endpoints.len()
    }

    fn current_url(&self) -> &str {
        &self.endpoints[self.active_index()].url
    }

    /// Record a failed attempt on endpoint `index` and move on from it.
    ///
    /// Concurrent requests that failed on the same endpoint rotate only once.
    fn fail(&self, index: usize, error: RequestError) -> RequestError {
        warn!("RPC error on {}: {}", self.endpoints[index].url, error);

        let next = (index + 1) % self.endpoints.len();
        if next != index
            && self
                .active
                .compare_exchange(index, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            debug!("Switched to RPC endpoint {}", self.endpoints[next].url);
        }
        error
    }

    async fn request<T, F, Fut>(&self, call: F) -> Result<T, RequestError>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let backoff = ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(MAX_ATTEMPTS);

        let attempt = || {
            let index = self.active_index();
            let pending = call(self.endpoints[index].provider.clone());
            async move {
                match timeout(REQUEST_TIMEOUT, pending).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => {
                        let message = e.to_string();
                        if message.contains(MAX_RESULTS_ERROR) {
                            let suggested_to = suggested_split(&message);
                            Err(RequestError::TooManyResults {
                                message,
                                suggested_to,
                            })
                        } else {
                            Err(self.fail(index, RequestError::Node(message)))
                        }
                    }
                    Err(_) => Err(self.fail(index, RequestError::Timeout)),
                }
            }
        };

        RetryIf::spawn(backoff, attempt, RequestError::is_retryable).await
    }

    pub async fn get_latest_block(&self) -> Result<u64> {
        let block = self
            .request(|provider| async move { provider.get_block_number().await })
            .await?;
        Ok(block)
    }

    pub async fn get_code_at_block(&self, address: Address, block_number: u64) -> Result<Bytes> {
        let code = self
            .request(|provider| async move {
                provider
                    .get_code_at(address)
                    .block_id(BlockNumberOrTag::Number(block_number).into())
                    .await
            })
            .await?;
        Ok(code)
    }

    /// Timestamp (seconds since epoch) of a block, for logs that arrive without one.
    pub async fn get_block_timestamp(&self, block_number: u64) -> Result<u64> {
        let block = self
            .request(|provider| async move {
                provider
                    .get_block_by_number(BlockNumberOrTag::Number(block_number))
                    .await
            })
            .await?
            .with_context(|| format!("Block {block_number} not found on {}", self.current_url()))?;
        Ok(block.header.timestamp)
    }

    /// All logs emitted by `address` with a topic0 in `topics`, over `[from_block, to_block]`.
    ///
    /// When the node caps the result size, the window shrinks to the block it
    /// suggests (or to half its width) and the walk continues from there.
    pub async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: Address,
        topics: &[B256],
    ) -> Result<Vec<Log>> {
        let mut logs = Vec::new();
        let (mut from, mut to) = (from_block, to_block);

        while from <= to_block {
            let filter = Filter::new()
                .address(address)
                .event_signature(topics.to_vec())
                .from_block(from)
                .to_block(to);

            match self
                .request(|provider| {
                    let filter = filter.clone();
                    async move { provider.get_logs(&filter).await }
                })
                .await
            {
                Ok(batch) => {
                    logs.extend(batch);
                    from = to + 1;
                    to = to_block;
                }
                Err(RequestError::TooManyResults { suggested_to, .. }) if to > from => {
                    let split = suggested_to
                        .filter(|split| (from..to).contains(split))
                        .unwrap_or(from + (to - from) / 2);
                    info!(
                        "Hit max results limit for blocks {}-{}, narrowing to {}-{}",
                        from, to, from, split
                    );
                    to = split;
                }
                Err(e) => return Err(e).context(format!("eth_getLogs {from}-{to} failed")),
            }
        }

        Ok(logs)
    }
}

/// End block of the range a node suggests in a "retry with the range A-B" error.
fn suggested_split(error: &str) -> Option<u64> {
    let re = Regex::new(r"retry with the range \d+-(\d+)").ok()?;
    re.captures(error)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RpcClient {
        RpcClient::new(&[
            "http://localhost:8545".to_string(),
            "http://localhost:8546".to_string(),
        ])
        .unwrap()
    }

    #[test]
    fn parses_suggested_split() {
        let error = "query exceeds max results 10000, retry with the range 100-250";
        assert_eq!(suggested_split(error), Some(250));
        assert_eq!(suggested_split("rate limited"), None);
    }

    #[test]
    fn requires_a_valid_endpoint() {
        assert!(RpcClient::new(&[]).is_err());
        assert!(RpcClient::new(&["not a url".to_string()]).is_err());
    }

    #[test]
    fn failures_on_one_endpoint_rotate_once() {
        let client = client();
        assert_eq!(client.current_url(), "http://localhost:8545");

        client.fail(0, RequestError::Timeout);
        assert_eq!(client.current_url(), "http://localhost:8546");

        // A second, late failure from the old endpoint must not skip ahead again.
        client.fail(0, RequestError::Node("boom".to_string()));
        assert_eq!(client.current_url(), "http://localhost:8546");

        client.fail(1, RequestError::Timeout);
        assert_eq!(client.current_url(), "http://localhost:8545");
    }

    #[test]
    fn capped_ranges_are_not_retried() {
        let capped = RequestError::TooManyResults {
            message: "exceeds max results".to_string(),
            suggested_to: None,
        };
        assert!(!capped.is_retryable());
        assert!(RequestError::Timeout.is_retryable());
    }
}
