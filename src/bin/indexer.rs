use anyhow::Result;
use token_ledger::aggregator::Aggregator;
use token_ledger::config::Config;
use token_ledger::repository::Database;
use token_ledger::rpc::RpcClient;
use token_ledger::scanner::Scanner;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting token ledger indexer");

    let config = Config::from_env()?;
    let contract_address = config.contract_address()?;
    info!("Configuration loaded");
    info!("Contract address: {:?}", contract_address);
    if let Some(address) = config.proposal_contract_address {
        info!("Proposal contract address: {:?}", address);
    }
    info!(
        "RPC URLs: {} endpoint(s) configured",
        config.json_rpc_urls.len()
    );
    info!(
        "Negative balance policy: {}",
        config.negative_balance_policy
    );

    let db = Database::new(&config.database_url)?;
    info!("Database initialized at {}", config.database_url);

    let aggregator = Aggregator::new(db, config.negative_balance_policy);

    let client = RpcClient::new(&config.json_rpc_urls)?;
    info!("RPC client connected");

    let mut scanner = Scanner::new(client, aggregator, &config)?;

    if let Err(e) = scanner.run().await {
        error!("Scanner error: {:#}", e);
        return Err(e);
    }

    Ok(())
}
