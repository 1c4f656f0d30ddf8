use anyhow::Result;
use clap::{Parser, Subcommand};
use token_ledger::config::Config;
use token_ledger::events::EventKind;
use token_ledger::query::commands::{
    RecordQuery, cmd_balance, cmd_record, cmd_records, cmd_stats, cmd_top_holders,
};
use token_ledger::query::formatters::OutputFormat;
use token_ledger::repository::{
    AccountRepository, Database, RecordRepository, StatsRepository, SyncStateRepository,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "query")]
#[command(about = "Query indexed token balances, supply and event records", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Balance of one account
    Balance { address: String },
    /// Supply totals, account and record counts
    Stats,
    /// Accounts with the largest positive balances
    TopHolders {
        #[arg(default_value = "10")]
        count: usize,
    },
    /// List records of one kind: mint, burn, transfer, ownership, approval, proposal,
    /// execution, vote
    Records {
        kind: EventKind,

        #[arg(long)]
        address: Option<String>,

        #[arg(long, default_value = "100")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Look up a single record by transaction hash and log index
    Record {
        transaction_hash: String,
        log_index: u64,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    let config = Config::from_env()?;
    let decimals = config.token_decimals;

    let db = Database::new(&config.database_url)?;
    let account_repo = AccountRepository::new(&db.conn);
    let record_repo = RecordRepository::new(&db.conn);

    let output = match cli.command {
        Commands::Balance { address } => cmd_balance(&account_repo, &address, decimals, format)?,
        Commands::Stats => cmd_stats(
            &account_repo,
            &StatsRepository::new(&db.conn),
            &record_repo,
            &SyncStateRepository::new(&db.conn),
            config.token_contract_address.as_ref(),
            decimals,
            format,
        )?,
        Commands::TopHolders { count } => cmd_top_holders(&account_repo, count, decimals, format)?,
        Commands::Records {
            kind,
            address,
            limit,
            offset,
        } => cmd_records(
            &record_repo,
            RecordQuery {
                kind,
                address,
                limit,
                offset,
            },
            decimals,
            format,
        )?,
        Commands::Record {
            transaction_hash,
            log_index,
        } => cmd_record(&record_repo, &transaction_hash, log_index, decimals, format)?,
    };

    println!("{output}");
    Ok(())
}
