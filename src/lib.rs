pub mod aggregator;
pub mod config;
pub mod error;
pub mod events;
pub mod query;
pub mod repository;
pub mod rpc;
pub mod scanner;

pub use aggregator::{Aggregator, ApplySummary, NegativeBalancePolicy};
pub use error::LedgerError;
pub use events::{EventKey, EventKind, EventMeta, LedgerEvent, TokenEvent};
