pub mod account_repository;
pub mod database;
pub mod models;
pub mod record_repository;
pub mod stats_repository;
pub mod sync_state_repository;

pub use account_repository::AccountRepository;
pub use database::Database;
pub use models::{Account, EventRecord, RecordCounts, SyncState, TokenStats};
pub use record_repository::RecordRepository;
pub use stats_repository::StatsRepository;
pub use sync_state_repository::SyncStateRepository;
