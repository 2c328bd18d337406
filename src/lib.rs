pub mod abi;
pub mod config;
pub mod fetcher;
pub mod indexer;
pub mod provider;
pub mod storage;

mod error;
mod types;

pub use config::{Config, load_config, load_config_from_str};
pub use error::IndexerError;
pub use indexer::{ContractStatus, Indexer};
pub use types::{Chain, DecodedEvent, SyncState};
