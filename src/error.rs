use thiserror::Error;

use crate::provider::ProviderId;

/// Error taxonomy for the indexer.
///
/// Every failure surfaced by the core falls into one of five categories, each
/// carrying a human-readable message. RPC failures additionally carry the
/// identifier of the provider that produced them, when one is known.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC error: {message}")]
    Rpc {
        message: String,
        provider_id: Option<ProviderId>,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("File system error: {0}")]
    FileSystem(String),
}

impl IndexerError {
    pub fn config(message: impl Into<String>) -> Self {
        IndexerError::Config(message.into())
    }

    /// An RPC failure not attributable to a specific provider.
    pub fn rpc(message: impl Into<String>) -> Self {
        IndexerError::Rpc { message: message.into(), provider_id: None }
    }

    /// An RPC failure attributed to the given provider.
    pub fn rpc_for(provider_id: &ProviderId, message: impl Into<String>) -> Self {
        IndexerError::Rpc { message: message.into(), provider_id: Some(provider_id.clone()) }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        IndexerError::Storage(message.into())
    }

    pub fn abi(message: impl Into<String>) -> Self {
        IndexerError::Abi(message.into())
    }

    pub fn file_system(message: impl Into<String>) -> Self {
        IndexerError::FileSystem(message.into())
    }

    /// Process exit code for the CLI: 1 configuration, 2 RPC, 3 storage.
    ///
    /// ABI failures exit with the RPC code (an upstream service failed) and
    /// file-system failures with the storage code (persistence failed).
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            IndexerError::Config(_) => 1,
            IndexerError::Rpc { .. } | IndexerError::Abi(_) => 2,
            IndexerError::Storage(_) | IndexerError::FileSystem(_) => 3,
        }
    }
}

impl From<sqlx::Error> for IndexerError {
    fn from(error: sqlx::Error) -> Self {
        IndexerError::Storage(error.to_string())
    }
}

impl From<serde_yaml::Error> for IndexerError {
    fn from(error: serde_yaml::Error) -> Self {
        IndexerError::Config(error.to_string())
    }
}
