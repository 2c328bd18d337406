use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::IndexerError;

/// Largest integer JSON consumers can represent losslessly (2^53 - 1).
///
/// Decoded integers wider than this are serialized as decimal strings, and
/// it doubles as the implied row limit when a query supplies an offset
/// without a limit.
pub(crate) const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

/// A single decoded contract event, the canonical unit of indexer output.
///
/// The pair `(transaction_hash, log_index)` is globally unique and is the
/// storage layer's deduplication key. `payload` maps parameter names to
/// JSON values in ABI declaration order; integers wider than 53 bits are
/// rendered as decimal strings and byte blobs as `0x`-prefixed hex.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Emitting contract, lowercase hex.
    pub contract_address: String,
    pub block_number: u64,
    /// Unix seconds. Zero until the fetcher resolves the block header.
    pub block_timestamp: u64,
    pub transaction_hash: String,
    pub log_index: u64,
    pub event_name: String,
    pub payload: Map<String, Value>,
}

/// Per-contract indexing progress, one row per contract address.
///
/// After any successful commit, every persisted event for the contract has
/// `block_number <= last_block`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub contract_address: String,
    pub chain_id: u64,
    pub last_block: u64,
    /// Wall-clock Unix seconds of the last commit.
    pub last_sync: u64,
    pub status: String,
}

/// The chains the indexer knows how to serve.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Optimism,
    Bsc,
    Polygon,
    Base,
    Arbitrum,
}

impl Chain {
    #[must_use]
    pub const fn id(self) -> u64 {
        match self {
            Chain::Ethereum => 1,
            Chain::Optimism => 10,
            Chain::Bsc => 56,
            Chain::Polygon => 137,
            Chain::Base => 8453,
            Chain::Arbitrum => 42161,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Optimism => "optimism",
            Chain::Bsc => "bsc",
            Chain::Polygon => "polygon",
            Chain::Base => "base",
            Chain::Arbitrum => "arbitrum",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Chain {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ethereum" => Ok(Chain::Ethereum),
            "optimism" => Ok(Chain::Optimism),
            "bsc" => Ok(Chain::Bsc),
            "polygon" => Ok(Chain::Polygon),
            "base" => Ok(Chain::Base),
            "arbitrum" => Ok(Chain::Arbitrum),
            other => Err(IndexerError::config(format!("unknown chain: {other}"))),
        }
    }
}
