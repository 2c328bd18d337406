//! ABI acquisition, durable caching, and event decoding.
//!
//! [`AbiRegistry`] turns a `(chain id, contract address)` pair into an
//! [`EventDecoder`]. Resolution order: an operator-supplied manual file,
//! then the on-disk cache at `<cache>/<chainId>/<address>.json`, then the
//! chain's explorer API. Whatever source wins, the raw ABI is persisted
//! into the cache for future runs; entries have no TTL.

mod decoder;
mod explorer;

pub use decoder::EventDecoder;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::IndexerError;
use explorer::ExplorerClient;

pub struct AbiRegistry {
    cache_dir: PathBuf,
    explorer: ExplorerClient,
}

impl AbiRegistry {
    /// # Errors
    ///
    /// Returns an `Abi` error if the HTTP client cannot be constructed.
    pub fn new(
        cache_dir: PathBuf,
        api_key: Option<String>,
        max_retries: usize,
    ) -> Result<Self, IndexerError> {
        Ok(Self { cache_dir, explorer: ExplorerClient::new(api_key, max_retries)? })
    }

    /// Default cache location, `$HOME/.chaintap/abi-cache`.
    ///
    /// # Errors
    ///
    /// Returns a `FileSystem` error when the home directory cannot be
    /// determined.
    pub fn default_cache_dir() -> Result<PathBuf, IndexerError> {
        let home = std::env::var_os("HOME").ok_or_else(|| {
            IndexerError::file_system("could not determine home directory (HOME is unset)")
        })?;
        Ok(PathBuf::from(home).join(".chaintap").join("abi-cache"))
    }

    /// Resolve a contract's ABI into a decoder.
    ///
    /// # Errors
    ///
    /// `Abi` errors are fatal for the contract that triggered them: a
    /// missing or malformed manual file, an unverified contract, an
    /// unsupported chain, or an exhausted explorer retry envelope.
    pub async fn resolve(
        &self,
        chain_id: u64,
        address: &str,
        manual_path: Option<&Path>,
    ) -> Result<EventDecoder, IndexerError> {
        let address = address.to_lowercase();

        if let Some(path) = manual_path {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                IndexerError::abi(format!(
                    "failed to read manual ABI file {}: {e}",
                    path.display()
                ))
            })?;
            let decoder = EventDecoder::from_abi_json(&raw)?;
            self.write_cache(chain_id, &address, &raw)?;
            info!(contract = %address, path = %path.display(), "loaded manual ABI");
            return Ok(decoder);
        }

        let cache_path = self.cache_path(chain_id, &address);
        if cache_path.exists() {
            let raw = std::fs::read_to_string(&cache_path).map_err(|e| {
                IndexerError::file_system(format!(
                    "failed to read cached ABI {}: {e}",
                    cache_path.display()
                ))
            })?;
            debug!(contract = %address, "ABI cache hit");
            return EventDecoder::from_abi_json(&raw);
        }

        let raw = self.explorer.fetch_abi(chain_id, &address).await?;
        let decoder = EventDecoder::from_abi_json(&raw)?;
        self.write_cache(chain_id, &address, &raw)?;
        info!(contract = %address, chain_id, "fetched ABI from explorer");
        Ok(decoder)
    }

    fn cache_path(&self, chain_id: u64, address: &str) -> PathBuf {
        self.cache_dir.join(chain_id.to_string()).join(format!("{address}.json"))
    }

    fn write_cache(&self, chain_id: u64, address: &str, raw: &str) -> Result<(), IndexerError> {
        let path = self.cache_path(chain_id, address);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                IndexerError::file_system(format!(
                    "failed to create ABI cache directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        std::fs::write(&path, raw).map_err(|e| {
            IndexerError::file_system(format!(
                "failed to write ABI cache entry {}: {e}",
                path.display()
            ))
        })
    }
}
