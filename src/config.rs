//! Configuration file loading and validation.
//!
//! The configuration is YAML. String scalars may reference environment
//! variables with `${NAME}`; references are expanded before deserialization
//! and an undefined name is a configuration error.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{error::IndexerError, types::Chain};

pub const DEFAULT_BATCH_SIZE: u64 = 2000;
pub const DEFAULT_CONFIRMATIONS: u64 = 12;
/// Milliseconds between poll ticks.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 15_000;
pub const DEFAULT_MAX_RETRIES: usize = 5;
pub const DEFAULT_PROVIDER_PRIORITY: i64 = 1;

const MAX_CONTRACTS: usize = 100;

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub chain: Chain,
    pub database: DatabaseConfig,
    pub contracts: Vec<ContractConfig>,
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub options: Options,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractConfig {
    /// `0x`-prefixed 20-byte hex address; lowercased during validation.
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Event names to index, as declared in the contract's ABI.
    pub events: Vec<String>,
    /// First block to index. `null` means "start at the current head".
    #[serde(default)]
    pub from_block: Option<u64>,
    /// Manual ABI file, for contracts not verified on the explorer.
    #[serde(default)]
    pub abi: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub url: String,
    /// Higher values are preferred during provider selection.
    #[serde(default = "default_priority")]
    pub priority: i64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
    /// Initial `eth_getLogs` block span; shrinks per provider as limits are learned.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Head blocks the indexer refuses to touch, as a reorg hedge.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Milliseconds between poll ticks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            confirmations: DEFAULT_CONFIRMATIONS,
            poll_interval: DEFAULT_POLL_INTERVAL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

fn default_priority() -> i64 {
    DEFAULT_PROVIDER_PRIORITY
}

fn default_batch_size() -> u64 {
    DEFAULT_BATCH_SIZE
}

fn default_confirmations() -> u64 {
    DEFAULT_CONFIRMATIONS
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}

/// Load, expand, and validate a configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, IndexerError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        IndexerError::config(format!("failed to read {}: {e}", path.display()))
    })?;
    load_config_from_str(&content)
}

/// Load a configuration from a YAML string.
///
/// Useful for testing or when the config is provided via other means.
pub fn load_config_from_str(content: &str) -> Result<Config, IndexerError> {
    let mut value: serde_yaml::Value = serde_yaml::from_str(content)?;
    expand_env(&mut value)?;

    let mut config: Config = serde_yaml::from_value(value)?;
    validate(&mut config)?;
    Ok(config)
}

/// Expand `${NAME}` references in every string scalar, in place.
fn expand_env(value: &mut serde_yaml::Value) -> Result<(), IndexerError> {
    match value {
        serde_yaml::Value::String(s) => {
            *s = expand_env_str(s)?;
        }
        serde_yaml::Value::Sequence(seq) => {
            for item in seq {
                expand_env(item)?;
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                expand_env(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn expand_env_str(input: &str) -> Result<String, IndexerError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(IndexerError::config(format!(
                "unterminated environment reference in \"{input}\""
            )));
        };
        let name = &after[..end];
        let value = std::env::var(name).map_err(|_| {
            IndexerError::config(format!("undefined environment variable: {name}"))
        })?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

fn validate(config: &mut Config) -> Result<(), IndexerError> {
    if config.contracts.is_empty() {
        return Err(IndexerError::config("at least one contract must be configured"));
    }
    if config.contracts.len() > MAX_CONTRACTS {
        return Err(IndexerError::config(format!(
            "at most {MAX_CONTRACTS} contracts are supported, got {}",
            config.contracts.len()
        )));
    }
    if config.providers.is_empty() {
        return Err(IndexerError::config("at least one provider must be configured"));
    }
    if config.options.batch_size == 0 {
        return Err(IndexerError::config("options.batch_size must be greater than 0"));
    }

    for contract in &mut config.contracts {
        if !is_valid_address(&contract.address) {
            return Err(IndexerError::config(format!(
                "invalid contract address: {}",
                contract.address
            )));
        }
        contract.address = contract.address.to_lowercase();

        if contract.events.is_empty() {
            return Err(IndexerError::config(format!(
                "contract {} has no events configured",
                contract.address
            )));
        }
    }

    Ok(())
}

fn is_valid_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}
