//! Etherscan-family explorer client for contract ABI lookup.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use tracing::info;

use crate::error::IndexerError;

/// Per-request deadline for explorer calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Retry delays: transport errors only, 1s doubling up to 30s.
const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

pub(crate) const UNVERIFIED_CONTRACT_MESSAGE: &str =
    "Contract ABI not verified on Etherscan. Provide manual ABI path in config.";

/// Explorer API base URL for a chain id.
///
/// # Errors
///
/// Returns an `Abi` error for chain ids without a known explorer.
pub(crate) fn explorer_url(chain_id: u64) -> Result<&'static str, IndexerError> {
    match chain_id {
        1 => Ok("https://api.etherscan.io/v2/api"),
        10 => Ok("https://api-optimistic.etherscan.io/api"),
        56 => Ok("https://api.bscscan.com/api"),
        137 => Ok("https://api.polygonscan.com/api"),
        8453 => Ok("https://api.basescan.org/api"),
        42161 => Ok("https://api.arbiscan.io/api"),
        other => Err(IndexerError::abi(format!("Unsupported chain ID: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    message: String,
    result: String,
}

/// One fetch attempt's failure, split by whether retrying can help.
#[derive(Debug)]
enum AttemptError {
    Transport(String),
    Fatal(IndexerError),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        matches!(self, AttemptError::Transport(_))
    }
}

impl From<AttemptError> for IndexerError {
    fn from(error: AttemptError) -> Self {
        match error {
            AttemptError::Transport(message) => {
                IndexerError::abi(format!("explorer request failed: {message}"))
            }
            AttemptError::Fatal(error) => error,
        }
    }
}

pub(crate) struct ExplorerClient {
    client: reqwest::Client,
    api_key: Option<String>,
    max_retries: usize,
}

impl ExplorerClient {
    pub fn new(api_key: Option<String>, max_retries: usize) -> Result<Self, IndexerError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| IndexerError::abi(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, api_key, max_retries })
    }

    /// Fetch the raw JSON ABI string for a verified contract.
    ///
    /// Network failures are retried with exponential backoff; non-2xx
    /// responses and explorer-reported errors (including the unverified
    /// contract case) abort the retry loop immediately.
    pub async fn fetch_abi(&self, chain_id: u64, address: &str) -> Result<String, IndexerError> {
        let base = explorer_url(chain_id)?;

        let strategy = ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(MIN_RETRY_DELAY)
            .with_max_delay(MAX_RETRY_DELAY);

        (|| self.request_abi(base, chain_id, address))
            .retry(strategy)
            .when(AttemptError::is_retryable)
            .notify(|err: &AttemptError, dur: Duration| {
                info!(error = ?err, "explorer request failed, retrying after {dur:?}");
            })
            .sleep(tokio::time::sleep)
            .await
            .map_err(IndexerError::from)
    }

    async fn request_abi(
        &self,
        base: &str,
        chain_id: u64,
        address: &str,
    ) -> Result<String, AttemptError> {
        let chain_id = chain_id.to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("module", "contract"),
            ("action", "getabi"),
            ("address", address),
            ("chainid", &chain_id),
        ];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key));
        }

        let response = self
            .client
            .get(base)
            .query(&query)
            .send()
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Fatal(IndexerError::abi(format!(
                "explorer returned HTTP {status}"
            ))));
        }

        let body: ExplorerResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;

        parse_explorer_response(body)
    }
}

fn parse_explorer_response(body: ExplorerResponse) -> Result<String, AttemptError> {
    if body.status == "1" {
        return Ok(body.result);
    }

    let lowered = body.result.to_lowercase();
    if lowered.contains("not verified") || lowered.contains("source code not verified") {
        return Err(AttemptError::Fatal(IndexerError::abi(UNVERIFIED_CONTRACT_MESSAGE)));
    }

    Err(AttemptError::Fatal(IndexerError::abi(format!(
        "explorer error: {}",
        body.message
    ))))
}
