//! Chunked `eth_getLogs` retrieval with adaptive range sizing.
//!
//! Providers cap the block span a single `eth_getLogs` call may cover, but
//! the caps differ per provider and are only discoverable by hitting them.
//! The fetcher walks a requested window in chunks, halving the chunk size
//! (down to a floor of 100 blocks) whenever the provider rejects a span,
//! and records the learned limit on the pool so it survives across fetch
//! calls and contracts.

use std::{collections::HashMap, sync::Arc, time::Duration};

use alloy::{
    consensus::BlockHeader,
    primitives::{Address, B256},
    providers::Provider,
    rpc::types::{Filter, Log},
};
use backon::{ExponentialBuilder, Retryable};
use tracing::{debug, warn};

use crate::{
    abi::EventDecoder,
    error::IndexerError,
    provider::{ProviderHandle, ProviderPool, classify},
    types::DecodedEvent,
};

/// Absolute floor for the per-provider chunk size.
pub const MIN_CHUNK_SIZE: u64 = 100;

/// Consecutive range rejections tolerated at the floor before giving up on
/// the window. The source implementation would spin forever here.
const MAX_FLOOR_STALLS: u32 = 3;

/// Retry envelope for block header fetches: 3 attempts, 1s doubling to 10s.
const TIMESTAMP_RETRIES: usize = 3;
const TIMESTAMP_MIN_DELAY: Duration = Duration::from_secs(1);
const TIMESTAMP_MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct LogFetcher {
    pool: Arc<ProviderPool>,
    initial_chunk_size: u64,
}

impl LogFetcher {
    #[must_use]
    pub fn new(pool: Arc<ProviderPool>, initial_chunk_size: u64) -> Self {
        Self { pool, initial_chunk_size }
    }

    /// Fetch and decode every matching event in `[from, to]`.
    ///
    /// Event names are resolved to topic hashes up front, so a name absent
    /// from the ABI fails before the first network call. Logs that decode
    /// to no known event are skipped; logs whose block timestamp cannot be
    /// resolved are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Propagates `Rpc` errors from the chunk loop and `Abi` errors from
    /// decoding.
    pub async fn fetch_events(
        &self,
        handle: &ProviderHandle,
        contract: Address,
        decoder: &EventDecoder,
        event_names: &[String],
        from: u64,
        to: u64,
    ) -> Result<Vec<DecodedEvent>, IndexerError> {
        let topics = event_names
            .iter()
            .map(|name| decoder.topic(name))
            .collect::<Result<Vec<B256>, _>>()?;

        let logs = self.fetch_raw(handle, contract, topics, from, to).await?;
        if logs.is_empty() {
            return Ok(Vec::new());
        }

        // Block-number -> timestamp cache, scoped to this invocation.
        let mut timestamps: HashMap<u64, u64> = HashMap::new();
        let mut events = Vec::with_capacity(logs.len());

        for log in &logs {
            let Some(block_number) = log.block_number else {
                warn!(contract = %contract, "skipping pending log without block number");
                continue;
            };

            let timestamp =
                match self.block_timestamp(handle, block_number, &mut timestamps).await {
                    Ok(timestamp) => timestamp,
                    Err(error) => {
                        warn!(
                            contract = %contract,
                            block = block_number,
                            error = %error,
                            "dropping log with unresolvable block timestamp"
                        );
                        continue;
                    }
                };

            match decoder.decode_log(log)? {
                Some(mut event) => {
                    event.block_timestamp = timestamp;
                    events.push(event);
                }
                None => {
                    debug!(
                        contract = %contract,
                        topic0 = ?log.topic0(),
                        "skipping log with unknown event signature"
                    );
                }
            }
        }

        Ok(events)
    }

    /// Walk `[from, to]` in chunks, accumulating raw logs.
    ///
    /// The chunk size starts from the pool's learned limit for this
    /// provider (or the configured initial size) and halves on every range
    /// rejection without advancing the cursor. Non-range errors propagate.
    async fn fetch_raw(
        &self,
        handle: &ProviderHandle,
        contract: Address,
        topics: Vec<B256>,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, IndexerError> {
        let mut chunk_size =
            self.pool.range_limit(&handle.id).unwrap_or(self.initial_chunk_size).max(1);
        let mut start = from;
        let mut floor_stalls = 0u32;
        let mut logs = Vec::new();

        while start <= to {
            let end = start.saturating_add(chunk_size - 1).min(to);
            let filter = Filter::new()
                .address(contract)
                .event_signature(topics.clone())
                .from_block(start)
                .to_block(end);

            match handle.provider.get_logs(&filter).await {
                Ok(batch) => {
                    floor_stalls = 0;
                    logs.extend(batch);
                    start = end + 1;
                }
                Err(error) => {
                    let message = error.to_string();
                    if !classify::is_block_range_error(&message) {
                        return Err(IndexerError::rpc_for(&handle.id, message));
                    }

                    if chunk_size > MIN_CHUNK_SIZE {
                        chunk_size = (chunk_size / 2).max(MIN_CHUNK_SIZE);
                        chunk_size = self.pool.shrink_range_limit(&handle.id, chunk_size);
                        debug!(
                            provider = %handle.id,
                            chunk_size,
                            from = start,
                            "provider rejected block span, shrinking chunk"
                        );
                        continue;
                    }

                    floor_stalls += 1;
                    if floor_stalls >= MAX_FLOOR_STALLS {
                        return Err(IndexerError::rpc_for(
                            &handle.id,
                            format!("block range rejected at minimum chunk size: {message}"),
                        ));
                    }
                }
            }
        }

        Ok(logs)
    }

    /// Resolve a block's timestamp, consulting the per-invocation cache
    /// first and retrying the header fetch with bounded backoff.
    async fn block_timestamp(
        &self,
        handle: &ProviderHandle,
        number: u64,
        cache: &mut HashMap<u64, u64>,
    ) -> Result<u64, IndexerError> {
        if let Some(timestamp) = cache.get(&number) {
            return Ok(*timestamp);
        }

        let strategy = ExponentialBuilder::default()
            .with_max_times(TIMESTAMP_RETRIES)
            .with_min_delay(TIMESTAMP_MIN_DELAY)
            .with_max_delay(TIMESTAMP_MAX_DELAY);

        let block = (|| async { handle.provider.get_block_by_number(number.into()).await })
            .retry(strategy)
            .notify(|error, dur: Duration| {
                debug!(block = number, error = %error, "block fetch failed, retrying after {dur:?}");
            })
            .sleep(tokio::time::sleep)
            .await
            .map_err(|e| IndexerError::rpc_for(&handle.id, e.to_string()))?
            .ok_or_else(|| IndexerError::rpc_for(&handle.id, format!("block {number} not found")))?;

        let timestamp = block.header.timestamp();
        cache.insert(number, timestamp);
        Ok(timestamp)
    }
}
