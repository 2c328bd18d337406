//! The per-contract polling task.
//!
//! Each configured contract gets one long-lived poller. An iteration checks
//! out a provider, reads the head, fetches and decodes logs up to the
//! confirmations-adjusted target, commits atomically, and sleeps.
//! Iteration failures never kill the poller; they are logged and retried on
//! the next tick. Only ABI resolution failures are fatal for the contract.

use std::{sync::Arc, time::Duration};

use alloy::{primitives::Address, providers::Provider};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    abi::{AbiRegistry, EventDecoder},
    config::ContractConfig,
    error::IndexerError,
    fetcher::LogFetcher,
    provider::{ProviderPool, classify},
    storage::EventStore,
    types::Chain,
};

pub(crate) struct ContractPoller {
    pub contract: ContractConfig,
    pub chain: Chain,
    pub confirmations: u64,
    pub poll_interval: Duration,
    pub pool: Arc<ProviderPool>,
    pub store: EventStore,
    pub registry: Arc<AbiRegistry>,
    pub fetcher: LogFetcher,
    pub shutdown: CancellationToken,
}

impl ContractPoller {
    pub(crate) async fn run(self) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let address: Address = match self.contract.address.parse() {
            Ok(address) => address,
            Err(e) => {
                error!(contract = %self.contract.address, error = %e, "invalid contract address");
                return;
            }
        };

        let decoder = match self
            .registry
            .resolve(self.chain.id(), &self.contract.address, self.contract.abi.as_deref())
            .await
        {
            Ok(decoder) => decoder,
            Err(error) => {
                error!(
                    contract = %self.contract.address,
                    error = %error,
                    "failed to resolve contract ABI, stopping poller"
                );
                return;
            }
        };

        info!(
            contract = %self.contract.address,
            events = ?self.contract.events,
            "poller started"
        );

        let mut current: Option<u64> = None;
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            if let Err(error) = self.poll_once(address, &decoder, &mut current).await {
                warn!(
                    contract = %self.contract.address,
                    error = %error,
                    "poll iteration failed, retrying next tick"
                );
            }

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(contract = %self.contract.address, "poller stopped");
    }

    async fn poll_once(
        &self,
        address: Address,
        decoder: &EventDecoder,
        current: &mut Option<u64>,
    ) -> Result<(), IndexerError> {
        let handle = self.pool.checkout()?;

        let head = match handle.provider.get_block_number().await {
            Ok(head) => {
                self.pool.report_success(&handle.id);
                head
            }
            Err(error) => {
                let message = error.to_string();
                self.pool.report_failure(&handle.id, &message);
                return Err(IndexerError::rpc_for(&handle.id, message));
            }
        };

        let start = match *current {
            Some(block) => block,
            None => {
                let start = self.start_block(head).await?;
                debug!(contract = %self.contract.address, start_block = start, "selected start block");
                *current = Some(start);
                start
            }
        };

        let target = head.saturating_sub(self.confirmations);
        if target < start {
            debug!(
                contract = %self.contract.address,
                head,
                target,
                next = start,
                "no newly confirmed blocks"
            );
            return Ok(());
        }

        let events = match self
            .fetcher
            .fetch_events(&handle, address, decoder, &self.contract.events, start, target)
            .await
        {
            Ok(events) => events,
            Err(error) => {
                let message = error.to_string();
                if classify::is_rate_limit_error(&message) || classify::is_timeout_error(&message)
                {
                    self.pool.report_failure(&handle.id, &message);
                }
                return Err(error);
            }
        };

        let inserted = self
            .store
            .commit(&self.contract.address, self.chain.id(), target, &events)
            .await?;

        info!(
            contract = %self.contract.address,
            from = start,
            to = target,
            fetched = events.len(),
            inserted,
            "committed indexed range"
        );

        *current = Some(target + 1);
        Ok(())
    }

    /// First block to index: the configured `from_block` (resuming from
    /// `last_block + 1` when stored progress has already passed it), or the
    /// current head when no `from_block` is configured.
    async fn start_block(&self, head: u64) -> Result<u64, IndexerError> {
        match self.contract.from_block {
            None => Ok(head),
            Some(from_block) => {
                match self.store.last_synced_block(&self.contract.address).await? {
                    Some(last) if last >= from_block => Ok(last + 1),
                    _ => Ok(from_block),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ContractConfig,
        provider::{Endpoint, PoolOptions},
        types::DecodedEvent,
    };
    use serde_json::Map;

    const CONTRACT: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

    async fn poller(from_block: Option<u64>) -> anyhow::Result<ContractPoller> {
        let store = EventStore::in_memory().await?;
        store.init().await?;
        let pool = Arc::new(ProviderPool::new(
            [Endpoint { url: "http://one.invalid:8545".to_string(), priority: 1 }],
            PoolOptions::default(),
        )?);
        Ok(ContractPoller {
            contract: ContractConfig {
                address: CONTRACT.to_string(),
                name: None,
                events: vec!["Transfer".to_string()],
                from_block,
                abi: None,
            },
            chain: Chain::Ethereum,
            confirmations: 12,
            poll_interval: Duration::from_millis(10),
            pool: pool.clone(),
            store,
            registry: Arc::new(AbiRegistry::new(
                std::env::temp_dir().join("chaintap-poller-test"),
                None,
                0,
            )?),
            fetcher: LogFetcher::new(pool, 2000),
            shutdown: CancellationToken::new(),
        })
    }

    fn event(block_number: u64) -> DecodedEvent {
        DecodedEvent {
            contract_address: CONTRACT.to_string(),
            block_number,
            block_timestamp: 0,
            transaction_hash: format!("0x{block_number:064x}"),
            log_index: 0,
            event_name: "Transfer".to_string(),
            payload: Map::new(),
        }
    }

    #[tokio::test]
    async fn start_block_defaults_to_head_without_from_block() -> anyhow::Result<()> {
        let poller = poller(None).await?;
        assert_eq!(poller.start_block(19_500_000).await?, 19_500_000);
        Ok(())
    }

    #[tokio::test]
    async fn start_block_uses_from_block_on_first_run() -> anyhow::Result<()> {
        let poller = poller(Some(19_000_000)).await?;
        assert_eq!(poller.start_block(19_500_000).await?, 19_000_000);
        Ok(())
    }

    #[tokio::test]
    async fn start_block_resumes_past_stored_progress() -> anyhow::Result<()> {
        let poller = poller(Some(19_000_000)).await?;
        poller.store.commit(CONTRACT, 1, 19_200_000, &[event(19_200_000)]).await?;

        assert_eq!(poller.start_block(19_500_000).await?, 19_200_001);
        Ok(())
    }

    #[tokio::test]
    async fn start_block_ignores_progress_below_from_block() -> anyhow::Result<()> {
        let poller = poller(Some(19_300_000)).await?;
        poller.store.commit(CONTRACT, 1, 19_200_000, &[]).await?;

        assert_eq!(poller.start_block(19_500_000).await?, 19_300_000);
        Ok(())
    }
}
