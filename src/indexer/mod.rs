//! The indexing coordinator.
//!
//! [`Indexer`] owns the shared subsystems (provider pool, storage, ABI
//! registry, fetcher) and drives them in two modes: [`watch`](Indexer::watch)
//! runs one cooperative poller per contract until shutdown, and
//! [`backfill`](Indexer::backfill) indexes a fixed block range once per
//! contract, in sequence.

mod poller;
mod status;

pub use status::{ContractStatus, group_digits, relative_age};

use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use alloy::{primitives::Address, providers::Provider};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    abi::AbiRegistry,
    config::{Config, ContractConfig, Options},
    error::IndexerError,
    fetcher::LogFetcher,
    provider::{Endpoint, PoolOptions, ProviderHealth, ProviderPool, classify},
    storage::EventStore,
    types::Chain,
};

use poller::ContractPoller;

/// Minimum interval between backfill progress log lines.
const BACKFILL_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

pub struct Indexer {
    chain: Chain,
    contracts: Vec<ContractConfig>,
    options: Options,
    store: EventStore,
    pool: Arc<ProviderPool>,
    registry: Arc<AbiRegistry>,
    fetcher: LogFetcher,
    shutdown: CancellationToken,
}

impl Indexer {
    /// Build the indexer from a validated configuration, opening the
    /// database at the configured path.
    ///
    /// # Errors
    ///
    /// Construction errors are fatal: a bad provider URL, an unusable
    /// database path, or a missing home directory for the ABI cache.
    pub async fn new(config: &Config) -> Result<Self, IndexerError> {
        let store = EventStore::connect(&config.database.path).await?;
        store.init().await?;
        Self::with_store(config, store)
    }

    /// Like [`Indexer::new`] but over an already-initialized store. Used by
    /// tests and callers that manage the database themselves.
    pub fn with_store(config: &Config, store: EventStore) -> Result<Self, IndexerError> {
        let pool = Arc::new(ProviderPool::new(
            config.providers.iter().map(|p| Endpoint { url: p.url.clone(), priority: p.priority }),
            PoolOptions::default(),
        )?);
        let registry = Arc::new(AbiRegistry::new(
            AbiRegistry::default_cache_dir()?,
            std::env::var("ETHERSCAN_API_KEY").ok(),
            config.options.max_retries,
        )?);
        let fetcher = LogFetcher::new(pool.clone(), config.options.batch_size);

        Ok(Self {
            chain: config.chain,
            contracts: config.contracts.clone(),
            options: config.options.clone(),
            store,
            pool,
            registry,
            fetcher,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that, once cancelled, stops every poller at its next wake.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run one poller per contract until shutdown is requested.
    ///
    /// Per-iteration failures are logged inside the pollers and retried on
    /// their next tick; this method only returns once every poller has
    /// observed shutdown and exited.
    pub async fn watch(&self) {
        let mut pollers = JoinSet::new();
        for contract in &self.contracts {
            pollers.spawn(
                ContractPoller {
                    contract: contract.clone(),
                    chain: self.chain,
                    confirmations: self.options.confirmations,
                    poll_interval: Duration::from_millis(self.options.poll_interval),
                    pool: self.pool.clone(),
                    store: self.store.clone(),
                    registry: self.registry.clone(),
                    fetcher: self.fetcher.clone(),
                    shutdown: self.shutdown.clone(),
                }
                .run(),
            );
        }

        info!(contracts = self.contracts.len(), chain = %self.chain, "watch started");

        while let Some(joined) = pollers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "poller task panicked");
            }
        }

        info!("watch stopped");
    }

    /// Index a fixed `[from_block, to_block]` range once for every
    /// contract, sequentially. `to_block = None` means the current head.
    /// Returns the number of newly inserted events.
    ///
    /// # Errors
    ///
    /// Unlike `watch`, any failure aborts the run.
    pub async fn backfill(
        &self,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<u64, IndexerError> {
        let to_block = match to_block {
            Some(block) => block,
            None => self.head_block().await?,
        };
        if to_block < from_block {
            return Err(IndexerError::config(format!(
                "backfill range is inverted: {from_block} > {to_block}"
            )));
        }

        let mut total_inserted = 0;
        for contract in &self.contracts {
            total_inserted += self.backfill_contract(contract, from_block, to_block).await?;
        }

        info!(from_block, to_block, inserted = total_inserted, "backfill finished");
        Ok(total_inserted)
    }

    async fn backfill_contract(
        &self,
        contract: &ContractConfig,
        from_block: u64,
        to_block: u64,
    ) -> Result<u64, IndexerError> {
        let address: Address = contract.address.parse().map_err(|e| {
            IndexerError::config(format!("invalid contract address {}: {e}", contract.address))
        })?;
        let decoder = self
            .registry
            .resolve(self.chain.id(), &contract.address, contract.abi.as_deref())
            .await?;

        info!(contract = %contract.address, from_block, to_block, "backfilling contract");

        let mut inserted = 0;
        let mut start = from_block;
        let mut last_report = Instant::now();

        while start <= to_block {
            let end = start.saturating_add(self.options.batch_size - 1).min(to_block);
            let handle = self.pool.checkout()?;

            let events = match self
                .fetcher
                .fetch_events(&handle, address, &decoder, &contract.events, start, end)
                .await
            {
                Ok(events) => {
                    self.pool.report_success(&handle.id);
                    events
                }
                Err(error) => {
                    let message = error.to_string();
                    if classify::is_rate_limit_error(&message)
                        || classify::is_timeout_error(&message)
                    {
                        self.pool.report_failure(&handle.id, &message);
                    }
                    return Err(error);
                }
            };

            inserted += self
                .store
                .commit(&contract.address, self.chain.id(), end, &events)
                .await?;

            if last_report.elapsed() >= BACKFILL_PROGRESS_INTERVAL {
                info!(
                    contract = %contract.address,
                    current_block = end,
                    to_block,
                    new_events = inserted,
                    "backfill progress"
                );
                last_report = Instant::now();
            }

            start = end + 1;
        }

        info!(contract = %contract.address, new_events = inserted, "contract backfill complete");
        Ok(inserted)
    }

    /// Per-contract status, read through the indexer's single store handle.
    /// Pure read; never mutates.
    pub async fn status(&self) -> Result<Vec<ContractStatus>, IndexerError> {
        let states = self.store.sync_states().await?;
        let mut report = Vec::with_capacity(self.contracts.len());

        for contract in &self.contracts {
            let state = states.iter().find(|s| s.contract_address == contract.address);
            let total_events = self.store.count_events(&contract.address).await?;
            report.push(ContractStatus {
                address: contract.address.clone(),
                name: contract.name.clone(),
                chain: self.chain,
                events: contract.events.clone(),
                last_block: state.map_or(0, |s| s.last_block),
                total_events,
                status: state.map_or_else(|| "pending".to_string(), |s| s.status.clone()),
                last_sync: state.map_or(0, |s| s.last_sync),
            });
        }

        Ok(report)
    }

    /// Health of every configured provider, for status reporting.
    #[must_use]
    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        self.pool.health_snapshot()
    }

    /// Release storage handles. Pollers should be stopped first.
    pub async fn close(&self) {
        self.store.close().await;
    }

    async fn head_block(&self) -> Result<u64, IndexerError> {
        let handle = self.pool.checkout()?;
        match handle.provider.get_block_number().await {
            Ok(head) => {
                self.pool.report_success(&handle.id);
                Ok(head)
            }
            Err(error) => {
                let message = error.to_string();
                self.pool.report_failure(&handle.id, &message);
                Err(IndexerError::rpc_for(&handle.id, message))
            }
        }
    }
}

/// Current wall clock as Unix seconds, for status rendering.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
