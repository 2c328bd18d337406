//! Health-tracked pool of JSON-RPC endpoints.
//!
//! The pool owns one [`RootProvider`] per configured endpoint and hands out
//! a currently-eligible one per request. Selection is priority-weighted
//! round-robin across healthy endpoints; endpoints that fail
//! `failure_threshold` times in a row are demoted and only offered again as
//! a one-shot trial once `cooldown_period` has elapsed. Callers report the
//! outcome of every request back to the pool.
//!
//! The pool also remembers the largest `eth_getLogs` block span each
//! provider has been observed to accept, so a limit learned by one
//! contract's fetch loop benefits every other contract on the same
//! endpoint.

pub mod classify;
mod health;

pub use health::{ProviderHealth, ProviderId};

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, SystemTime},
};

use alloy::providers::RootProvider;
use tracing::{info, warn};

use crate::error::IndexerError;

/// Default consecutive failures before an endpoint is demoted.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
/// Default wait before a demoted endpoint is trialed again.
pub const DEFAULT_COOLDOWN_PERIOD: Duration = Duration::from_secs(30);

/// One endpoint descriptor, as configured.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub url: String,
    /// Higher values are preferred during selection.
    pub priority: i64,
}

/// Tuning knobs for [`ProviderPool`].
#[derive(Clone, Copy, Debug)]
pub struct PoolOptions {
    pub failure_threshold: u32,
    pub cooldown_period: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown_period: DEFAULT_COOLDOWN_PERIOD,
        }
    }
}

/// A checked-out endpoint. Cheap to clone; dropping it has no effect on the
/// pool — callers signal outcomes explicitly via
/// [`ProviderPool::report_success`] and [`ProviderPool::report_failure`].
#[derive(Clone, Debug)]
pub struct ProviderHandle {
    pub id: ProviderId,
    pub url: String,
    pub provider: RootProvider,
}

#[derive(Debug)]
struct EndpointState {
    id: ProviderId,
    url: String,
    priority: i64,
    provider: RootProvider,
    healthy: bool,
    consecutive_failures: u32,
    last_failure: Option<SystemTime>,
    last_success: Option<SystemTime>,
    last_error: Option<String>,
}

#[derive(Debug)]
struct PoolState {
    endpoints: Vec<EndpointState>,
    cursor: usize,
    range_limits: HashMap<ProviderId, u64>,
}

#[derive(Debug)]
pub struct ProviderPool {
    state: Mutex<PoolState>,
    failure_threshold: u32,
    cooldown_period: Duration,
}

impl ProviderPool {
    /// Build a pool from endpoint descriptors.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the endpoint list is empty or a URL does
    /// not parse.
    pub fn new(
        endpoints: impl IntoIterator<Item = Endpoint>,
        options: PoolOptions,
    ) -> Result<Self, IndexerError> {
        let mut states = Vec::new();
        for endpoint in endpoints {
            let url = endpoint.url.parse().map_err(|e| {
                IndexerError::config(format!("invalid provider url {}: {e}", endpoint.url))
            })?;
            states.push(EndpointState {
                id: ProviderId::from_url(&endpoint.url),
                url: endpoint.url,
                priority: endpoint.priority,
                provider: RootProvider::new_http(url),
                healthy: true,
                consecutive_failures: 0,
                last_failure: None,
                last_success: None,
                last_error: None,
            });
        }

        if states.is_empty() {
            return Err(IndexerError::config("provider pool requires at least one endpoint"));
        }

        Ok(Self {
            state: Mutex::new(PoolState { endpoints: states, cursor: 0, range_limits: HashMap::new() }),
            failure_threshold: options.failure_threshold,
            cooldown_period: options.cooldown_period,
        })
    }

    /// Select an eligible endpoint.
    ///
    /// Healthy endpoints are served priority-weighted round-robin: each one
    /// appears `max(1, priority - min_priority + 1)` times in the rotation,
    /// biasing selection toward higher priorities while still spreading
    /// load. With no healthy endpoint left, a demoted one whose last
    /// failure is older than the cooldown period is offered as a one-shot
    /// trial.
    ///
    /// # Errors
    ///
    /// Returns an `Rpc` error when no endpoint is eligible.
    pub fn checkout(&self) -> Result<ProviderHandle, IndexerError> {
        let mut state = self.lock();

        let healthy: Vec<usize> = state
            .endpoints
            .iter()
            .enumerate()
            .filter(|(_, e)| e.healthy)
            .map(|(idx, _)| idx)
            .collect();

        if !healthy.is_empty() {
            let min_priority = healthy
                .iter()
                .map(|&idx| state.endpoints[idx].priority)
                .min()
                .unwrap_or(0);

            let mut weighted = Vec::new();
            for &idx in &healthy {
                let weight = (state.endpoints[idx].priority - min_priority + 1).max(1);
                for _ in 0..weight {
                    weighted.push(idx);
                }
            }

            let pick = weighted[state.cursor % weighted.len()];
            state.cursor = state.cursor.wrapping_add(1);
            return Ok(handle_for(&state.endpoints[pick]));
        }

        // Nothing healthy left; trial a cooled-down endpoint without
        // restoring it. A success report will mark it healthy again.
        let cooldown = self.cooldown_period;
        if let Some(endpoint) = state.endpoints.iter().find(|e| {
            e.last_failure
                .is_some_and(|at| at.elapsed().unwrap_or(Duration::ZERO) >= cooldown)
        }) {
            info!(provider = %endpoint.id, url = %endpoint.url, "trialing cooled-down provider");
            return Ok(handle_for(endpoint));
        }

        Err(IndexerError::rpc("No healthy providers available"))
    }

    /// Record a successful request against an endpoint, restoring it if it
    /// was demoted.
    pub fn report_success(&self, id: &ProviderId) {
        let mut state = self.lock();
        if let Some(endpoint) = state.endpoints.iter_mut().find(|e| &e.id == id) {
            endpoint.consecutive_failures = 0;
            endpoint.healthy = true;
            endpoint.last_success = Some(SystemTime::now());
        }
    }

    /// Record a failed request against an endpoint, demoting it once the
    /// failure threshold is reached.
    pub fn report_failure(&self, id: &ProviderId, error: &str) {
        let threshold = self.failure_threshold;
        let mut state = self.lock();
        if let Some(endpoint) = state.endpoints.iter_mut().find(|e| &e.id == id) {
            endpoint.consecutive_failures += 1;
            endpoint.last_failure = Some(SystemTime::now());
            endpoint.last_error = Some(error.to_string());
            if endpoint.consecutive_failures >= threshold && endpoint.healthy {
                endpoint.healthy = false;
                warn!(
                    provider = %endpoint.id,
                    url = %endpoint.url,
                    failures = endpoint.consecutive_failures,
                    error,
                    "provider demoted after repeated failures"
                );
            }
        }
    }

    /// Copy of every endpoint's health, for status reporting.
    #[must_use]
    pub fn health_snapshot(&self) -> Vec<ProviderHealth> {
        let state = self.lock();
        state
            .endpoints
            .iter()
            .map(|e| ProviderHealth {
                id: e.id.clone(),
                url: e.url.clone(),
                priority: e.priority,
                healthy: e.healthy,
                consecutive_failures: e.consecutive_failures,
                last_failure: e.last_failure,
                last_success: e.last_success,
                last_error: e.last_error.clone(),
            })
            .collect()
    }

    /// The largest `eth_getLogs` block span this provider is believed to
    /// accept, if one has been learned.
    #[must_use]
    pub fn range_limit(&self, id: &ProviderId) -> Option<u64> {
        self.lock().range_limits.get(id).copied()
    }

    /// Record a learned block-span limit. Limits only ever shrink; the
    /// effective stored value is returned.
    pub fn shrink_range_limit(&self, id: &ProviderId, limit: u64) -> u64 {
        let mut state = self.lock();
        let entry = state.range_limits.entry(id.clone()).or_insert(limit);
        *entry = (*entry).min(limit);
        *entry
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().expect("provider pool mutex poisoned")
    }
}

fn handle_for(endpoint: &EndpointState) -> ProviderHandle {
    ProviderHandle {
        id: endpoint.id.clone(),
        url: endpoint.url.clone(),
        provider: endpoint.provider.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(url: &str, priority: i64) -> Endpoint {
        Endpoint { url: url.to_string(), priority }
    }

    fn two_endpoint_pool(options: PoolOptions) -> ProviderPool {
        ProviderPool::new(
            [
                endpoint("http://one.invalid:8545", 1),
                endpoint("http://two.invalid:8545", 2),
            ],
            options,
        )
        .unwrap()
    }

    #[test]
    fn empty_pool_is_rejected() {
        let err = ProviderPool::new([], PoolOptions::default()).unwrap_err();
        assert!(matches!(err, IndexerError::Config(_)));
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = ProviderPool::new([endpoint("not a url", 1)], PoolOptions::default())
            .unwrap_err();
        assert!(matches!(err, IndexerError::Config(_)));
    }

    #[test]
    fn selection_is_priority_weighted_round_robin() -> anyhow::Result<()> {
        let pool = two_endpoint_pool(PoolOptions::default());
        let one = ProviderId::from_url("http://one.invalid:8545");
        let two = ProviderId::from_url("http://two.invalid:8545");

        // Weights: one -> 1, two -> 2, so the rotation is [one, two, two].
        let picks = (0..6)
            .map(|_| pool.checkout().map(|handle| handle.id))
            .collect::<Result<Vec<ProviderId>, _>>()?;
        assert_eq!(picks, vec![
            one.clone(),
            two.clone(),
            two.clone(),
            one,
            two.clone(),
            two
        ]);
        Ok(())
    }

    #[test]
    fn demoted_endpoint_is_skipped_and_restored_on_success() -> anyhow::Result<()> {
        let pool = two_endpoint_pool(PoolOptions::default());
        let two = ProviderId::from_url("http://two.invalid:8545");
        let one = ProviderId::from_url("http://one.invalid:8545");

        for _ in 0..3 {
            pool.report_failure(&two, "connection refused");
        }

        // Only the priority-1 endpoint is left in rotation.
        for _ in 0..4 {
            assert_eq!(pool.checkout()?.id, one);
        }

        pool.report_success(&two);
        let healths = pool.health_snapshot();
        let restored = healths.iter().find(|h| h.id == two).unwrap();
        assert!(restored.healthy);
        assert_eq!(restored.consecutive_failures, 0);
        Ok(())
    }

    #[test]
    fn failures_below_threshold_keep_endpoint_healthy() {
        let pool = two_endpoint_pool(PoolOptions::default());
        let two = ProviderId::from_url("http://two.invalid:8545");

        pool.report_failure(&two, "boom");
        pool.report_failure(&two, "boom");

        let healths = pool.health_snapshot();
        let health = healths.iter().find(|h| h.id == two).unwrap();
        assert!(health.healthy);
        assert_eq!(health.consecutive_failures, 2);
        assert_eq!(health.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn intervening_success_resets_the_failure_counter() {
        let pool = two_endpoint_pool(PoolOptions::default());
        let two = ProviderId::from_url("http://two.invalid:8545");

        pool.report_failure(&two, "boom");
        pool.report_failure(&two, "boom");
        pool.report_success(&two);
        pool.report_failure(&two, "boom");
        pool.report_failure(&two, "boom");

        // Four failures total, but never three consecutive ones.
        let healths = pool.health_snapshot();
        let health = healths.iter().find(|h| h.id == two).unwrap();
        assert!(health.healthy);
        assert_eq!(health.consecutive_failures, 2);
    }

    #[test]
    fn exhausted_pool_reports_no_healthy_providers() {
        let pool = two_endpoint_pool(PoolOptions {
            failure_threshold: 1,
            cooldown_period: Duration::from_secs(3600),
        });
        let one = ProviderId::from_url("http://one.invalid:8545");
        let two = ProviderId::from_url("http://two.invalid:8545");

        pool.report_failure(&one, "down");
        pool.report_failure(&two, "down");

        let err = pool.checkout().unwrap_err();
        assert_eq!(err, IndexerError::rpc("No healthy providers available"));
    }

    #[test]
    fn cooled_down_endpoint_gets_a_trial() -> anyhow::Result<()> {
        let pool = two_endpoint_pool(PoolOptions {
            failure_threshold: 1,
            cooldown_period: Duration::ZERO,
        });
        let one = ProviderId::from_url("http://one.invalid:8545");
        let two = ProviderId::from_url("http://two.invalid:8545");

        pool.report_failure(&one, "down");
        pool.report_failure(&two, "down");

        // A trial checkout succeeds but does not restore health by itself.
        let handle = pool.checkout()?;
        assert!([&one, &two].contains(&&handle.id));
        assert!(pool.health_snapshot().iter().all(|h| !h.healthy));
        Ok(())
    }

    #[test]
    fn range_limits_only_shrink() {
        let pool = two_endpoint_pool(PoolOptions::default());
        let id = ProviderId::from_url("http://one.invalid:8545");

        assert_eq!(pool.range_limit(&id), None);
        assert_eq!(pool.shrink_range_limit(&id, 1000), 1000);
        assert_eq!(pool.shrink_range_limit(&id, 500), 500);
        // Attempting to grow keeps the learned minimum.
        assert_eq!(pool.shrink_range_limit(&id, 2000), 500);
        assert_eq!(pool.range_limit(&id), Some(500));
    }

    #[test]
    fn snapshot_is_a_copy() {
        let pool = two_endpoint_pool(PoolOptions::default());
        let one = ProviderId::from_url("http://one.invalid:8545");

        let before = pool.health_snapshot();
        pool.report_failure(&one, "late failure");

        let stale = before.iter().find(|h| h.id == one).unwrap();
        assert_eq!(stale.consecutive_failures, 0);
        assert!(stale.last_error.is_none());
    }
}
