use std::{fmt, time::SystemTime};

use alloy::primitives::keccak256;

/// Stable identifier for a configured RPC endpoint.
///
/// Derived from the endpoint URL by truncating its keccak256 digest, so the
/// same URL always maps to the same identifier across runs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(String);

impl ProviderId {
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        let digest = keccak256(url.as_bytes());
        ProviderId(alloy::hex::encode(&digest[..8]))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time health snapshot of one endpoint.
///
/// Returned by [`ProviderPool::health_snapshot`](crate::provider::ProviderPool::health_snapshot);
/// a copy, not a live view.
#[derive(Clone, Debug)]
pub struct ProviderHealth {
    pub id: ProviderId,
    pub url: String,
    pub priority: i64,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_failure: Option<SystemTime>,
    pub last_success: Option<SystemTime>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_is_deterministic() {
        let a = ProviderId::from_url("https://eth.llamarpc.com");
        let b = ProviderId::from_url("https://eth.llamarpc.com");
        assert_eq!(a, b);
    }

    #[test]
    fn identifier_distinguishes_urls() {
        let a = ProviderId::from_url("https://eth.llamarpc.com");
        let b = ProviderId::from_url("https://rpc.ankr.com/eth");
        assert_ne!(a, b);
    }

    #[test]
    fn identifier_is_short_hex() {
        let id = ProviderId::from_url("https://eth.llamarpc.com");
        assert_eq!(id.as_str().len(), 16);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
