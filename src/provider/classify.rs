//! Pure predicates over RPC error text.
//!
//! JSON-RPC servers disagree wildly on error codes, so callers classify
//! failures by inspecting the stringified error. All matching is
//! case-insensitive substring search.

const RATE_LIMIT_MARKERS: [&str; 4] =
    ["429", "rate limit", "too many requests", "quota exceeded"];

const TIMEOUT_MARKERS: [&str; 4] = ["timeout", "etimedout", "econnreset", "socket"];

const BLOCK_RANGE_MARKERS: [&str; 3] =
    ["block range", "query returned more than", "exceeds max"];

/// Whether the error indicates the provider is rate limiting us.
#[must_use]
pub fn is_rate_limit_error(message: &str) -> bool {
    contains_any(message, &RATE_LIMIT_MARKERS)
}

/// Whether the error indicates a transport-level timeout or reset.
#[must_use]
pub fn is_timeout_error(message: &str) -> bool {
    contains_any(message, &TIMEOUT_MARKERS)
}

/// Whether the error indicates the requested `eth_getLogs` block span is
/// wider than the provider accepts.
#[must_use]
pub fn is_block_range_error(message: &str) -> bool {
    contains_any(message, &BLOCK_RANGE_MARKERS)
}

fn contains_any(message: &str, markers: &[&str]) -> bool {
    let lowered = message.to_lowercase();
    markers.iter().any(|marker| lowered.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_markers_match() {
        assert!(is_rate_limit_error("HTTP status 429 returned"));
        assert!(is_rate_limit_error("Rate Limit exceeded"));
        assert!(is_rate_limit_error("Too Many Requests"));
        assert!(is_rate_limit_error("daily quota exceeded for key"));
    }

    #[test]
    fn timeout_markers_match() {
        assert!(is_timeout_error("request Timeout after 30s"));
        assert!(is_timeout_error("connect ETIMEDOUT 1.2.3.4:443"));
        assert!(is_timeout_error("read ECONNRESET"));
        assert!(is_timeout_error("socket hang up"));
    }

    #[test]
    fn block_range_markers_match() {
        assert!(is_block_range_error("Block Range too large"));
        assert!(is_block_range_error("query returned more than 10000 results"));
        assert!(is_block_range_error("requested span exceeds max allowed"));
    }

    #[test]
    fn empty_message_matches_nothing() {
        assert!(!is_rate_limit_error(""));
        assert!(!is_timeout_error(""));
        assert!(!is_block_range_error(""));
    }

    #[test]
    fn unrelated_errors_match_nothing() {
        let message = "execution reverted: insufficient balance";
        assert!(!is_rate_limit_error(message));
        assert!(!is_timeout_error(message));
        assert!(!is_block_range_error(message));
    }
}
