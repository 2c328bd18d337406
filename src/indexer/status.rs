//! Human-readable status report for `chaintap status`.

use crate::types::Chain;

/// Aggregated status of one configured contract.
#[derive(Clone, Debug)]
pub struct ContractStatus {
    pub address: String,
    pub name: Option<String>,
    pub chain: Chain,
    pub events: Vec<String>,
    pub last_block: u64,
    pub total_events: u64,
    pub status: String,
    /// Unix seconds of the last commit; 0 when never synced.
    pub last_sync: u64,
}

impl ContractStatus {
    /// Render the block consumed by the `status` subcommand.
    #[must_use]
    pub fn render(&self, now: u64) -> String {
        let contract = match &self.name {
            Some(name) => format!("{} ({name})", self.address),
            None => self.address.clone(),
        };
        let last_sync = if self.last_sync == 0 {
            "never".to_string()
        } else {
            relative_age(now, self.last_sync)
        };

        format!(
            "Contract: {contract}\n  \
             Chain: {} ({})\n  \
             Events: {}\n  \
             Last synced block: {}\n  \
             Total events: {}\n  \
             Status: {}\n  \
             Last sync: {last_sync}",
            self.chain,
            self.chain.id(),
            self.events.join(", "),
            group_digits(self.last_block),
            group_digits(self.total_events),
            self.status,
        )
    }
}

/// Group digits with commas: `19000050` becomes `"19,000,050"`.
#[must_use]
pub fn group_digits(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Coarse "N seconds/minutes/hours/days ago" rendering.
#[must_use]
pub fn relative_age(now: u64, then: u64) -> String {
    let elapsed = now.saturating_sub(then);
    let (amount, unit) = if elapsed < 60 {
        (elapsed, "second")
    } else if elapsed < 3600 {
        (elapsed / 60, "minute")
    } else if elapsed < 86_400 {
        (elapsed / 3600, "hour")
    } else {
        (elapsed / 86_400, "day")
    };
    let plural = if amount == 1 { "" } else { "s" };
    format!("{amount} {unit}{plural} ago")
}
