//! Retry policy shared by every provider call.
//!
//! One object owns the attempt budget, the backoff schedule, and detection of
//! error messages that indicate the client is being throttled or cut off.

use super::provider::ProviderError;
use std::time::Duration;

/// Substrings (matched case-insensitively) that mark a network error as a
/// rate-limit or connection-reset symptom.
pub const DEFAULT_RATE_LIMIT_SIGNATURES: &[&str] = &[
    "connection reset",
    "reset by peer",
    "connection aborted",
    "connection closed",
    "remote end closed",
    "remotedisconnected",
    "broken pipe",
    "too many requests",
];

/// How a failed attempt should be waited out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Linear step: `backoff_step × attempt_number`.
    Linear(Duration),
    /// Fixed cooldown after a rate-limit / connection-reset signature.
    Cooldown(Duration),
}

impl Backoff {
    pub fn duration(self) -> Duration {
        match self {
            Backoff::Linear(d) | Backoff::Cooldown(d) => d,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    attempts: u32,
    backoff_step: Duration,
    cooldown: Duration,
    signatures: Vec<String>,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff_step: Duration, cooldown: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff_step,
            cooldown,
            signatures: DEFAULT_RATE_LIMIT_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Replace the rate-limit signatures. Matching is case-insensitive.
    pub fn with_signatures<I, S>(mut self, signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signatures = signatures
            .into_iter()
            .map(|s| s.into().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }

    /// Retry policy with no waiting, for tests and dry runs.
    pub fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Total attempts per instrument (always at least one).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn backoff_step(&self) -> Duration {
        self.backoff_step
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn signatures(&self) -> &[String] {
        &self.signatures
    }

    /// True when a network error message looks like throttling or a reset.
    pub fn matches_rate_limit_signature(&self, message: &str) -> bool {
        let lowered = message.to_lowercase();
        self.signatures.iter().any(|sig| lowered.contains(sig.as_str()))
    }

    /// Wait after failed attempt `attempt_number` (1-based) before the next.
    ///
    /// Returns `None` after the last attempt: there is nothing left to wait for.
    pub fn backoff_after(&self, attempt_number: u32, error: &ProviderError) -> Option<Backoff> {
        if attempt_number >= self.attempts {
            return None;
        }

        let linear = self.backoff_step.saturating_mul(attempt_number.max(1));
        let backoff = match error {
            ProviderError::Network(message) if self.matches_rate_limit_signature(message) => {
                Backoff::Cooldown(self.cooldown)
            }
            ProviderError::RateLimited {
                retry_after_secs: Some(secs),
            } => Backoff::Linear(linear.max(Duration::from_secs(*secs))),
            _ => Backoff::Linear(linear),
        };
        Some(backoff)
    }
}

impl Default for RetryPolicy {
    /// Three attempts, 15 s linear step, 30 s cooldown on reset signatures.
    fn default() -> Self {
        Self::new(3, Duration::from_secs(15), Duration::from_secs(30))
    }
}
