use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs for the execution loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Retries granted to an action whose observation reports a
    /// transient failure, before it escalates to permanent.
    /// Default: 2
    pub max_transient_retries: u32,

    /// Base backoff between transient retries; doubles per attempt.
    /// Default: 300
    pub retry_backoff_ms: u64,

    /// How long a pending confirmation may stay unanswered before it
    /// auto-resolves as declined.
    /// Default: 120_000 (2 minutes)
    pub confirmation_wait_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_transient_retries: 2,
            retry_backoff_ms: 300,
            confirmation_wait_ms: 120_000,
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tight budgets for tests.
    pub fn minimal() -> Self {
        Self {
            max_transient_retries: 2,
            retry_backoff_ms: 1,
            confirmation_wait_ms: 50,
        }
    }

    pub fn retries(mut self, count: u32) -> Self {
        self.max_transient_retries = count;
        self
    }

    pub fn backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    pub fn confirmation_wait_ms(mut self, ms: u64) -> Self {
        self.confirmation_wait_ms = ms;
        self
    }

    pub fn confirmation_wait(&self) -> Duration {
        Duration::from_millis(self.confirmation_wait_ms)
    }

    /// Backoff for the given 0-indexed retry attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(1 << attempt.min(16)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.max_transient_retries, 2);
        assert_eq!(config.confirmation_wait_ms, 120_000);
    }

    #[test]
    fn backoff_doubles() {
        let config = ControllerConfig::new().backoff_ms(100);
        assert_eq!(config.backoff_for(0), Duration::from_millis(100));
        assert_eq!(config.backoff_for(1), Duration::from_millis(200));
        assert_eq!(config.backoff_for(2), Duration::from_millis(400));
    }
}
