use std::cmp;
use std::time::Duration;

use crate::config::ReconnectConfig;

/// Linear reconnect backoff with a cap and a bounded number of attempts.
///
/// The counter only grows while sessions keep failing before they reach
/// streaming; `reset` is called once a session is healthy again.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    attempts: u32,
    max_attempts: u32,
    step_secs: u64,
    max_secs: u64,
}

impl ReconnectBackoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            attempts: 0,
            max_attempts: config.max_attempts,
            step_secs: config.backoff_step_secs,
            max_secs: config.backoff_max_secs,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Registers a failed session. Returns the delay before the next attempt,
    /// or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.max_attempts {
            return None;
        }
        let backoff = self.step_secs.saturating_mul(self.attempts as u64);
        Some(Duration::from_secs(cmp::min(backoff, self.max_secs)))
    }
}
