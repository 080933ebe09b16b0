//! Reconnect schedule for the push stream.

use std::time::Duration;

pub const DEFAULT_RECONNECT_DELAYS: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Consecutive stream failures after which fallback becomes sticky
pub const DEFAULT_MAX_FAILURES: u32 = 2;

/// What to do after a stream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Reconnect(Duration),
    Fallback,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    delays: Vec<Duration>,
    max_failures: u32,
    attempt: usize,
    consecutive_failures: u32,
    fallback: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAYS.to_vec(), DEFAULT_MAX_FAILURES)
    }
}

impl ReconnectPolicy {
    pub fn new(delays: Vec<Duration>, max_failures: u32) -> Self {
        let delays = if delays.is_empty() {
            DEFAULT_RECONNECT_DELAYS.to_vec()
        } else {
            delays
        };
        Self {
            delays,
            max_failures: max_failures.max(1),
            attempt: 0,
            consecutive_failures: 0,
            fallback: false,
        }
    }

    /// Delay for a given attempt, saturating at the last entry
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.delays[attempt.min(self.delays.len() - 1)]
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn in_fallback(&self) -> bool {
        self.fallback
    }

    /// Register a terminal stream failure.
    ///
    /// Once the failure count reaches the limit fallback stays on until
    /// [`ReconnectPolicy::on_probe_success`].
    pub fn on_failure(&mut self) -> NextStep {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.fallback || self.consecutive_failures >= self.max_failures {
            self.fallback = true;
            return NextStep::Fallback;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        NextStep::Reconnect(delay)
    }

    /// Force fallback without counting a failure (e.g. cross-origin stream)
    pub fn force_fallback(&mut self) {
        self.fallback = true;
    }

    pub fn on_connected(&mut self) {
        self.attempt = 0;
        self.consecutive_failures = 0;
    }

    /// A probe answered: leave fallback and allow stream attempts again
    pub fn on_probe_success(&mut self) {
        self.fallback = false;
        self.consecutive_failures = 0;
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_table_saturates() {
        let policy = ReconnectPolicy::default();
        let expected = [1000, 2000, 5000, 10000, 30000, 30000, 30000];
        for (attempt, ms) in expected.iter().enumerate() {
            assert_eq!(policy.delay_for(attempt), Duration::from_millis(*ms));
        }
    }

    #[test]
    fn test_sticky_after_two_failures() {
        let mut policy = ReconnectPolicy::default();
        assert_eq!(policy.on_failure(), NextStep::Reconnect(Duration::from_secs(1)));
        assert_eq!(policy.on_failure(), NextStep::Fallback);
        assert!(policy.in_fallback());

        // a connect elsewhere does not clear fallback, only a probe does
        policy.on_connected();
        assert!(policy.in_fallback());
        assert_eq!(policy.on_failure(), NextStep::Fallback);

        policy.on_probe_success();
        assert!(!policy.in_fallback());
        assert_eq!(policy.on_failure(), NextStep::Reconnect(Duration::from_secs(1)));
    }

    #[test]
    fn test_success_resets_counters() {
        let mut policy = ReconnectPolicy::new(DEFAULT_RECONNECT_DELAYS.to_vec(), 10);
        for _ in 0..3 {
            policy.on_failure();
        }
        assert_eq!(policy.attempt(), 3);
        policy.on_connected();
        assert_eq!(policy.attempt(), 0);
        assert_eq!(policy.consecutive_failures(), 0);
        assert_eq!(policy.on_failure(), NextStep::Reconnect(Duration::from_secs(1)));
    }
}
