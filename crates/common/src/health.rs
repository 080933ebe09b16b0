//! Latency and check-interval sampling.
//!
//! Samples come only from traffic the engine already produces: successful
//! control-plane calls and stream connects feed latency, successful status
//! checks feed the interval history.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub const LATENCY_HISTORY_CAPACITY: usize = 60;
pub const CHECK_HISTORY_CAPACITY: usize = 60;
/// Check intervals shorter than this are bursts, not cadence
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(500);
pub const SPARKLINE_WIDTH: usize = 20;

const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Render the last [`SPARKLINE_WIDTH`] samples, left padded with spaces
pub fn sparkline(samples: &[u64]) -> String {
    let start = samples.len().saturating_sub(SPARKLINE_WIDTH);
    let window = &samples[start..];
    let mut out = " ".repeat(SPARKLINE_WIDTH - window.len());

    let (Some(min), Some(max)) = (window.iter().min(), window.iter().max()) else {
        return out;
    };
    let span = max - min;
    for sample in window {
        let level = if span == 0 {
            0
        } else {
            (((sample - min) as f64 / span as f64) * (LEVELS.len() - 1) as f64).round() as usize
        };
        out.push(LEVELS[level.min(LEVELS.len() - 1)]);
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthStats {
    pub samples: usize,
    pub average_ms: Option<f64>,
    pub last_ms: Option<u64>,
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub sparkline: String,
    pub check_interval_ms: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct HealthSampler {
    latency_history: VecDeque<u64>,
    check_history: VecDeque<u64>,
    last_check: Option<Instant>,
}

impl Default for HealthSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthSampler {
    pub fn new() -> Self {
        Self {
            latency_history: VecDeque::with_capacity(LATENCY_HISTORY_CAPACITY),
            check_history: VecDeque::with_capacity(CHECK_HISTORY_CAPACITY),
            last_check: None,
        }
    }

    pub fn record_latency(&mut self, latency: Duration) {
        if self.latency_history.len() == LATENCY_HISTORY_CAPACITY {
            self.latency_history.pop_front();
        }
        self.latency_history.push_back(latency.as_millis() as u64);
    }

    /// Record a successful status check at `now`.
    ///
    /// Returns whether an interval was stored. The first check only sets the
    /// reference point; a check closer than [`MIN_CHECK_INTERVAL`] to it is
    /// dropped and leaves the reference where it was.
    pub fn record_check(&mut self, now: Instant) -> bool {
        let Some(last) = self.last_check else {
            self.last_check = Some(now);
            return false;
        };
        let interval = now.saturating_duration_since(last);
        if interval < MIN_CHECK_INTERVAL {
            return false;
        }
        if self.check_history.len() == CHECK_HISTORY_CAPACITY {
            self.check_history.pop_front();
        }
        self.check_history.push_back(interval.as_millis() as u64);
        self.last_check = Some(now);
        true
    }

    pub fn latency_history(&self) -> Vec<u64> {
        self.latency_history.iter().copied().collect()
    }

    pub fn check_history(&self) -> Vec<u64> {
        self.check_history.iter().copied().collect()
    }

    pub fn average(&self) -> Option<f64> {
        if self.latency_history.is_empty() {
            return None;
        }
        let sum: u64 = self.latency_history.iter().sum();
        Some(sum as f64 / self.latency_history.len() as f64)
    }

    pub fn last(&self) -> Option<u64> {
        self.latency_history.back().copied()
    }

    pub fn min(&self) -> Option<u64> {
        self.latency_history.iter().min().copied()
    }

    pub fn max(&self) -> Option<u64> {
        self.latency_history.iter().max().copied()
    }

    pub fn sparkline(&self) -> String {
        sparkline(&self.latency_history())
    }

    pub fn stats(&self) -> HealthStats {
        let check_interval_ms = if self.check_history.is_empty() {
            None
        } else {
            let sum: u64 = self.check_history.iter().sum();
            Some(sum as f64 / self.check_history.len() as f64)
        };
        HealthStats {
            samples: self.latency_history.len(),
            average_ms: self.average(),
            last_ms: self.last(),
            min_ms: self.min(),
            max_ms: self.max(),
            sparkline: self.sparkline(),
            check_interval_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_cap_and_stats() {
        let mut sampler = HealthSampler::new();
        for ms in 1..=70 {
            sampler.record_latency(Duration::from_millis(ms));
        }
        assert_eq!(sampler.latency_history().len(), LATENCY_HISTORY_CAPACITY);
        assert_eq!(sampler.min(), Some(11));
        assert_eq!(sampler.max(), Some(70));
        assert_eq!(sampler.last(), Some(70));
        assert_eq!(sampler.average(), Some(40.5));
    }

    #[test]
    fn test_short_check_intervals_discarded() {
        let mut sampler = HealthSampler::new();
        let t0 = Instant::now();
        assert!(!sampler.record_check(t0));
        assert!(!sampler.record_check(t0 + Duration::from_millis(200)));
        assert!(!sampler.record_check(t0 + Duration::from_millis(450)));
        // measured from t0 since the short checks did not move the reference
        assert!(sampler.record_check(t0 + Duration::from_millis(600)));
        assert_eq!(sampler.check_history(), vec![600]);
        assert!(sampler.check_history().iter().all(|ms| *ms >= 500));
    }

    #[test]
    fn test_sparkline_shape() {
        assert_eq!(sparkline(&[]), " ".repeat(20));

        let flat = sparkline(&[5, 5, 5]);
        assert_eq!(flat.chars().count(), 20);
        assert!(flat.ends_with("▁▁▁"));
        assert!(flat.starts_with("                 "));

        let ramp: Vec<u64> = (0..30).collect();
        let line = sparkline(&ramp);
        assert_eq!(line.chars().count(), 20);
        assert_eq!(line.chars().next(), Some('▁'));
        assert_eq!(line.chars().last(), Some('█'));
    }
}
