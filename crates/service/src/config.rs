use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use common::backoff::{DEFAULT_MAX_FAILURES, DEFAULT_RECONNECT_DELAYS};
use common::ledger::{ACTIVITY_LOG_CAPACITY, CONNECTION_LOG_CAPACITY};

/// Every timer the engine runs
#[derive(Debug, Clone)]
pub struct Timings {
    /// control-plane status poll, runs for the engine's life
    pub status_poll: Duration,
    /// snapshot publish tick, no network
    pub ui_refresh: Duration,
    /// poller cadence while transfers are active
    pub fast_poll: Duration,
    /// poller cadence while idle
    pub slow_poll: Duration,
    pub probe_timeout: Duration,
    /// minimum spacing between two probes
    pub probe_interval: Duration,
    /// delay before the stream retry that follows a successful probe
    pub probe_reconnect_delay: Duration,
    pub reconnect_delays: Vec<Duration>,
    pub max_stream_failures: u32,
    /// `daemon unavailable` is logged at most once per window
    pub unavailable_log_window: Duration,
    /// timeout for plain control-plane requests
    pub request_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            status_poll: Duration::from_secs(3),
            ui_refresh: Duration::from_secs(1),
            fast_poll: Duration::from_secs(1),
            slow_poll: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(3),
            probe_interval: Duration::from_secs(15),
            probe_reconnect_delay: Duration::from_secs(1),
            reconnect_delays: DEFAULT_RECONNECT_DELAYS.to_vec(),
            max_stream_failures: DEFAULT_MAX_FAILURES,
            unavailable_log_window: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// daemon data directory holding `datasites/` and `.syftignore`,
    ///  if not set the `data_dir` from the daemon config file is used
    pub data_dir: Option<PathBuf>,
    /// path to the daemon's JSON config file (client_url, client_token, ...)
    pub daemon_config_path: Option<PathBuf>,
    /// identity of the local datasite, if not set the daemon's email is used
    pub identity: Option<String>,
    pub trusted_datasites: Vec<String>,
    /// where the activity and connection logs are persisted,
    ///  if not set they only live in memory
    pub state_dir: Option<PathBuf>,
    /// restrict the push stream to this origin; any other origin
    ///  goes straight to polling
    pub caller_origin: Option<Url>,
    pub activity_capacity: usize,
    pub connection_capacity: usize,

    // misc
    pub log_level: tracing::Level,
    pub timings: Timings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            daemon_config_path: None,
            identity: None,
            trusted_datasites: Vec::new(),
            state_dir: None,
            caller_origin: None,
            activity_capacity: ACTIVITY_LOG_CAPACITY,
            connection_capacity: CONNECTION_LOG_CAPACITY,
            log_level: tracing::Level::INFO,
            timings: Timings::default(),
        }
    }
}

impl Config {
    /// Check values that would make the engine misbehave rather than fail
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.activity_capacity == 0 || self.connection_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        let t = &self.timings;
        if t.status_poll.is_zero() || t.ui_refresh.is_zero() || t.fast_poll.is_zero() || t.slow_poll.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if t.reconnect_delays.is_empty() {
            return Err(ConfigError::NoReconnectDelays);
        }
        if let Some(origin) = &self.caller_origin {
            if !origin.origin().is_tuple() {
                return Err(ConfigError::OpaqueOrigin(origin.to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("log capacities must be non-zero")]
    ZeroCapacity,
    #[error("timer intervals must be non-zero")]
    ZeroInterval,
    #[error("at least one reconnect delay is required")]
    NoReconnectDelays,
    #[error("caller origin has no host: {0}")]
    OpaqueOrigin(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timings.reconnect_delays.len(), 5);
        assert_eq!(config.timings.max_stream_failures, 2);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = Config {
            activity_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroCapacity)));

        config.activity_capacity = 10;
        config.caller_origin = Some(Url::parse("data:text/plain,hi").unwrap());
        assert!(matches!(config.validate(), Err(ConfigError::OpaqueOrigin(_))));
    }
}
