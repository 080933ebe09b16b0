//! Connection status owned by the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::QueueSummary;
use crate::health::{HealthSampler, HealthStats};

/// State reported by the daemon's `/v1/status` endpoint plus what the client
/// knows locally about the process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonState {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default, alias = "clientUrl")]
    pub client_url: Option<String>,
    #[serde(default, alias = "clientToken")]
    pub client_token: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default, alias = "txBytes")]
    pub tx_bytes: u64,
    #[serde(default, alias = "rxBytes")]
    pub rx_bytes: u64,
    #[serde(default)]
    pub email: Option<String>,
}

/// How the push stream authenticates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Token in the query string and a bearer header
    #[default]
    Query,
    /// Bearer header only
    Bearer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    #[default]
    Idle,
    Connecting,
    Stream,
    Polling,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportMode::Idle => "idle",
            TransportMode::Connecting => "connecting",
            TransportMode::Stream => "stream",
            TransportMode::Polling => "polling",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollCadence {
    Fast,
    Slow,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub running: bool,
    pub authenticated: bool,
    pub mode: Option<String>,
    pub backend: Option<String>,
    pub pid: Option<u32>,
    pub client_url: Option<String>,
    #[serde(skip)]
    pub client_token: Option<String>,
    pub email: Option<String>,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub transport: TransportMode,
    pub auth_mode: AuthMode,
    pub fallback: bool,
    pub poll_cadence: Option<PollCadence>,
    pub bridge_active: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub summary: QueueSummary,
    #[serde(skip)]
    health: HealthSampler,
}

impl ConnectionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the daemon's report in. Returns whether the stream endpoint or
    /// reachability changed, which is what transport decisions depend on.
    pub fn apply_daemon_state(&mut self, state: &DaemonState) -> bool {
        let changed = self.running != state.running
            || self.client_url != state.client_url
            || self.client_token != state.client_token;
        self.running = state.running;
        self.authenticated = state.client_token.as_deref().is_some_and(|t| !t.is_empty());
        self.mode = state.mode.clone();
        self.backend = state.backend.clone();
        self.pid = state.pid;
        self.client_url = state.client_url.clone();
        self.client_token = state.client_token.clone();
        self.email = state.email.clone().or(self.email.take());
        self.tx_bytes = state.tx_bytes;
        self.rx_bytes = state.rx_bytes;
        changed
    }

    /// The daemon could not be reached
    pub fn mark_offline(&mut self) -> bool {
        let changed = self.running;
        self.running = false;
        changed
    }

    pub fn health(&self) -> &HealthSampler {
        &self.health
    }

    pub fn health_mut(&mut self) -> &mut HealthSampler {
        &mut self.health
    }

    pub fn health_stats(&self) -> HealthStats {
        self.health.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_daemon_state_reports_endpoint_changes() {
        let mut status = ConnectionStatus::new();
        let state = DaemonState {
            running: true,
            client_url: Some("http://127.0.0.1:7938".into()),
            client_token: Some("tok".into()),
            ..Default::default()
        };
        assert!(status.apply_daemon_state(&state));
        assert!(status.authenticated);
        assert!(!status.apply_daemon_state(&state));

        assert!(status.mark_offline());
        assert!(!status.mark_offline());
    }

    #[test]
    fn test_token_not_serialized() {
        let mut status = ConnectionStatus::new();
        status.client_token = Some("secret".into());
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("secret"));
    }
}
