//! Push-stream transport.
//!
//! [`TransportManager`] decides whether a stream may be opened and with
//! which credentials; the stream itself and the probe run as scheduler
//! tasks that report back to the engine as messages.

use std::time::{Duration, Instant};

use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, StatusCode};
use url::Url;

use common::backoff::ReconnectPolicy;
use common::status::AuthMode;

use crate::config::Timings;

mod probe;
mod stream;

pub(crate) use probe::run_probe;
pub(crate) use stream::run_stream;
pub use stream::StreamMsg;

pub const EVENTS_PATH: &str = "v1/sync/events";

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("not authorized (HTTP {0})")]
    Auth(StatusCode),
    #[error("unexpected HTTP {0}")]
    Status(StatusCode),
    #[error("response has no body")]
    MissingBody,
    #[error("stream ended")]
    StreamEnded,
    #[error("read failed: {0}")]
    Read(String),
    #[error("timed out")]
    Timeout,
    #[error("invalid stream url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Why no stream was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    DaemonDown,
    NoEndpoint,
    BridgeActive,
    Fallback,
}

/// A resolved stream endpoint with its credentials
#[derive(Debug, Clone)]
pub struct StreamTarget {
    pub url: Url,
    pub token: Option<String>,
    pub mode: AuthMode,
}

impl StreamTarget {
    pub fn new(client_url: &str, token: Option<&str>, mode: AuthMode) -> Result<Self, TransportError> {
        let base = Url::parse(&format!("{}/", client_url.trim_end_matches('/')))?;
        let mut url = base.join(EVENTS_PATH)?;
        let token = token.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string);
        if let (AuthMode::Query, Some(token)) = (mode, token.as_deref()) {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(Self { url, token, mode })
    }

    pub fn token_in_url(&self) -> bool {
        self.mode == AuthMode::Query && self.token.is_some()
    }

    /// The url without its query, safe to log
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        url.set_query(None);
        url.to_string()
    }

    pub(crate) fn request(&self, client: &Client, with_header: bool) -> RequestBuilder {
        let mut builder = client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream");
        if with_header {
            if let Some(token) = &self.token {
                builder = builder.bearer_auth(token);
            }
        }
        builder
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

pub struct TransportManager {
    client: Client,
    policy: ReconnectPolicy,
    auth_mode: AuthMode,
    caller_origin: Option<Url>,
    probe_interval: Duration,
    probe_timeout: Duration,
    last_probe: Option<Instant>,
}

impl TransportManager {
    pub fn new(timings: &Timings, caller_origin: Option<Url>) -> Result<Self, TransportError> {
        // no overall timeout: the stream is long-lived
        let client = Client::builder()
            .connect_timeout(timings.request_timeout)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self {
            client,
            policy: ReconnectPolicy::new(timings.reconnect_delays.clone(), timings.max_stream_failures),
            auth_mode: AuthMode::default(),
            caller_origin,
            probe_interval: timings.probe_interval,
            probe_timeout: timings.probe_timeout,
            last_probe: None,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut ReconnectPolicy {
        &mut self.policy
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    pub fn set_auth_mode(&mut self, mode: AuthMode) {
        self.auth_mode = mode;
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Gate a stream attempt. The first failing condition wins.
    pub fn check_connect(
        &self,
        running: bool,
        client_url: Option<&str>,
        bridge_active: bool,
    ) -> Result<(), SkipReason> {
        if !running {
            return Err(SkipReason::DaemonDown);
        }
        if client_url.map(str::trim).unwrap_or_default().is_empty() {
            return Err(SkipReason::NoEndpoint);
        }
        if bridge_active {
            return Err(SkipReason::BridgeActive);
        }
        if self.policy.in_fallback() {
            return Err(SkipReason::Fallback);
        }
        Ok(())
    }

    /// Build the target for the preferred auth mode
    pub fn target(&self, client_url: &str, token: Option<&str>) -> Result<StreamTarget, TransportError> {
        StreamTarget::new(client_url, token, self.auth_mode)
    }

    /// Whether a restricted caller origin rules this target out
    pub fn is_cross_origin(&self, target: &StreamTarget) -> bool {
        match &self.caller_origin {
            Some(origin) => origin.origin() != target.url.origin(),
            None => false,
        }
    }

    /// Claim the probe slot if the last probe is old enough
    pub fn claim_probe(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_probe {
            if now.saturating_duration_since(last) < self.probe_interval {
                return false;
            }
        }
        self.last_probe = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(origin: Option<&str>) -> TransportManager {
        TransportManager::new(&Timings::default(), origin.map(|o| Url::parse(o).unwrap())).unwrap()
    }

    #[test]
    fn test_target_modes() {
        let query = StreamTarget::new("http://127.0.0.1:7938", Some("tok"), AuthMode::Query).unwrap();
        assert_eq!(query.url.as_str(), "http://127.0.0.1:7938/v1/sync/events?token=tok");
        assert!(query.token_in_url());
        assert_eq!(query.redacted(), "http://127.0.0.1:7938/v1/sync/events");

        let bearer = StreamTarget::new("http://127.0.0.1:7938/", Some("tok"), AuthMode::Bearer).unwrap();
        assert_eq!(bearer.url.as_str(), "http://127.0.0.1:7938/v1/sync/events");
        assert!(!bearer.token_in_url());

        let anonymous = StreamTarget::new("http://h:1", None, AuthMode::Query).unwrap();
        assert!(anonymous.url.query().is_none());
    }

    #[test]
    fn test_check_connect_order() {
        let mut m = manager(None);
        assert_eq!(m.check_connect(false, Some("http://h"), false), Err(SkipReason::DaemonDown));
        assert_eq!(m.check_connect(true, None, false), Err(SkipReason::NoEndpoint));
        assert_eq!(m.check_connect(true, Some(" "), false), Err(SkipReason::NoEndpoint));
        assert_eq!(m.check_connect(true, Some("http://h"), true), Err(SkipReason::BridgeActive));
        m.policy_mut().force_fallback();
        assert_eq!(m.check_connect(true, Some("http://h"), false), Err(SkipReason::Fallback));
    }

    #[test]
    fn test_cross_origin() {
        let m = manager(Some("http://127.0.0.1:7938"));
        let same = m.target("http://127.0.0.1:7938", None).unwrap();
        let other = m.target("http://localhost:7938", None).unwrap();
        assert!(!m.is_cross_origin(&same));
        assert!(m.is_cross_origin(&other));
        assert!(!manager(None).is_cross_origin(&other));
    }

    #[test]
    fn test_probe_rate_limit() {
        let mut m = manager(None);
        let t0 = Instant::now();
        assert!(m.claim_probe(t0));
        assert!(!m.claim_probe(t0 + Duration::from_secs(14)));
        assert!(m.claim_probe(t0 + Duration::from_secs(15)));
    }
}
