use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use common::status::AuthMode;

use super::{is_auth_failure, StreamTarget, TransportError};
use crate::engine::EngineMsg;

/// Check whether the stream endpoint accepts us, and with which auth mode.
///
/// Only response headers are awaited; the body is dropped unread.
pub(crate) async fn probe(
    client: &Client,
    client_url: &str,
    token: Option<&str>,
    timeout: Duration,
) -> Result<AuthMode, TransportError> {
    let attempt = async {
        let mut last = TransportError::Timeout;
        for mode in [AuthMode::Query, AuthMode::Bearer] {
            let target = StreamTarget::new(client_url, token, mode)?;
            let response = target
                .request(client, true)
                .send()
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let status = response.status();
            if status.is_success() {
                return Ok(mode);
            }
            if !is_auth_failure(status) {
                return Err(TransportError::Status(status));
            }
            last = TransportError::Auth(status);
        }
        Err(last)
    };
    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| TransportError::Timeout)?
}

/// Run one probe and report the outcome to the engine
pub(crate) async fn run_probe(
    client: Client,
    client_url: String,
    token: Option<String>,
    timeout: Duration,
    generation: u64,
    cancel: CancellationToken,
    tx: flume::Sender<EngineMsg>,
) {
    let result = tokio::select! {
        _ = cancel.cancelled() => return,
        result = probe(&client, &client_url, token.as_deref(), timeout) => result,
    };
    let _ = tx.send(EngineMsg::Probe { generation, result });
}
