use std::time::{Duration, Instant};

use reqwest::{Client, Response};
use tokio_util::sync::CancellationToken;

use common::event::{FrameDecoder, SyncEvent};

use super::{is_auth_failure, StreamTarget, TransportError};
use crate::engine::EngineMsg;

/// Lifecycle of one stream connection, tagged with the generation it was
/// started under
#[derive(Debug)]
pub enum StreamMsg {
    Opened {
        generation: u64,
        latency: Duration,
    },
    Events {
        generation: u64,
        events: Vec<SyncEvent>,
    },
    Closed {
        generation: u64,
        error: TransportError,
    },
}

/// Open the push stream and forward decoded events until it ends or `cancel`
/// fires. A cancelled reader sends nothing further.
pub(crate) async fn run_stream(
    client: Client,
    target: StreamTarget,
    generation: u64,
    cancel: CancellationToken,
    tx: flume::Sender<EngineMsg>,
) {
    let error = tokio::select! {
        _ = cancel.cancelled() => return,
        error = read_stream(&client, &target, generation, &tx) => error,
    };
    if cancel.is_cancelled() {
        return;
    }
    let _ = tx.send(EngineMsg::Stream(StreamMsg::Closed { generation, error }));
}

async fn open(client: &Client, target: &StreamTarget) -> Result<Response, TransportError> {
    let response = target
        .request(client, true)
        .send()
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    let status = response.status();

    let response = if is_auth_failure(status) && target.token_in_url() {
        tracing::debug!("stream rejected header auth ({}), retrying with url token", status);
        target
            .request(client, false)
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?
    } else {
        response
    };

    let status = response.status();
    if is_auth_failure(status) {
        return Err(TransportError::Auth(status));
    }
    if !status.is_success() {
        return Err(TransportError::Status(status));
    }
    if response.content_length() == Some(0) {
        return Err(TransportError::MissingBody);
    }
    Ok(response)
}

async fn read_stream(
    client: &Client,
    target: &StreamTarget,
    generation: u64,
    tx: &flume::Sender<EngineMsg>,
) -> TransportError {
    let started = Instant::now();
    let mut response = match open(client, target).await {
        Ok(response) => response,
        Err(e) => return e,
    };
    let opened = StreamMsg::Opened {
        generation,
        latency: started.elapsed(),
    };
    if tx.send(EngineMsg::Stream(opened)).is_err() {
        return TransportError::StreamEnded;
    }

    let mut decoder = FrameDecoder::new();
    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return TransportError::StreamEnded,
            Err(e) => return TransportError::Read(e.to_string()),
        };

        let mut events = Vec::new();
        for payload in decoder.push(&chunk) {
            match SyncEvent::from_json(&payload) {
                Ok(decoded) => events.extend(decoded),
                Err(e) => tracing::warn!("dropping stream payload: {}", e),
            }
        }
        if events.is_empty() {
            continue;
        }
        if tx
            .send(EngineMsg::Stream(StreamMsg::Events { generation, events }))
            .is_err()
        {
            return TransportError::StreamEnded;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::status::AuthMode;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(body.to_string())
    }

    async fn collect(server: &MockServer, mode: AuthMode) -> Vec<StreamMsg> {
        let target = StreamTarget::new(&server.uri(), Some("tok"), mode).unwrap();
        let (tx, rx) = flume::unbounded();
        run_stream(Client::new(), target, 7, CancellationToken::new(), tx).await;
        rx.drain()
            .map(|msg| match msg {
                EngineMsg::Stream(msg) => msg,
                other => panic!("unexpected message {:?}", other),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_stream_decodes_events_then_closes() {
        let server = MockServer::start().await;
        let body = concat!(
            ": keep-alive\n\n",
            "event: sync\n",
            "data: {\"path\":\"alice@x.org/a.csv\",\"state\":\"syncing\",\"progress\":0.5}\n\n",
            "data: {not json}\n\n",
            "data: {\"summary\":{\"pending\":1,\"syncing\":2,\"completed\":3,\"error\":0}}\n\n",
        );
        Mock::given(method("GET"))
            .and(path("/v1/sync/events"))
            .and(query_param("token", "tok"))
            .respond_with(sse(body))
            .mount(&server)
            .await;

        let msgs = collect(&server, AuthMode::Query).await;
        assert!(matches!(msgs[0], StreamMsg::Opened { generation: 7, .. }));
        let events: Vec<&SyncEvent> = msgs
            .iter()
            .filter_map(|m| match m {
                StreamMsg::Events { events, .. } => Some(events),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SyncEvent::File(f) if f.progress == Some(50.0)));
        assert!(matches!(events[1], SyncEvent::Summary(s) if s.completed == 3));
        assert!(matches!(
            msgs.last(),
            Some(StreamMsg::Closed { error: TransportError::StreamEnded, .. })
        ));
    }

    #[tokio::test]
    async fn test_auth_retry_without_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sync/events"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/sync/events"))
            .respond_with(sse(": ok\n\n"))
            .expect(1)
            .mount(&server)
            .await;

        let msgs = collect(&server, AuthMode::Query).await;
        assert!(matches!(msgs[0], StreamMsg::Opened { .. }));
    }

    #[tokio::test]
    async fn test_bearer_auth_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let msgs = collect(&server, AuthMode::Bearer).await;
        assert_eq!(msgs.len(), 1);
        assert!(matches!(
            msgs[0],
            StreamMsg::Closed { error: TransportError::Auth(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_reader_is_silent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(sse(": ok\n\n").set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let target = StreamTarget::new(&server.uri(), None, AuthMode::Query).unwrap();
        let (tx, rx) = flume::unbounded();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_stream(Client::new(), target, 1, cancel.clone(), tx));
        cancel.cancel();
        task.await.unwrap();
        assert!(rx.is_empty());
    }
}
