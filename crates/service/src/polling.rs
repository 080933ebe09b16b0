//! Adaptive queue polling, used only while the push stream is in fallback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use common::queue::QueueStatus;
use common::status::PollCadence;
use common::tree::SyncState;

use crate::control_plane::{ControlPlane, ControlPlaneError};
use crate::engine::EngineMsg;

/// Result of one poll tick
#[derive(Debug)]
pub struct PollOutcome {
    pub generation: u64,
    pub result: Result<QueueStatus, ControlPlaneError>,
    pub latency: Duration,
    pub cadence: PollCadence,
}

/// Fast while anything is moving, slow otherwise
pub fn choose_cadence(status: &QueueStatus, tree_active: bool) -> PollCadence {
    let queue_active = status
        .sync
        .as_ref()
        .is_some_and(|sync| {
            sync.files.iter().any(|f| {
                f.state
                    .parse::<SyncState>()
                    .is_ok_and(|s| s.is_active())
            })
        });
    if tree_active || queue_active || status.has_uploads_in_flight() {
        PollCadence::Fast
    } else {
        PollCadence::Slow
    }
}

/// Poll the queue until cancelled.
///
/// One loop per poller; the next delay is chosen from the response it just
/// received. `tree_active` is kept current by the engine.
pub(crate) async fn run_poller(
    control_plane: Arc<dyn ControlPlane>,
    generation: u64,
    cancel: CancellationToken,
    tx: flume::Sender<EngineMsg>,
    fast: Duration,
    slow: Duration,
    tree_active: Arc<AtomicBool>,
) {
    loop {
        let started = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = control_plane.queue_status() => result,
        };
        let latency = started.elapsed();
        let active = tree_active.load(Ordering::Relaxed);
        let cadence = match &result {
            Ok(status) => choose_cadence(status, active),
            Err(_) if active => PollCadence::Fast,
            Err(_) => PollCadence::Slow,
        };

        let outcome = PollOutcome {
            generation,
            result,
            latency,
            cadence,
        };
        if tx.send(EngineMsg::Poll(outcome)).is_err() {
            return;
        }

        let delay = match cadence {
            PollCadence::Fast => fast,
            PollCadence::Slow => slow,
        };
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(json: &str) -> QueueStatus {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_choose_cadence() {
        let idle = queue(r#"{"sync":{"files":[{"path":"a","state":"completed","progress":1}]}}"#);
        assert_eq!(choose_cadence(&idle, false), PollCadence::Slow);
        assert_eq!(choose_cadence(&idle, true), PollCadence::Fast);

        let syncing = queue(r#"{"sync":{"files":[{"path":"a","state":"syncing","progress":0.2}]}}"#);
        assert_eq!(choose_cadence(&syncing, false), PollCadence::Fast);

        let uploading = queue(
            r#"{"uploads":[{"id":"u1","key":"alice@x.org/a","state":"uploading","size":10,"uploadedBytes":2,"progress":0.2}]}"#,
        );
        assert_eq!(choose_cadence(&uploading, false), PollCadence::Fast);

        assert_eq!(choose_cadence(&QueueStatus::default(), false), PollCadence::Slow);
    }
}
