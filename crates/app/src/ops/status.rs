use std::fmt::Write;

use clap::Args;

use common::event::{FileEvent, QueueSummary, SyncEvent};
use common::queue::QueueStatus;
use common::status::DaemonState;
use common::tree::Rank;
use service::control_plane::{ControlPlane, ControlPlaneError};

/// Files listed under "active" at most
const MAX_ACTIVE: usize = 10;

#[derive(Args, Debug, Clone)]
pub struct Status;

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error(transparent)]
    State(#[from] crate::state::StateError),
    #[error("status failed: {0}")]
    ControlPlane(#[from] ControlPlaneError),
}

#[async_trait::async_trait]
impl crate::op::Op for Status {
    type Error = StatusError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.load_state()?;
        let cp = super::control_plane(&state);

        let daemon = match cp.daemon_state().await {
            Ok(daemon) => daemon,
            Err(e) if e.is_unavailable() => return Ok(format!("daemon: unreachable ({})", e)),
            Err(e) => return Err(e.into()),
        };
        // a running daemon may still refuse the queue call; show what we have
        let queue = if daemon.running {
            cp.queue_status().await.ok()
        } else {
            None
        };
        Ok(render(&daemon, queue.as_ref()))
    }
}

fn render(daemon: &DaemonState, queue: Option<&QueueStatus>) -> String {
    let mut out = String::new();
    if !daemon.running {
        out.push_str("daemon: not running");
        return out;
    }

    let _ = write!(out, "daemon: running");
    if let Some(pid) = daemon.pid {
        let _ = write!(out, " (pid {})", pid);
    }
    if let Some(mode) = &daemon.mode {
        let _ = write!(out, " mode {}", mode);
    }
    if let Some(url) = &daemon.client_url {
        let _ = write!(out, "\nendpoint: {}", url);
    }
    if let Some(email) = &daemon.email {
        let _ = write!(out, "\nidentity: {}", email);
    }
    let _ = write!(out, "\ntraffic: tx {} B / rx {} B", daemon.tx_bytes, daemon.rx_bytes);

    let Some(queue) = queue else {
        out.push_str("\nqueue: unavailable");
        return out;
    };

    let events = queue.to_events();
    let files: Vec<&FileEvent> = events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::File(file) => Some(file),
            _ => None,
        })
        .collect();
    let summary = events
        .iter()
        .find_map(|e| match e {
            SyncEvent::Summary(summary) => Some(*summary),
            _ => None,
        })
        .unwrap_or_else(|| count(&files));

    let _ = write!(
        out,
        "\nqueue: pending {}, syncing {}, completed {}, error {}",
        summary.pending, summary.syncing, summary.completed, summary.error
    );
    if let Some(connected) = queue.websocket_connected() {
        let _ = write!(out, "\nwebsocket: {}", if connected { "connected" } else { "disconnected" });
    }

    let active: Vec<&&FileEvent> = files
        .iter()
        .filter(|f| f.state.is_active() || f.state.rank() == Rank::Error)
        .take(MAX_ACTIVE)
        .collect();
    if !active.is_empty() {
        out.push_str("\nactive:");
        for file in active {
            let _ = write!(out, "\n  {:<11} ", file.state);
            if let Some(progress) = file.progress {
                let _ = write!(out, "{:>3.0}% ", progress);
            }
            out.push_str(&file.path);
            if let Some(error) = &file.error {
                let _ = write!(out, " ({})", error);
            }
        }
    }
    out
}

fn count(files: &[&FileEvent]) -> QueueSummary {
    let mut summary = QueueSummary::default();
    for file in files {
        match file.state.rank() {
            Rank::Completed => summary.completed += 1,
            Rank::Pending => summary.pending += 1,
            Rank::Syncing => summary.syncing += 1,
            Rank::Error => summary.error += 1,
        }
    }
    summary
}
