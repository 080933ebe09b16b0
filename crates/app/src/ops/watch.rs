use std::fmt::Write;
use std::time::Duration;

use clap::Args;
use tokio::io::BufReader;

use common::status::TransportMode;
use service::bridge::run_lines;
use service::process::{
    graceful_shutdown_blocker, init_tracing, register_panic_logger, report_build_info,
    shutdown_engine, spawn_engine, ProcessError,
};
use service::Snapshot;

#[derive(Args, Debug, Clone)]
pub struct Watch {
    /// Seconds between status lines
    #[arg(long, default_value_t = 2)]
    pub interval: u64,

    /// Recent activity entries printed with each status line
    #[arg(long, default_value_t = 3)]
    pub activity: usize,

    /// Read socket-status notifications from stdin, one JSON object per line
    #[arg(long)]
    pub bridge_stdin: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("state error: {0}")]
    State(#[from] crate::state::StateError),

    #[error("engine failed: {0}")]
    Process(#[from] ProcessError),
}

#[async_trait::async_trait]
impl crate::op::Op for Watch {
    type Error = WatchError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.load_state()?;
        let config = state.service_config()?;

        let _guard = init_tracing(config.log_level);
        register_panic_logger();
        report_build_info();

        let (_waiter, mut shutdown_rx) = graceful_shutdown_blocker();
        let (handle, task) = spawn_engine(&config)?;

        if self.bridge_stdin {
            let bridge = handle.clone();
            tokio::spawn(async move {
                match run_lines(BufReader::new(tokio::io::stdin()), &bridge).await {
                    Ok(n) => tracing::info!("Bridge input closed after {} notifications", n),
                    Err(e) => tracing::warn!("Bridge input failed: {}", e),
                }
            });
        }

        let mut ticker = tokio::time::interval(Duration::from_secs(self.interval.max(1)));
        let mut updates = 0usize;
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    println!("{}", render(&handle.latest(), self.activity));
                    updates += 1;
                }
            }
        }

        shutdown_engine(&handle, task).await?;
        Ok(format!("watch ended after {} updates", updates))
    }
}

fn render(snapshot: &Snapshot, activity: usize) -> String {
    let status = &snapshot.status;
    let mut out = format!(
        "{} {:<10}",
        snapshot.taken_at.format("%H:%M:%S"),
        status.transport
    );
    if !status.running {
        out.push_str(" daemon offline");
    } else if status.bridge_active {
        out.push_str(" via socket bridge");
    } else if status.fallback {
        out.push_str(" fallback");
    }

    let health = &snapshot.health;
    let _ = write!(out, " |{}|", health.sparkline);
    if let Some(avg) = health.average_ms {
        let _ = write!(out, " avg {:.0}ms", avg);
    }
    let summary = &snapshot.summary;
    let _ = write!(
        out,
        " | {} pending {} syncing {} error",
        summary.pending, summary.syncing, summary.error
    );

    if status.transport != TransportMode::Stream {
        if let Some(last) = snapshot.recent_connections(1).first() {
            let _ = write!(out, "\n    last: {}", last.message);
        }
    }

    for entry in snapshot.recent_activity(activity) {
        let _ = write!(
            out,
            "\n    {} {:<11} {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.status,
            entry.path
        );
    }
    out
}
