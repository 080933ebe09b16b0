//! Socket-status bridge input.
//!
//! The desktop shell relays its socket notifications as JSON objects
//! (`{status, url, message}`), one per line. They are parsed here and fed to
//! the engine; malformed lines are skipped.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use common::event::{EventParseError, StatusEvent};

use crate::engine::{EngineError, EngineHandle};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("invalid status payload: {0}")]
    Parse(#[from] EventParseError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse one raw notification and hand it to the engine
pub async fn forward_status(handle: &EngineHandle, raw: &str) -> Result<(), BridgeError> {
    let status = StatusEvent::from_json(raw)?;
    handle.socket_status(status).await?;
    Ok(())
}

/// Forward every line of `reader` until EOF. Returns how many notifications
/// were delivered.
pub async fn run_lines<R>(reader: R, handle: &EngineHandle) -> Result<usize, BridgeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut delivered = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match forward_status(handle, line).await {
            Ok(()) => delivered += 1,
            Err(BridgeError::Parse(e)) => tracing::warn!("skipping bridge line: {}", e),
            Err(e) => return Err(e),
        }
    }
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::engine::Engine;
    use crate::storage::MemoryStore;
    use crate::testkit::{eventually, test_config, FakeControlPlane};

    #[tokio::test]
    async fn test_run_lines_skips_garbage() {
        let (engine, handle) = Engine::new(
            test_config(),
            Arc::new(FakeControlPlane::new()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        let task = tokio::spawn(engine.run());

        let input = concat!(
            "{\"status\":\"connected\",\"url\":\"ws://127.0.0.1:7938/ws\"}\n",
            "not json\n",
            "\n",
            "{\"status\":\"disconnected\",\"message\":\"socket closed\"}\n",
        );
        let delivered = run_lines(input.as_bytes(), &handle).await.unwrap();
        assert_eq!(delivered, 2);

        eventually(Duration::from_secs(2), || async {
            let snapshot = handle.snapshot().await?;
            Ok(!snapshot.status.bridge_active
                && snapshot
                    .connection_log
                    .iter()
                    .any(|e| e.message == "socket closed"))
        })
        .await
        .unwrap();

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
