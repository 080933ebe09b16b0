mod utils;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use utils::{graceful_shutdown_blocker, register_panic_logger, report_build_info};

use crate::control_plane::DaemonControlPlane;
use crate::engine::{Engine, EngineError, EngineHandle};
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::Config;

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("no daemon config path configured")]
    MissingDaemonConfig,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("engine did not stop within {0:?}")]
    ShutdownTimeout(Duration),
    #[error("engine task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Install the global subscriber. Logs go to stderr so stdout stays free for
/// command output; keep the guard alive for as long as logs should flush.
pub fn init_tracing(log_level: tracing::Level) -> WorkerGuard {
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    let env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_writer)
        .with_filter(env_filter);

    // a second init (tests, repeated ops) is not an error worth failing on
    let _ = tracing_subscriber::registry().with(stderr_layer).try_init();
    guard
}

/// Wire an engine to the daemon described by `config`
pub fn build_engine(config: &Config) -> Result<(Engine, EngineHandle), ProcessError> {
    let daemon_config_path = config
        .daemon_config_path
        .clone()
        .ok_or(ProcessError::MissingDaemonConfig)?;
    let control_plane = DaemonControlPlane::new(
        daemon_config_path,
        config.data_dir.clone(),
        config.identity.clone(),
        config.timings.request_timeout,
    );
    let store: Arc<dyn KeyValueStore> = match &config.state_dir {
        Some(dir) => Arc::new(FileStore::new(dir)),
        None => Arc::new(MemoryStore::new()),
    };
    Ok(Engine::new(config.clone(), Arc::new(control_plane), store)?)
}

/// Start the engine on its own task
pub fn spawn_engine(config: &Config) -> Result<(EngineHandle, JoinHandle<()>), ProcessError> {
    let (engine, handle) = build_engine(config)?;
    let task = tokio::spawn(engine.run());
    Ok((handle, task))
}

/// Ask the engine to stop and wait for it to flush its logs
pub async fn shutdown_engine(handle: &EngineHandle, task: JoinHandle<()>) -> Result<(), ProcessError> {
    // an engine that already stopped is fine
    let _ = handle.shutdown().await;
    match timeout(FINAL_SHUTDOWN_TIMEOUT, task).await {
        Ok(joined) => Ok(joined?),
        Err(_) => Err(ProcessError::ShutdownTimeout(FINAL_SHUTDOWN_TIMEOUT)),
    }
}
