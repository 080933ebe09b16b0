use tokio::sync::watch;
use tokio::task::JoinHandle;

use common::version::build_info;

/// Log panics through tracing before the default hook runs
pub fn register_panic_logger() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(%location, "panic: {}", message);
        default_hook(info);
    }));
}

pub fn report_build_info() {
    let info = build_info();
    tracing::info!(
        version = %info.version,
        git_hash = %info.short_hash(),
        profile = %info.profile,
        target = %info.target,
        "syncscope starting"
    );
}

/// Resolve once Ctrl-C is received. Every clone of the returned receiver
/// observes the change.
pub fn graceful_shutdown_blocker() -> (JoinHandle<()>, watch::Receiver<()>) {
    let (tx, rx) = watch::channel(());
    let handle = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("shutdown signal received");
        let _ = tx.send(());
    });
    (handle, rx)
}
