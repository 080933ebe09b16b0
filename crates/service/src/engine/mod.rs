//! The sync-status engine.
//!
//! One [`Engine`] value owns the tree, both logs, the connection status, the
//! transport and every timer. It runs as a single task draining one flume
//! channel; I/O runs in spawned tasks that report back as [`EngineMsg`]s.
//! Observers hold an [`EngineHandle`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, oneshot, watch};

use common::backoff::NextStep;
use common::event::{StatusEvent, SyncEvent};
use common::ignore::IgnorePatterns;
use common::ledger::{Channel, ConnectionKind, ACTIVITY_LOG_KEY, CONNECTION_LOG_KEY};
use common::paths;
use common::queue::{QueueStatus, UploadAction};
use common::status::{AuthMode, ConnectionStatus, DaemonState, TransportMode};
use common::tree::{
    DiscoveryFile, NodeDetails, Sections, SharedWithMeItem, SyncNode, TrustedDatasites,
};

use crate::config::{Config, ConfigError};
use crate::control_plane::{ControlPlane, ControlPlaneError};
use crate::polling::{run_poller, PollOutcome};
use crate::reconciler::{Reconciler, RenderRequest, ToggleError, ToggleRequest};
use crate::scheduler::{Scheduler, TaskName};
use crate::storage::{load_list, KeyValueStore, Persister};
use crate::transport::{
    run_probe, run_stream, SkipReason, StreamMsg, TransportError, TransportManager,
};

mod handle;
mod snapshot;

pub use handle::EngineHandle;
pub use snapshot::Snapshot;

/// Render requests buffered per observer before it starts lagging
const RENDER_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
    #[error("engine is not running")]
    Closed,
    #[error("engine dropped the request")]
    Dropped,
    #[error(transparent)]
    Toggle(#[from] ToggleError),
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Requests coming from an [`EngineHandle`]
#[derive(Debug)]
pub enum Command {
    ToggleIgnore {
        path: String,
        reply: Reply<()>,
    },
    ListDir {
        path: Option<String>,
        reply: Reply<Vec<SyncNode>>,
    },
    Subscribe {
        path: String,
        is_folder: bool,
        reply: Reply<()>,
    },
    RefreshDiscovery,
    Details {
        path: String,
        reply: Reply<NodeDetails>,
    },
    SharedWithMe {
        reply: Reply<Vec<SharedWithMeItem>>,
    },
    SubscribeShared {
        path: String,
        reply: Reply<()>,
    },
    UnsubscribeShared {
        path: String,
        reply: Reply<()>,
    },
    IgnorePatterns {
        reply: Reply<IgnorePatterns>,
    },
    UploadAction {
        id: String,
        action: UploadAction,
        reply: Reply<()>,
    },
    SocketStatus(StatusEvent),
    SetTrusted(Vec<String>),
    ProbeNow,
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    Shutdown,
}

/// Everything the engine task reacts to
#[derive(Debug)]
pub enum EngineMsg {
    Tick {
        task: TaskName,
        generation: u64,
    },
    DaemonState {
        result: Result<DaemonState, ControlPlaneError>,
        latency: Duration,
    },
    Stream(StreamMsg),
    Probe {
        generation: u64,
        result: Result<AuthMode, TransportError>,
    },
    Poll(PollOutcome),
    Listing {
        parent: Option<String>,
        result: Result<Vec<SyncNode>, ControlPlaneError>,
        latency: Duration,
        reply: Option<Reply<Vec<SyncNode>>>,
    },
    Discovery {
        result: Result<Vec<DiscoveryFile>, ControlPlaneError>,
        latency: Duration,
    },
    Details {
        result: Result<NodeDetails, ControlPlaneError>,
        latency: Duration,
        reply: Reply<NodeDetails>,
    },
    ToggleDone {
        request: ToggleRequest,
        result: Result<(), ControlPlaneError>,
        latency: Duration,
        reply: Reply<()>,
    },
    /// An upload action went through; `queue` is the status fetched right
    /// after it
    UploadActionDone {
        queue: Result<QueueStatus, ControlPlaneError>,
        latency: Duration,
        reply: Reply<()>,
    },
    /// A control-plane call that needs no engine follow-up succeeded
    Latency(Duration),
    Command(Command),
}

pub struct Engine {
    config: Config,
    control_plane: Arc<dyn ControlPlane>,
    store: Arc<dyn KeyValueStore>,
    tx: flume::Sender<EngineMsg>,
    rx: flume::Receiver<EngineMsg>,
    scheduler: Scheduler,
    transport: TransportManager,
    reconciler: Reconciler,
    status: ConnectionStatus,
    status_in_flight: bool,
    last_unavailable_log: Option<Instant>,
    tree_active: Arc<AtomicBool>,
    snapshot_tx: watch::Sender<Snapshot>,
    render_tx: broadcast::Sender<RenderRequest>,
    persister: Option<Persister>,
}

impl Engine {
    pub fn new(
        config: Config,
        control_plane: Arc<dyn ControlPlane>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<(Self, EngineHandle), EngineError> {
        config.validate()?;
        let transport = TransportManager::new(&config.timings, config.caller_origin.clone())?;
        let reconciler = Reconciler::new(
            config.identity.clone(),
            TrustedDatasites::new(&config.trusted_datasites),
            config.activity_capacity,
            config.connection_capacity,
        );

        let (tx, rx) = flume::unbounded();
        let (render_tx, _) = broadcast::channel(RENDER_CHANNEL_CAPACITY);
        let mut engine = Self {
            config,
            control_plane,
            store,
            tx: tx.clone(),
            rx,
            scheduler: Scheduler::new(),
            transport,
            reconciler,
            status: ConnectionStatus::new(),
            status_in_flight: false,
            last_unavailable_log: None,
            tree_active: Arc::new(AtomicBool::new(false)),
            snapshot_tx: watch::channel(Self::empty_snapshot()).0,
            render_tx: render_tx.clone(),
            persister: None,
        };
        engine.snapshot_tx.send_replace(engine.snapshot());
        let handle = EngineHandle::new(tx, engine.snapshot_tx.subscribe(), render_tx);
        Ok((engine, handle))
    }

    fn empty_snapshot() -> Snapshot {
        Snapshot {
            status: ConnectionStatus::new(),
            health: Default::default(),
            summary: Default::default(),
            sections: Sections::build(Vec::new(), None, &TrustedDatasites::default(), &[]),
            activity: Vec::new(),
            connection_log: Vec::new(),
            busy: Vec::new(),
            taken_at: Utc::now(),
        }
    }

    /// Run the event loop until [`EngineHandle::shutdown`]
    pub async fn run(mut self) {
        tracing::info!("Sync engine started");

        let activity = load_list(self.store.as_ref(), ACTIVITY_LOG_KEY).await;
        let connections = load_list(self.store.as_ref(), CONNECTION_LOG_KEY).await;
        self.reconciler.restore_logs(activity, connections);
        let (persister, persist_handle) = Persister::spawn(self.store.clone());
        self.persister = Some(persister);

        let timings = self.config.timings.clone();
        self.scheduler
            .every(TaskName::StatusPoll, timings.status_poll, self.tx.clone(), |generation| {
                EngineMsg::Tick {
                    task: TaskName::StatusPoll,
                    generation,
                }
            });
        self.scheduler
            .every(TaskName::UiRefresh, timings.ui_refresh, self.tx.clone(), |generation| {
                EngineMsg::Tick {
                    task: TaskName::UiRefresh,
                    generation,
                }
            });
        self.request_listing(None, None);
        self.request_discovery();

        while let Ok(msg) = self.rx.recv_async().await {
            if matches!(msg, EngineMsg::Command(Command::Shutdown)) {
                break;
            }
            self.handle(msg);
            self.persist_dirty();
        }

        self.scheduler.shutdown();
        self.persist_dirty();
        drop(self.persister.take());
        if let Err(e) = persist_handle.await {
            tracing::error!("Persister task failed: {}", e);
        }
        tracing::info!("Sync engine stopped");
    }

    fn handle(&mut self, msg: EngineMsg) {
        match msg {
            EngineMsg::Tick { task, generation } => self.on_tick(task, generation),
            EngineMsg::DaemonState { result, latency } => self.on_daemon_state(result, latency),
            EngineMsg::Stream(msg) => self.on_stream(msg),
            EngineMsg::Probe { generation, result } => self.on_probe(generation, result),
            EngineMsg::Poll(outcome) => self.on_poll(outcome),
            EngineMsg::Listing {
                parent,
                result,
                latency,
                reply,
            } => self.on_listing(parent, result, latency, reply),
            EngineMsg::Discovery { result, latency } => match result {
                Ok(files) => {
                    self.record_latency(latency);
                    self.reconciler.set_discovery(files);
                }
                Err(e) => tracing::debug!("discovery listing failed: {}", e),
            },
            EngineMsg::Details {
                result,
                latency,
                reply,
            } => {
                let result = result.map(|mut details| {
                    self.record_latency(latency);
                    self.reconciler.overlay_details(&mut details);
                    details
                });
                let _ = reply.send(result.map_err(EngineError::from));
            }
            EngineMsg::ToggleDone {
                request,
                result,
                latency,
                reply,
            } => self.on_toggle_done(request, result, latency, reply),
            EngineMsg::UploadActionDone {
                queue,
                latency,
                reply,
            } => {
                self.record_latency(latency);
                self.apply_queue(queue);
                let _ = reply.send(Ok(()));
            }
            EngineMsg::Latency(latency) => self.record_latency(latency),
            EngineMsg::Command(command) => self.on_command(command),
        }
    }

    fn on_tick(&mut self, task: TaskName, generation: u64) {
        if !self.scheduler.is_current(task, generation) {
            return;
        }
        match task {
            TaskName::StatusPoll => self.poll_daemon_state(),
            TaskName::UiRefresh => self.publish(),
            TaskName::Reconnect => {
                self.scheduler.finish(TaskName::Reconnect, generation);
                self.reconcile_transport();
            }
            TaskName::StreamReader | TaskName::Poller | TaskName::Probe => {}
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::ToggleIgnore { path, reply } => self.toggle_ignore(path, reply),
            Command::ListDir { path, reply } => self.request_listing(path, Some(reply)),
            Command::Subscribe {
                path,
                is_folder,
                reply,
            } => self.subscribe_path(path, is_folder, reply),
            Command::RefreshDiscovery => self.request_discovery(),
            Command::Details { path, reply } => {
                let tx = self.tx.clone();
                self.spawn_io(
                    move |cp| async move { cp.get_details(&path).await },
                    move |result, latency| {
                        let _ = tx.send(EngineMsg::Details {
                            result,
                            latency,
                            reply,
                        });
                    },
                );
            }
            Command::SharedWithMe { reply } => {
                self.call(reply, |cp| async move { cp.shared_with_me().await })
            }
            Command::SubscribeShared { path, reply } => {
                self.call(reply, move |cp| async move { cp.subscribe_shared(&path).await })
            }
            Command::UnsubscribeShared { path, reply } => {
                self.call(reply, move |cp| async move { cp.unsubscribe_shared(&path).await })
            }
            Command::IgnorePatterns { reply } => {
                self.call(reply, |cp| async move { cp.ignore_patterns().await })
            }
            Command::UploadAction { id, action, reply } => self.upload_action(id, action, reply),
            Command::SocketStatus(status) => {
                self.dispatch(SyncEvent::Status(status));
                self.reconcile_transport();
            }
            Command::SetTrusted(identities) => {
                self.reconciler.set_trusted(TrustedDatasites::new(&identities));
                self.publish();
            }
            Command::ProbeNow => self.start_probe(),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            // handled by the run loop
            Command::Shutdown => {}
        }
    }

    // ===== Control-plane calls =====

    /// Run a control-plane call on its own task and hand the result to
    /// `done` on that task
    fn spawn_io<T, F, Fut, D>(&self, call: F, done: D)
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn ControlPlane>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ControlPlaneError>> + Send + 'static,
        D: FnOnce(Result<T, ControlPlaneError>, Duration) + Send + 'static,
    {
        let cp = self.control_plane.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = call(cp).await;
            done(result, started.elapsed());
        });
    }

    /// A call whose result goes straight back to the caller
    fn call<T, F, Fut>(&self, reply: Reply<T>, call: F)
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn ControlPlane>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ControlPlaneError>> + Send + 'static,
    {
        let tx = self.tx.clone();
        self.spawn_io(call, move |result, latency| {
            if result.is_ok() {
                let _ = tx.send(EngineMsg::Latency(latency));
            }
            let _ = reply.send(result.map_err(EngineError::from));
        });
    }

    fn poll_daemon_state(&mut self) {
        if self.status_in_flight {
            return;
        }
        self.status_in_flight = true;
        let tx = self.tx.clone();
        self.spawn_io(
            |cp| async move { cp.daemon_state().await },
            move |result, latency| {
                let _ = tx.send(EngineMsg::DaemonState { result, latency });
            },
        );
    }

    fn request_listing(&mut self, path: Option<String>, reply: Option<Reply<Vec<SyncNode>>>) {
        let parent = path
            .map(|p| paths::normalize(&p).trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty());
        let tx = self.tx.clone();
        let query = parent.clone();
        self.spawn_io(
            move |cp| async move { cp.list_dir(query.as_deref()).await },
            move |result, latency| {
                let _ = tx.send(EngineMsg::Listing {
                    parent,
                    result,
                    latency,
                    reply,
                });
            },
        );
    }

    fn request_discovery(&mut self) {
        let tx = self.tx.clone();
        self.spawn_io(
            |cp| async move { cp.discovery_files().await },
            move |result, latency| {
                let _ = tx.send(EngineMsg::Discovery { result, latency });
            },
        );
    }

    fn record_latency(&mut self, latency: Duration) {
        self.status.health_mut().record_latency(latency);
    }

    fn on_daemon_state(&mut self, result: Result<DaemonState, ControlPlaneError>, latency: Duration) {
        self.status_in_flight = false;
        let now = Utc::now();
        match result {
            Ok(state) => {
                self.record_latency(latency);
                self.status.health_mut().record_check(Instant::now());
                let was_running = self.status.running;
                if self.status.apply_daemon_state(&state) {
                    tracing::info!(
                        running = state.running,
                        url = state.client_url.as_deref().unwrap_or("-"),
                        "Daemon state changed"
                    );
                }
                if state.running && !was_running {
                    self.last_unavailable_log = None;
                    self.reconciler.record_connection(
                        ConnectionKind::Connected,
                        Channel::ControlPlane,
                        "daemon running",
                        now,
                    );
                }
                if self.reconciler.identity().is_none() {
                    self.reconciler.set_identity(state.email.clone());
                }
            }
            Err(e) => {
                self.log_unavailable(&e);
                if self.status.mark_offline() {
                    self.reconciler.record_connection(
                        ConnectionKind::Disconnected,
                        Channel::ControlPlane,
                        e.to_string(),
                        now,
                    );
                }
            }
        }
        self.reconcile_transport();
    }

    fn log_unavailable(&mut self, e: &ControlPlaneError) {
        let now = Instant::now();
        let window = self.config.timings.unavailable_log_window;
        if self
            .last_unavailable_log
            .is_some_and(|last| now.saturating_duration_since(last) < window)
        {
            return;
        }
        self.last_unavailable_log = Some(now);
        tracing::warn!("Daemon unavailable: {}", e);
    }

    // ===== Transport =====

    /// Bring the transport in line with the current status.
    ///
    /// Safe to call at any time; it only acts on a mismatch.
    fn reconcile_transport(&mut self) {
        let check = self.transport.check_connect(
            self.status.running,
            self.status.client_url.as_deref(),
            self.reconciler.bridge_active(),
        );
        match check {
            Err(SkipReason::DaemonDown) | Err(SkipReason::NoEndpoint) | Err(SkipReason::BridgeActive) => {
                self.scheduler.cancel(TaskName::Reconnect);
                self.close_stream();
                self.stop_poller();
            }
            Err(SkipReason::Fallback) => {
                self.close_stream();
                self.ensure_poller();
            }
            Ok(()) => {
                if !self.scheduler.is_active(TaskName::StreamReader)
                    && !self.scheduler.is_active(TaskName::Reconnect)
                {
                    self.open_stream();
                }
            }
        }
    }

    fn open_stream(&mut self) {
        let Some(client_url) = self.status.client_url.clone() else {
            return;
        };
        let target = match self
            .transport
            .target(&client_url, self.status.client_token.as_deref())
        {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!("Cannot build stream url from {}: {}", client_url, e);
                self.on_stream_failure();
                return;
            }
        };

        let now = Utc::now();
        if self.transport.is_cross_origin(&target) {
            tracing::info!("Stream origin differs from caller origin, polling instead");
            self.reconciler.record_connection(
                ConnectionKind::Error,
                Channel::Sse,
                "stream origin not allowed",
                now,
            );
            self.transport.policy_mut().force_fallback();
            self.ensure_poller();
            return;
        }

        tracing::debug!("Opening push stream {}", target.redacted());
        self.reconciler.record_connection(
            ConnectionKind::Connecting,
            Channel::Sse,
            target.redacted(),
            now,
        );
        self.status.transport = TransportMode::Connecting;
        let client = self.transport.client().clone();
        let tx = self.tx.clone();
        self.scheduler.spawn(TaskName::StreamReader, move |generation, cancel| {
            run_stream(client, target, generation, cancel, tx)
        });
    }

    fn close_stream(&mut self) {
        if !self.scheduler.is_active(TaskName::StreamReader) {
            return;
        }
        self.scheduler.cancel(TaskName::StreamReader);
        self.status.transport = TransportMode::Idle;
        self.reconciler.record_connection(
            ConnectionKind::Disconnected,
            Channel::Sse,
            "stream closed",
            Utc::now(),
        );
    }

    fn on_stream(&mut self, msg: StreamMsg) {
        match msg {
            StreamMsg::Opened {
                generation,
                latency,
            } => {
                if !self.scheduler.is_current(TaskName::StreamReader, generation) {
                    return;
                }
                tracing::info!("Push stream connected");
                self.transport.policy_mut().on_connected();
                self.status.transport = TransportMode::Stream;
                self.status.last_error = None;
                self.record_latency(latency);
                self.reconciler.record_connection(
                    ConnectionKind::Connected,
                    Channel::Sse,
                    "stream open",
                    Utc::now(),
                );
                self.stop_poller();
            }
            StreamMsg::Events { generation, events } => {
                if !self.scheduler.is_current(TaskName::StreamReader, generation) {
                    return;
                }
                for event in events {
                    self.dispatch(event);
                }
            }
            StreamMsg::Closed { generation, error } => {
                if !self.scheduler.is_current(TaskName::StreamReader, generation) {
                    return;
                }
                self.scheduler.finish(TaskName::StreamReader, generation);
                tracing::info!("Push stream closed: {}", error);
                self.status.transport = TransportMode::Idle;
                self.status.last_error = Some(error.to_string());
                self.reconciler.record_connection(
                    ConnectionKind::Disconnected,
                    Channel::Sse,
                    error.to_string(),
                    Utc::now(),
                );
                self.on_stream_failure();
            }
        }
    }

    fn on_stream_failure(&mut self) {
        self.maybe_probe();
        match self.transport.policy_mut().on_failure() {
            NextStep::Reconnect(delay) => {
                tracing::debug!("Reconnecting push stream in {:?}", delay);
                let tx = self.tx.clone();
                self.scheduler.after(TaskName::Reconnect, delay, tx, |generation| {
                    EngineMsg::Tick {
                        task: TaskName::Reconnect,
                        generation,
                    }
                });
            }
            NextStep::Fallback => {
                tracing::warn!(
                    failures = self.transport.policy().consecutive_failures(),
                    "Push stream unavailable, falling back to polling"
                );
                self.scheduler.cancel(TaskName::Reconnect);
                self.reconcile_transport();
            }
        }
    }

    fn maybe_probe(&mut self) {
        if self.transport.claim_probe(Instant::now()) {
            self.start_probe();
        }
    }

    fn start_probe(&mut self) {
        let Some(client_url) = self.status.client_url.clone() else {
            return;
        };
        let token = self.status.client_token.clone();
        let client = self.transport.client().clone();
        let timeout = self.transport.probe_timeout();
        let tx = self.tx.clone();
        self.scheduler.spawn(TaskName::Probe, move |generation, cancel| {
            run_probe(client, client_url, token, timeout, generation, cancel, tx)
        });
    }

    fn on_probe(&mut self, generation: u64, result: Result<AuthMode, TransportError>) {
        if !self.scheduler.is_current(TaskName::Probe, generation) {
            return;
        }
        self.scheduler.finish(TaskName::Probe, generation);
        let now = Utc::now();
        match result {
            Ok(mode) => {
                self.transport.set_auth_mode(mode);
                self.status.auth_mode = mode;
                self.reconciler.record_connection(
                    ConnectionKind::Response,
                    Channel::Sse,
                    "probe ok",
                    now,
                );
                if self.transport.policy().in_fallback() {
                    tracing::info!("Probe succeeded, leaving polling fallback");
                    self.transport.policy_mut().on_probe_success();
                    self.stop_poller();
                    let delay = self.config.timings.probe_reconnect_delay;
                    self.scheduler.after(TaskName::Reconnect, delay, self.tx.clone(), |generation| {
                        EngineMsg::Tick {
                            task: TaskName::Reconnect,
                            generation,
                        }
                    });
                }
            }
            Err(e) => {
                tracing::debug!("Probe failed: {}", e);
                self.reconciler.record_connection(
                    ConnectionKind::Error,
                    Channel::Sse,
                    format!("probe failed: {}", e),
                    now,
                );
            }
        }
    }

    // ===== Polling fallback =====

    fn ensure_poller(&mut self) {
        if self.scheduler.is_active(TaskName::Poller) {
            return;
        }
        tracing::info!("Starting polling fallback");
        self.status.transport = TransportMode::Polling;
        self.reconciler.record_connection(
            ConnectionKind::Connecting,
            Channel::ControlPlane,
            "polling fallback",
            Utc::now(),
        );
        self.tree_active
            .store(self.reconciler.tree().has_active_files(), Ordering::Relaxed);
        let cp = self.control_plane.clone();
        let tx = self.tx.clone();
        let fast = self.config.timings.fast_poll;
        let slow = self.config.timings.slow_poll;
        let tree_active = self.tree_active.clone();
        self.scheduler.spawn(TaskName::Poller, move |generation, cancel| {
            run_poller(cp, generation, cancel, tx, fast, slow, tree_active)
        });
    }

    fn stop_poller(&mut self) {
        if !self.scheduler.is_active(TaskName::Poller) {
            return;
        }
        self.scheduler.cancel(TaskName::Poller);
        self.status.poll_cadence = None;
        if self.status.transport == TransportMode::Polling {
            self.status.transport = TransportMode::Idle;
        }
    }

    fn on_poll(&mut self, outcome: PollOutcome) {
        if !self.scheduler.is_current(TaskName::Poller, outcome.generation) {
            return;
        }
        self.status.poll_cadence = Some(outcome.cadence);
        if outcome.result.is_ok() {
            self.record_latency(outcome.latency);
        }
        self.apply_queue(outcome.result);
    }

    /// Feed one queue status through the reconciler
    fn apply_queue(&mut self, result: Result<QueueStatus, ControlPlaneError>) {
        match result {
            Ok(queue) => {
                if let Some(error) = &queue.error {
                    tracing::debug!("Partial queue status: {}", error);
                }
                for event in queue.to_events() {
                    self.dispatch(event);
                }
            }
            Err(e) if e.is_unavailable() => self.log_unavailable(&e),
            Err(e) => tracing::debug!("Queue poll failed: {}", e),
        }
        self.tree_active
            .store(self.reconciler.tree().has_active_files(), Ordering::Relaxed);
    }

    /// Act on one upload, then pull the queue so the change shows without
    /// waiting for the stream or the next poll
    fn upload_action(&mut self, id: String, action: UploadAction, reply: Reply<()>) {
        tracing::info!("Upload {}: {}", id, action);
        let tx = self.tx.clone();
        self.spawn_io(
            move |cp| async move {
                cp.upload_action(&id, action).await?;
                Ok::<_, ControlPlaneError>(cp.queue_status().await)
            },
            move |result, latency| match result {
                Ok(queue) => {
                    let _ = tx.send(EngineMsg::UploadActionDone {
                        queue,
                        latency,
                        reply,
                    });
                }
                Err(e) => {
                    tracing::warn!("Upload action failed: {}", e);
                    let _ = reply.send(Err(EngineError::from(e)));
                }
            },
        );
    }

    // ===== Tree =====

    fn dispatch(&mut self, event: SyncEvent) {
        for render in self.reconciler.apply(event, Utc::now()) {
            // no subscribers is fine
            let _ = self.render_tx.send(render);
        }
    }

    fn send_renders(&self, renders: Vec<RenderRequest>) {
        for render in renders {
            let _ = self.render_tx.send(render);
        }
    }

    fn on_listing(
        &mut self,
        parent: Option<String>,
        result: Result<Vec<SyncNode>, ControlPlaneError>,
        latency: Duration,
        reply: Option<Reply<Vec<SyncNode>>>,
    ) {
        let result = match result {
            Ok(nodes) => {
                self.record_latency(latency);
                let renders = self.reconciler.apply_listing(parent.as_deref(), nodes);
                self.send_renders(renders);
                let tree = self.reconciler.tree();
                Ok(match parent.as_deref() {
                    Some(parent) => tree.children_of(parent),
                    None => tree.roots(),
                })
            }
            Err(e) => {
                tracing::debug!("Listing {} failed: {}", parent.as_deref().unwrap_or("/"), e);
                Err(EngineError::from(e))
            }
        };
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    fn toggle_ignore(&mut self, path: String, reply: Reply<()>) {
        let (request, renders) = match self.reconciler.begin_toggle(&path) {
            Ok(accepted) => accepted,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        self.send_renders(renders);

        let tx = self.tx.clone();
        let call = request.clone();
        self.spawn_io(
            move |cp| async move {
                let ToggleRequest { path, ignore, is_dir } = call;
                if ignore {
                    cp.add_ignore(&path).await?;
                } else {
                    cp.remove_ignore(&path).await?;
                }
                if is_dir {
                    let pattern = format!("{}/", path);
                    let second = if ignore {
                        cp.add_ignore(&pattern).await
                    } else {
                        cp.remove_ignore(&pattern).await
                    };
                    if let Err(e) = second {
                        tracing::debug!("Ignore pattern {} not updated: {}", pattern, e);
                    }
                }
                Ok(())
            },
            move |result, latency| {
                let _ = tx.send(EngineMsg::ToggleDone {
                    request,
                    result,
                    latency,
                    reply,
                });
            },
        );
    }

    fn on_toggle_done(
        &mut self,
        request: ToggleRequest,
        result: Result<(), ControlPlaneError>,
        latency: Duration,
        reply: Reply<()>,
    ) {
        let renders = self.reconciler.finish_toggle(&request, result.is_ok());
        self.send_renders(renders);
        let result = match result {
            Ok(()) => {
                self.record_latency(latency);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Ignore toggle for {} failed: {}", request.path, e);
                Err(EngineError::Toggle(ToggleError::Rejected {
                    path: request.path.clone(),
                    message: e.to_string(),
                }))
            }
        };
        let _ = reply.send(result);
    }

    fn subscribe_path(&mut self, path: String, is_folder: bool, reply: Reply<()>) {
        let path = paths::normalize(&path).trim_end_matches('/').to_string();
        let removed = self.reconciler.remove_discovered(&path, is_folder);
        tracing::debug!("Subscribing to {} ({} discovery entries)", path, removed);

        let tx = self.tx.clone();
        self.spawn_io(
            move |cp| async move {
                cp.subscribe(&path, is_folder).await?;
                cp.trigger_sync().await
            },
            move |result, latency| {
                match &result {
                    Ok(()) => {
                        let _ = tx.send(EngineMsg::Latency(latency));
                    }
                    // put the entry back
                    Err(_) => {
                        let _ = tx.send(EngineMsg::Command(Command::RefreshDiscovery));
                    }
                }
                let _ = reply.send(result.map_err(EngineError::from));
            },
        );
    }

    // ===== Observers =====

    fn snapshot(&self) -> Snapshot {
        let mut status = self.status.clone();
        let policy = self.transport.policy();
        status.fallback = policy.in_fallback();
        status.consecutive_failures = policy.consecutive_failures();
        status.bridge_active = self.reconciler.bridge_active();
        status.auth_mode = self.transport.auth_mode();
        status.summary = self.reconciler.summary();

        Snapshot {
            health: status.health_stats(),
            summary: status.summary,
            status,
            sections: self.reconciler.sections(),
            activity: self.reconciler.activity().entries(),
            connection_log: self.reconciler.connections().entries(),
            busy: self.reconciler.busy(),
            taken_at: Utc::now(),
        }
    }

    fn publish(&mut self) {
        self.tree_active
            .store(self.reconciler.tree().has_active_files(), Ordering::Relaxed);
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn persist_dirty(&mut self) {
        let Some(persister) = &self.persister else {
            return;
        };
        if let Some(entries) = self.reconciler.take_dirty_activity() {
            persister.save(ACTIVITY_LOG_KEY, &entries);
        }
        if let Some(entries) = self.reconciler.take_dirty_connections() {
            persister.save(CONNECTION_LOG_KEY, &entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::testkit::{eventually, test_config, FakeControlPlane};
    use common::tree::SyncState;

    async fn start(fake: &FakeControlPlane) -> (EngineHandle, tokio::task::JoinHandle<()>) {
        let (engine, handle) = Engine::new(
            test_config(),
            Arc::new(fake.clone()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        let task = tokio::spawn(engine.run());
        (handle, task)
    }

    #[tokio::test]
    async fn test_daemon_down_stays_idle_and_offline() {
        let fake = FakeControlPlane::new();
        fake.set_unavailable(true);
        let (handle, task) = start(&fake).await;

        eventually(Duration::from_secs(2), || async {
            let snapshot = handle.snapshot().await?;
            Ok(snapshot
                .connection_log
                .iter()
                .all(|e| e.channel == Channel::ControlPlane)
                && fake.daemon_state_calls() >= 2)
        })
        .await
        .unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert!(!snapshot.status.running);
        assert_eq!(snapshot.status.transport, TransportMode::Idle);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_list_dir_and_details_overlay_live_state() {
        let fake = FakeControlPlane::new();
        fake.set_listing(None, vec![SyncNode::dir("alice@x.org")]);
        fake.set_listing(Some("alice@x.org"), vec![SyncNode::file("alice@x.org/a.csv")]);
        let (handle, task) = start(&fake).await;

        let roots = handle.list_dir(None).await.unwrap();
        assert_eq!(roots.len(), 1);
        let children = handle.list_dir(Some("alice@x.org".into())).await.unwrap();
        assert_eq!(children[0].path, "alice@x.org/a.csv");

        handle
            .socket_status(StatusEvent {
                connected: false,
                url: None,
                message: Some("bridge down".into()),
            })
            .await
            .unwrap();

        let details = handle.details("alice@x.org/a.csv").await.unwrap();
        assert_eq!(details.sync_state, SyncState::Completed);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
