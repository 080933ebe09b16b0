//! Test helpers: a recording fake control plane, a temp daemon directory and
//! polling assertions.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use common::ignore::{IgnorePatterns, IgnoreRules};
use common::queue::{QueueStatus, UploadAction};
use common::status::DaemonState;
use common::tree::{DiscoveryFile, NodeDetails, SharedWithMeItem, SyncNode};

use crate::config::{Config, Timings};
use crate::control_plane::{ControlPlane, ControlPlaneError, DaemonControlPlane};
use crate::engine::{Engine, EngineHandle};
use crate::storage::MemoryStore;

/// Poll `check` with capped exponential backoff until it holds or `timeout`
/// passes
pub async fn eventually<F, Fut>(timeout: Duration, check: F) -> anyhow::Result<()>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<bool>>,
{
    let start = Instant::now();
    let mut delay = Duration::from_millis(50);
    while start.elapsed() < timeout {
        if check().await? {
            return Ok(());
        }
        tokio::time::sleep(delay).await;
        delay = std::cmp::min(delay * 2, Duration::from_millis(500));
    }
    anyhow::bail!("condition not met within timeout")
}

/// Short timers so scenarios finish in well under a second per step
pub fn test_timings() -> Timings {
    Timings {
        status_poll: Duration::from_millis(50),
        ui_refresh: Duration::from_millis(50),
        fast_poll: Duration::from_millis(50),
        slow_poll: Duration::from_millis(400),
        probe_timeout: Duration::from_millis(500),
        probe_interval: Duration::from_secs(60),
        probe_reconnect_delay: Duration::from_millis(50),
        reconnect_delays: vec![Duration::from_millis(50), Duration::from_millis(100)],
        max_stream_failures: 2,
        unavailable_log_window: Duration::from_secs(30),
        request_timeout: Duration::from_secs(2),
    }
}

pub fn test_config() -> Config {
    Config {
        identity: Some("alice@x.org".to_string()),
        timings: test_timings(),
        ..Default::default()
    }
}

/// Start an engine against `fake` with in-memory log storage
pub fn spawn_test_engine(fake: &FakeControlPlane, config: Config) -> anyhow::Result<(EngineHandle, JoinHandle<()>)> {
    let (engine, handle) = Engine::new(config, Arc::new(fake.clone()), Arc::new(MemoryStore::new()))?;
    Ok((handle, tokio::spawn(engine.run())))
}

/// Every call the engine made, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListDir(Option<String>),
    GetDetails(String),
    AddIgnore(String),
    RemoveIgnore(String),
    IgnorePatterns,
    SharedWithMe,
    SubscribeShared(String),
    UnsubscribeShared(String),
    QueueStatus,
    UploadAction { id: String, action: UploadAction },
    DiscoveryFiles,
    Subscribe { path: String, is_folder: bool },
    TriggerSync,
    DaemonState,
}

#[derive(Default)]
struct FakeState {
    daemon: DaemonState,
    unavailable: bool,
    queue: QueueStatus,
    listings: HashMap<String, Vec<SyncNode>>,
    discovery: Vec<DiscoveryFile>,
    failing_patterns: HashSet<String>,
    failing_uploads: HashSet<String>,
    ignore_lines: Vec<String>,
    calls: Vec<Call>,
}

/// In-memory control plane that records every call
#[derive(Clone, Default)]
pub struct FakeControlPlane {
    inner: Arc<Mutex<FakeState>>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a running daemon with the given stream endpoint
    pub fn set_running(&self, client_url: &str, token: Option<&str>) {
        let mut state = self.inner.lock();
        state.unavailable = false;
        state.daemon = DaemonState {
            running: true,
            client_url: Some(client_url.to_string()),
            client_token: token.map(str::to_string),
            ..Default::default()
        };
    }

    /// Make every call fail as if the daemon were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    pub fn set_queue(&self, queue: QueueStatus) {
        self.inner.lock().queue = queue;
    }

    pub fn set_listing(&self, parent: Option<&str>, nodes: Vec<SyncNode>) {
        self.inner
            .lock()
            .listings
            .insert(parent.unwrap_or("").to_string(), nodes);
    }

    pub fn set_discovery(&self, files: Vec<DiscoveryFile>) {
        self.inner.lock().discovery = files;
    }

    /// Make add/remove of this exact pattern fail
    pub fn fail_pattern(&self, pattern: &str) {
        self.inner.lock().failing_patterns.insert(pattern.to_string());
    }

    /// Make every action on this upload id fail
    pub fn fail_upload(&self, id: &str) {
        self.inner.lock().failing_uploads.insert(id.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    /// Ignore-pattern calls only, in order
    pub fn ignore_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::AddIgnore(_) | Call::RemoveIgnore(_)))
            .collect()
    }

    pub fn daemon_state_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::DaemonState))
    }

    pub fn queue_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::QueueStatus))
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.inner.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Record `call` and fail it when the daemon is marked unavailable
    fn record(&self, call: Call) -> Result<(), ControlPlaneError> {
        let mut state = self.inner.lock();
        state.calls.push(call);
        if state.unavailable {
            return Err(ControlPlaneError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    fn pattern_call(&self, call: Call, pattern: &str) -> Result<(), ControlPlaneError> {
        self.record(call)?;
        if self.inner.lock().failing_patterns.contains(pattern) {
            return Err(ControlPlaneError::HttpStatus(
                http::StatusCode::INTERNAL_SERVER_ERROR,
                format!("cannot update {}", pattern),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_dir(&self, path: Option<&str>) -> Result<Vec<SyncNode>, ControlPlaneError> {
        self.record(Call::ListDir(path.map(str::to_string)))?;
        Ok(self
            .inner
            .lock()
            .listings
            .get(path.unwrap_or(""))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_details(&self, path: &str) -> Result<NodeDetails, ControlPlaneError> {
        self.record(Call::GetDetails(path.to_string()))?;
        let state = self.inner.lock();
        let node = state
            .listings
            .values()
            .flatten()
            .find(|n| n.path == path)
            .cloned()
            .ok_or_else(|| ControlPlaneError::NotFound(path.to_string()))?;
        Ok(NodeDetails {
            path: node.path,
            name: node.name,
            is_dir: node.is_dir,
            size: node.size.unwrap_or(0),
            file_count: None,
            sync_state: node.sync_state,
            progress: node.progress,
            error: None,
            last_modified: node.last_modified,
            is_ignored: node.is_ignored,
            ignore_pattern: None,
            is_essential: node.is_essential,
            essential_pattern: None,
            is_priority: false,
            file_type: None,
            file_content: None,
            pub_info: None,
        })
    }

    async fn add_ignore(&self, pattern: &str) -> Result<(), ControlPlaneError> {
        self.pattern_call(Call::AddIgnore(pattern.to_string()), pattern)?;
        let mut state = self.inner.lock();
        if !state.ignore_lines.iter().any(|l| l == pattern) {
            state.ignore_lines.push(pattern.to_string());
        }
        Ok(())
    }

    async fn remove_ignore(&self, pattern: &str) -> Result<(), ControlPlaneError> {
        self.pattern_call(Call::RemoveIgnore(pattern.to_string()), pattern)?;
        self.inner.lock().ignore_lines.retain(|l| l != pattern);
        Ok(())
    }

    async fn ignore_patterns(&self) -> Result<IgnorePatterns, ControlPlaneError> {
        self.record(Call::IgnorePatterns)?;
        let rules = IgnoreRules::parse(&self.inner.lock().ignore_lines.join("\n"));
        Ok(IgnorePatterns::from_rules(&rules, "/fake/.syftignore"))
    }

    async fn shared_with_me(&self) -> Result<Vec<SharedWithMeItem>, ControlPlaneError> {
        self.record(Call::SharedWithMe)?;
        Ok(Vec::new())
    }

    async fn subscribe_shared(&self, path: &str) -> Result<(), ControlPlaneError> {
        self.record(Call::SubscribeShared(path.to_string()))
    }

    async fn unsubscribe_shared(&self, path: &str) -> Result<(), ControlPlaneError> {
        self.record(Call::UnsubscribeShared(path.to_string()))
    }

    async fn queue_status(&self) -> Result<QueueStatus, ControlPlaneError> {
        self.record(Call::QueueStatus)?;
        let mut queue = self.inner.lock().queue.clone();
        queue.normalize();
        Ok(queue)
    }

    async fn upload_action(&self, id: &str, action: UploadAction) -> Result<(), ControlPlaneError> {
        self.record(Call::UploadAction {
            id: id.to_string(),
            action,
        })?;
        if self.inner.lock().failing_uploads.contains(id) {
            return Err(ControlPlaneError::HttpStatus(
                http::StatusCode::NOT_FOUND,
                format!("no upload {}", id),
            ));
        }
        Ok(())
    }

    async fn discovery_files(&self) -> Result<Vec<DiscoveryFile>, ControlPlaneError> {
        self.record(Call::DiscoveryFiles)?;
        Ok(self.inner.lock().discovery.clone())
    }

    async fn subscribe(&self, path: &str, is_folder: bool) -> Result<(), ControlPlaneError> {
        self.record(Call::Subscribe {
            path: path.to_string(),
            is_folder,
        })
    }

    async fn trigger_sync(&self) -> Result<(), ControlPlaneError> {
        self.record(Call::TriggerSync)
    }

    async fn daemon_state(&self) -> Result<DaemonState, ControlPlaneError> {
        self.record(Call::DaemonState)?;
        Ok(self.inner.lock().daemon.clone())
    }
}

/// A daemon data directory and config file under a temp dir
pub struct DaemonFixture {
    _temp_dir: tempfile::TempDir,
    data_dir: PathBuf,
    config_path: PathBuf,
}

impl DaemonFixture {
    /// Create `datasites/` and a daemon config pointing at `client_url`
    pub fn new(client_url: &str, email: &str) -> anyhow::Result<Self> {
        let temp_dir = tempfile::TempDir::new()?;
        let data_dir = temp_dir.path().join("SyftBox");
        std::fs::create_dir_all(data_dir.join(common::paths::DATASITES_DIR))?;
        let config_path = temp_dir.path().join("config.json");
        let config = serde_json::json!({
            "client_url": client_url,
            "client_token": "test-token",
            "data_dir": data_dir,
            "email": email,
        });
        std::fs::write(&config_path, config.to_string())?;
        Ok(Self {
            _temp_dir: temp_dir,
            data_dir,
            config_path,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Write a file under `datasites/`, creating parents
    pub fn write_file(&self, rel: &str, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.data_dir.join(common::paths::DATASITES_DIR).join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn mkdir(&self, rel: &str) -> anyhow::Result<PathBuf> {
        let path = self.data_dir.join(common::paths::DATASITES_DIR).join(rel);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    pub fn read_ignore_file(&self) -> anyhow::Result<String> {
        Ok(std::fs::read_to_string(self.data_dir.join(".syftignore"))?)
    }

    pub fn control_plane(&self) -> DaemonControlPlane {
        DaemonControlPlane::new(
            &self.config_path,
            Some(self.data_dir.clone()),
            None,
            Duration::from_secs(2),
        )
    }
}
