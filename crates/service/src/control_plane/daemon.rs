use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use common::ignore::IgnorePatterns;
use common::queue::{QueueStatus, UploadAction};
use common::status::DaemonState;
use common::tree::{DiscoveryFile, NodeDetails, SharedWithMeItem, SyncNode};

use super::local_tree::LocalTree;
use super::requests::{
    ApiClient, DiscoveryRequest, StatusRequest, SubscribeRequest, SyncNowRequest,
    SyncStatusRequest, UploadActionRequest, UploadsRequest,
};
use super::{ControlPlane, ControlPlaneError};

/// The daemon's own JSON config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfigFile {
    #[serde(default)]
    pub client_url: Option<String>,
    #[serde(default)]
    pub client_token: Option<String>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub email: Option<String>,
}

impl DaemonConfigFile {
    pub async fn load(path: &Path) -> Result<Self, ControlPlaneError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            ControlPlaneError::NotConfigured(format!("{}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| ControlPlaneError::NotConfigured(format!("{}: {}", path.display(), e)))
    }

    fn client_url(&self) -> Option<&str> {
        self.client_url.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    fn client_token(&self) -> Option<&str> {
        self.client_token.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Control plane backed by a running daemon.
///
/// Tree, ignore and sharing operations act on the data directory; queue,
/// discovery, subscription and status calls go to the daemon's HTTP API.
/// The config file is re-read on every call so a daemon restart with a new
/// endpoint or token is picked up without restarting the engine.
pub struct DaemonControlPlane {
    config_path: PathBuf,
    data_dir: Option<PathBuf>,
    identity: Option<String>,
    request_timeout: Duration,
}

impl DaemonControlPlane {
    pub fn new(
        config_path: impl Into<PathBuf>,
        data_dir: Option<PathBuf>,
        identity: Option<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            data_dir,
            identity,
            request_timeout,
        }
    }

    async fn config(&self) -> Result<DaemonConfigFile, ControlPlaneError> {
        DaemonConfigFile::load(&self.config_path).await
    }

    async fn api(&self) -> Result<ApiClient, ControlPlaneError> {
        let config = self.config().await?;
        let url = config
            .client_url()
            .ok_or_else(|| ControlPlaneError::NotConfigured("client_url missing".into()))?;
        let url = Url::parse(url).map_err(|e| ControlPlaneError::NotConfigured(e.to_string()))?;
        ApiClient::new(&url, config.client_token().map(str::to_string), self.request_timeout)
    }

    async fn local_tree(&self) -> Result<LocalTree, ControlPlaneError> {
        if let Some(dir) = &self.data_dir {
            return Ok(LocalTree::new(dir));
        }
        let config = self.config().await?;
        config
            .data_dir
            .map(LocalTree::new)
            .ok_or_else(|| ControlPlaneError::NotConfigured("data_dir missing".into()))
    }

    async fn identity(&self) -> Result<String, ControlPlaneError> {
        if let Some(identity) = &self.identity {
            return Ok(identity.clone());
        }
        self.config()
            .await?
            .email
            .ok_or_else(|| ControlPlaneError::NotConfigured("email missing".into()))
    }

    /// Write the default `.syftignore` policy if the data dir has none.
    /// Returns whether anything was written.
    pub async fn init_default_policy(&self) -> Result<bool, ControlPlaneError> {
        self.blocking(|tree| tree.init_default_policy()).await
    }

    /// Run blocking filesystem work against the local tree
    async fn blocking<T, F>(&self, f: F) -> Result<T, ControlPlaneError>
    where
        T: Send + 'static,
        F: FnOnce(LocalTree) -> Result<T, ControlPlaneError> + Send + 'static,
    {
        let tree = self.local_tree().await?;
        tokio::task::spawn_blocking(move || f(tree))
            .await
            .map_err(|e| ControlPlaneError::Task(e.to_string()))?
    }
}

#[async_trait]
impl ControlPlane for DaemonControlPlane {
    async fn list_dir(&self, path: Option<&str>) -> Result<Vec<SyncNode>, ControlPlaneError> {
        let path = path.map(str::to_string);
        self.blocking(move |tree| tree.list_dir(path.as_deref())).await
    }

    async fn get_details(&self, path: &str) -> Result<NodeDetails, ControlPlaneError> {
        let path = path.to_string();
        self.blocking(move |tree| tree.details(&path)).await
    }

    async fn add_ignore(&self, pattern: &str) -> Result<(), ControlPlaneError> {
        let pattern = pattern.to_string();
        self.blocking(move |tree| tree.add_ignore(&pattern).map(|_| ())).await
    }

    async fn remove_ignore(&self, pattern: &str) -> Result<(), ControlPlaneError> {
        let pattern = pattern.to_string();
        self.blocking(move |tree| tree.remove_ignore(&pattern).map(|_| ())).await
    }

    async fn ignore_patterns(&self) -> Result<IgnorePatterns, ControlPlaneError> {
        self.blocking(|tree| tree.ignore_patterns()).await
    }

    async fn shared_with_me(&self) -> Result<Vec<SharedWithMeItem>, ControlPlaneError> {
        let identity = self.identity().await?;
        self.blocking(move |tree| tree.shared_with_me(&identity)).await
    }

    async fn subscribe_shared(&self, path: &str) -> Result<(), ControlPlaneError> {
        let path = path.to_string();
        self.blocking(move |tree| tree.subscribe(&path).map(|_| ())).await
    }

    async fn unsubscribe_shared(&self, path: &str) -> Result<(), ControlPlaneError> {
        let path = path.to_string();
        self.blocking(move |tree| tree.unsubscribe(&path).map(|_| ())).await
    }

    async fn queue_status(&self) -> Result<QueueStatus, ControlPlaneError> {
        let api = self.api().await?;
        let (sync, uploads) = tokio::join!(api.call(SyncStatusRequest), api.call(UploadsRequest));

        let mut errors = Vec::new();
        let sync = sync
            .map_err(|e| {
                tracing::debug!("queue status sync: {}", e);
                errors.push(e)
            })
            .ok();
        let uploads = uploads
            .map_err(|e| {
                tracing::debug!("queue status uploads: {}", e);
                errors.push(e)
            })
            .ok()
            .map(|list| list.uploads);

        if sync.is_none() && uploads.is_none() {
            if let Some(e) = errors.into_iter().next() {
                return Err(e);
            }
            return Ok(QueueStatus::default());
        }

        let mut status = QueueStatus {
            sync,
            uploads,
            status: None,
            error: if errors.is_empty() {
                None
            } else {
                Some(
                    errors
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; "),
                )
            },
        };
        status.normalize();
        Ok(status)
    }

    async fn upload_action(&self, id: &str, action: UploadAction) -> Result<(), ControlPlaneError> {
        let api = self.api().await?;
        api.call(UploadActionRequest {
            id: id.to_string(),
            action,
        })
        .await?;
        Ok(())
    }

    async fn discovery_files(&self) -> Result<Vec<DiscoveryFile>, ControlPlaneError> {
        let api = self.api().await?;
        Ok(api.call(DiscoveryRequest).await?.into_files())
    }

    async fn subscribe(&self, path: &str, is_folder: bool) -> Result<(), ControlPlaneError> {
        let api = self.api().await?;
        api.call(SubscribeRequest {
            path: path.to_string(),
            is_folder,
        })
        .await?;
        Ok(())
    }

    async fn trigger_sync(&self) -> Result<(), ControlPlaneError> {
        let api = self.api().await?;
        api.call(SyncNowRequest).await?;
        Ok(())
    }

    async fn daemon_state(&self) -> Result<DaemonState, ControlPlaneError> {
        let config = self.config().await?;
        let api = self.api().await?;
        let status = api.call(StatusRequest).await?;

        Ok(DaemonState {
            running: true,
            mode: status.mode,
            backend: status.backend,
            client_url: config.client_url().map(str::to_string),
            client_token: config.client_token().map(str::to_string),
            pid: status.pid,
            tx_bytes: status.tx_bytes,
            rx_bytes: status.rx_bytes,
            email: status.email.or(config.email),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn daemon(server: &MockServer) -> (tempfile::TempDir, DaemonControlPlane) {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("config.json");
        let config = serde_json::json!({
            "client_url": server.uri(),
            "client_token": "tok",
            "data_dir": dir.path(),
            "email": "alice@x.org",
        });
        std::fs::write(&config_path, config.to_string()).unwrap();
        let cp = DaemonControlPlane::new(config_path, None, None, Duration::from_secs(2));
        (dir, cp)
    }

    #[tokio::test]
    async fn test_daemon_state_reads_config_and_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/status"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "pid": 42,
                "txBytes": 10
            })))
            .mount(&server)
            .await;

        let (_dir, cp) = daemon(&server).await;
        let state = cp.daemon_state().await.unwrap();
        assert!(state.running);
        assert_eq!(state.pid, Some(42));
        assert_eq!(state.tx_bytes, 10);
        assert_eq!(state.client_token.as_deref(), Some("tok"));
        assert_eq!(state.email.as_deref(), Some("alice@x.org"));
    }

    #[tokio::test]
    async fn test_queue_status_tolerates_one_failing_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sync/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{"path": "alice@x.org/a.csv", "state": "syncing", "progress": 0.5}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/uploads/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (_dir, cp) = daemon(&server).await;
        let status = cp.queue_status().await.unwrap();
        assert_eq!(status.sync.unwrap().files[0].progress, 50.0);
        assert!(status.uploads.is_none());
        assert!(status.error.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_subscribe_posts_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/subscriptions"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/sync/now"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let (_dir, cp) = daemon(&server).await;
        cp.subscribe("bob@y.org/public", true).await.unwrap();
        cp.trigger_sync().await.unwrap();
    }

    #[tokio::test]
    async fn test_queue_status_keeps_sub_percent_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sync/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{"path": "alice@x.org/a.csv", "state": "syncing", "progress": 0.008}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/uploads/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "uploads": [{"id": "u1", "key": "alice@x.org/b.bin", "state": "uploading", "progress": 0.005}]
            })))
            .mount(&server)
            .await;

        let (_dir, cp) = daemon(&server).await;
        let events = cp.queue_status().await.unwrap().to_events();
        let progress: Vec<Option<f64>> = events
            .iter()
            .filter_map(|e| match e {
                common::event::SyncEvent::File(f) => Some(f.progress),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![Some(0.8), Some(0.5)]);
    }

    #[tokio::test]
    async fn test_upload_actions_hit_upload_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/uploads/u1/pause"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/uploads/u1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/uploads/gone/resume"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such upload"))
            .mount(&server)
            .await;

        let (_dir, cp) = daemon(&server).await;
        cp.upload_action("u1", UploadAction::Pause).await.unwrap();
        cp.upload_action("u1", UploadAction::Cancel).await.unwrap();
        let err = cp.upload_action("gone", UploadAction::Resume).await.unwrap_err();
        assert!(
            matches!(err, ControlPlaneError::HttpStatus(status, _) if status == http::StatusCode::NOT_FOUND)
        );
    }

    #[tokio::test]
    async fn test_ignore_patterns_split_defaults() {
        let server = MockServer::start().await;
        let (dir, cp) = daemon(&server).await;
        std::fs::write(dir.path().join(".syftignore"), "*.log\nalice@x.org/big\n").unwrap();

        let patterns = cp.ignore_patterns().await.unwrap();
        assert!(patterns.default_patterns.contains(&"*.log".to_string()));
        assert_eq!(patterns.custom_patterns, vec!["alice@x.org/big".to_string()]);
        assert!(patterns.syftignore_path.ends_with(".syftignore"));
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_unavailable() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(
            &config_path,
            r#"{"client_url":"http://127.0.0.1:1","client_token":"t"}"#,
        )
        .unwrap();
        let cp = DaemonControlPlane::new(config_path, None, None, Duration::from_millis(500));
        let err = cp.daemon_state().await.unwrap_err();
        assert!(err.is_unavailable(), "{err}");
    }
}
