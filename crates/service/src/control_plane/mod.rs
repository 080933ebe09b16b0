//! The seam between the engine and the sync daemon.
//!
//! The engine only ever talks to an `Arc<dyn ControlPlane>`; the real
//! implementation is [`DaemonControlPlane`], tests inject a fake.

use async_trait::async_trait;

use common::ignore::IgnorePatterns;
use common::queue::{QueueStatus, UploadAction};
use common::status::DaemonState;
use common::tree::{DiscoveryFile, NodeDetails, SharedWithMeItem, SyncNode};

mod daemon;
mod local_tree;
pub mod requests;

pub use daemon::{DaemonConfigFile, DaemonControlPlane};
pub use local_tree::LocalTree;
pub use requests::{ApiClient, ApiRequest};

#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("daemon unavailable: {0}")]
    Unavailable(String),
    #[error("daemon not configured: {0}")]
    NotConfigured(String),
    #[error("HTTP {0}: {1}")]
    HttpStatus(http::StatusCode, String),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("path does not exist: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("background task failed: {0}")]
    Task(String),
}

impl ControlPlaneError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ControlPlaneError::Unavailable(_))
    }
}

impl From<reqwest::Error> for ControlPlaneError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            ControlPlaneError::Unavailable(e.to_string())
        } else if e.is_decode() {
            ControlPlaneError::Decode(e.to_string())
        } else {
            ControlPlaneError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
pub trait ControlPlane: Send + Sync + 'static {
    /// Direct children of `path`, or the datasite roots for `None`
    async fn list_dir(&self, path: Option<&str>) -> Result<Vec<SyncNode>, ControlPlaneError>;

    async fn get_details(&self, path: &str) -> Result<NodeDetails, ControlPlaneError>;

    async fn add_ignore(&self, pattern: &str) -> Result<(), ControlPlaneError>;

    async fn remove_ignore(&self, pattern: &str) -> Result<(), ControlPlaneError>;

    /// Built-in and custom `.syftignore` patterns, and where the file lives
    async fn ignore_patterns(&self) -> Result<IgnorePatterns, ControlPlaneError>;

    async fn shared_with_me(&self) -> Result<Vec<SharedWithMeItem>, ControlPlaneError>;

    async fn subscribe_shared(&self, path: &str) -> Result<(), ControlPlaneError>;

    async fn unsubscribe_shared(&self, path: &str) -> Result<(), ControlPlaneError>;

    async fn queue_status(&self) -> Result<QueueStatus, ControlPlaneError>;

    async fn upload_action(&self, id: &str, action: UploadAction) -> Result<(), ControlPlaneError>;

    async fn discovery_files(&self) -> Result<Vec<DiscoveryFile>, ControlPlaneError>;

    async fn subscribe(&self, path: &str, is_folder: bool) -> Result<(), ControlPlaneError>;

    /// Ask the daemon to run a sync pass now
    async fn trigger_sync(&self) -> Result<(), ControlPlaneError>;

    async fn daemon_state(&self) -> Result<DaemonState, ControlPlaneError>;
}
