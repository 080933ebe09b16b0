//! Daemon queue-status wire types.
//!
//! The poller fetches one [`QueueStatus`] per tick and turns it into the same
//! [`SyncEvent`]s the push stream delivers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::event::{is_conflict_marker, normalize_progress, Direction, FileEvent, QueueSummary, SyncEvent};
use crate::tree::SyncState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFileStatus {
    pub path: String,
    pub state: String,
    #[serde(default, alias = "conflict_state")]
    pub conflict_state: Option<String>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, alias = "updated_at")]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    #[serde(default)]
    pub files: Vec<SyncFileStatus>,
    #[serde(default)]
    pub summary: Option<QueueSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadInfo {
    pub id: String,
    pub key: String,
    #[serde(default, alias = "local_path")]
    pub local_path: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, alias = "uploaded_bytes")]
    pub uploaded_bytes: u64,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub error: Option<String>,
}

impl UploadInfo {
    /// Still moving bytes; completed and failed uploads are not
    pub fn in_flight(&self) -> bool {
        !matches!(
            self.state.to_ascii_lowercase().as_str(),
            "completed" | "complete" | "done" | "failed" | "error" | "cancelled" | "canceled"
        )
    }

    /// Map the upload's own state words onto a sync state
    fn sync_state(&self) -> SyncState {
        match self.state.to_ascii_lowercase().as_str() {
            "completed" | "complete" | "done" => SyncState::Completed,
            "failed" | "error" | "cancelled" | "canceled" => SyncState::Error,
            "paused" => SyncState::Paused,
            "pending" | "queued" | "" => SyncState::Pending,
            _ => SyncState::Uploading,
        }
    }
}

/// What can be done to one upload in the daemon's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadAction {
    Pause,
    Resume,
    Restart,
    Cancel,
}

impl UploadAction {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadAction::Pause => "pause",
            UploadAction::Resume => "resume",
            UploadAction::Restart => "restart",
            UploadAction::Cancel => "cancel",
        }
    }
}

impl fmt::Display for UploadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported upload action: {0}")]
pub struct UnknownUploadAction(pub String);

impl FromStr for UploadAction {
    type Err = UnknownUploadAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" => Ok(UploadAction::Pause),
            "resume" => Ok(UploadAction::Resume),
            "restart" => Ok(UploadAction::Restart),
            "cancel" => Ok(UploadAction::Cancel),
            _ => Err(UnknownUploadAction(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsocketStatus {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    #[serde(default)]
    pub websocket: Option<WebsocketStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRuntime {
    #[serde(default)]
    pub runtime: Option<RuntimeStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    #[serde(default)]
    pub sync: Option<SyncStatus>,
    #[serde(default)]
    pub uploads: Option<Vec<UploadInfo>>,
    #[serde(default)]
    pub status: Option<DaemonRuntime>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Wrapper the daemon uses for `GET /v1/uploads/`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadList {
    #[serde(default)]
    pub uploads: Vec<UploadInfo>,
}

impl QueueStatus {
    /// Scale every progress value to percent
    pub fn normalize(&mut self) {
        if let Some(sync) = self.sync.as_mut() {
            for file in &mut sync.files {
                file.progress = normalize_progress(file.progress);
            }
        }
        if let Some(uploads) = self.uploads.as_mut() {
            for upload in uploads.iter_mut() {
                upload.progress = normalize_progress(upload.progress);
            }
        }
    }

    pub fn websocket_connected(&self) -> Option<bool> {
        self.status
            .as_ref()?
            .runtime
            .as_ref()?
            .websocket
            .as_ref()
            .map(|w| w.connected)
    }

    pub fn has_uploads_in_flight(&self) -> bool {
        self.uploads
            .as_ref()
            .is_some_and(|u| u.iter().any(UploadInfo::in_flight))
    }

    /// Derive file, upload and summary events from one response.
    ///
    /// Progress is copied as is, so call [`QueueStatus::normalize`] first.
    /// Files whose state does not parse are skipped; a single bad entry must
    /// not hide the rest of the queue.
    pub fn to_events(&self) -> Vec<SyncEvent> {
        let mut events = Vec::new();

        if let Some(sync) = &self.sync {
            for file in &sync.files {
                let Ok(state) = file.state.parse::<SyncState>() else {
                    tracing::debug!(path = %file.path, state = %file.state, "skipping queue entry with unknown state");
                    continue;
                };
                events.push(SyncEvent::File(FileEvent {
                    path: file.path.clone(),
                    state,
                    progress: Some(file.progress),
                    direction: None,
                    size: None,
                    error: file.error.clone(),
                    conflicted: state.is_conflict()
                        || is_conflict_marker(file.conflict_state.as_deref()),
                    upload_id: None,
                }));
            }
        }

        if let Some(uploads) = &self.uploads {
            for upload in uploads {
                let path = upload.local_path.clone().unwrap_or_else(|| upload.key.clone());
                events.push(SyncEvent::File(FileEvent {
                    path,
                    state: upload.sync_state(),
                    progress: Some(upload.progress),
                    direction: Some(Direction::Upload),
                    size: Some(upload.size),
                    error: upload.error.clone(),
                    conflicted: false,
                    upload_id: Some(upload.id.clone()),
                }));
            }
        }

        if let Some(summary) = self.sync.as_ref().and_then(|s| s.summary) {
            events.push(SyncEvent::Summary(summary));
        }
        events
    }
}
