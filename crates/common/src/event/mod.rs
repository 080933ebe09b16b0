//! Normalized sync events.
//!
//! Every producer (push stream, poller, socket-status bridge) turns its wire
//! data into a [`SyncEvent`] before it reaches the reconciler. Payloads that
//! do not validate are rejected here and never touch engine state.

use serde::{Deserialize, Serialize};

use crate::tree::{SyncState, UnknownSyncState};

mod decoder;

pub use decoder::FrameDecoder;

#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload has neither a path nor a summary")]
    MissingPath,
    #[error("file event for {0} has no state")]
    MissingState(String),
    #[error(transparent)]
    UnknownState(#[from] UnknownSyncState),
    #[error("unknown socket status: {0}")]
    UnknownStatus(String),
}

/// Scale a progress value to percent.
///
/// Values at or below 1.0 are fractions; anything else is already a percent.
/// The result is clamped to 0..=100.
pub fn normalize_progress(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let scaled = if value <= 1.0 { value * 100.0 } else { value };
    scaled.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "upload" | "up" => Some(Direction::Upload),
            "download" | "down" => Some(Direction::Download),
            _ => None,
        }
    }
}

/// Per-file state change
#[derive(Debug, Clone, PartialEq)]
pub struct FileEvent {
    pub path: String,
    pub state: SyncState,
    pub progress: Option<f64>,
    pub direction: Option<Direction>,
    pub size: Option<u64>,
    pub error: Option<String>,
    pub conflicted: bool,
    pub upload_id: Option<String>,
}

impl FileEvent {
    pub fn new(path: impl Into<String>, state: SyncState) -> Self {
        Self {
            path: path.into(),
            state,
            progress: None,
            direction: None,
            size: None,
            error: None,
            conflicted: false,
            upload_id: None,
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(normalize_progress(progress));
        self
    }
}

/// Queue counters reported by the daemon
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    #[serde(default)]
    pub pending: u32,
    #[serde(default)]
    pub syncing: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub error: u32,
}

/// Socket-status bridge notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub connected: bool,
    pub url: Option<String>,
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct RawStatus {
    status: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl StatusEvent {
    /// Parse `{status: connected|disconnected, url, message}`
    pub fn from_json(data: &str) -> Result<Self, EventParseError> {
        let raw: RawStatus = serde_json::from_str(data)?;
        let connected = match raw.status.trim().to_ascii_lowercase().as_str() {
            "connected" | "open" => true,
            "disconnected" | "closed" => false,
            other => return Err(EventParseError::UnknownStatus(other.to_string())),
        };
        Ok(Self {
            connected,
            url: raw.url,
            message: raw.message,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    File(FileEvent),
    Summary(QueueSummary),
    Status(StatusEvent),
}

/// Push-stream payload; both camelCase and snake_case keys are accepted
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, alias = "conflictState")]
    conflict_state: Option<String>,
    #[serde(default, alias = "uploadId")]
    upload_id: Option<String>,
    #[serde(default)]
    summary: Option<QueueSummary>,
}

/// Whether a `conflictState` value marks a conflict
pub fn is_conflict_marker(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") => false,
        Some(v) => !v.eq_ignore_ascii_case("none"),
    }
}

impl SyncEvent {
    /// Decode one push-stream payload.
    ///
    /// A payload may carry a file update, a summary, or both; a summary
    /// without a path is a pure summary event.
    pub fn from_json(data: &str) -> Result<Vec<SyncEvent>, EventParseError> {
        let raw: RawEvent = serde_json::from_str(data)?;
        let mut events = Vec::with_capacity(2);

        match raw.path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => {
                let state_raw = raw
                    .state
                    .as_deref()
                    .ok_or_else(|| EventParseError::MissingState(path.to_string()))?;
                let state: SyncState = state_raw.parse()?;
                events.push(SyncEvent::File(FileEvent {
                    path: path.to_string(),
                    state,
                    progress: raw.progress.map(normalize_progress),
                    direction: raw.direction.as_deref().and_then(Direction::parse),
                    size: raw.size,
                    error: raw.error,
                    conflicted: state.is_conflict()
                        || is_conflict_marker(raw.conflict_state.as_deref()),
                    upload_id: raw.upload_id,
                }));
            }
            _ if raw.summary.is_none() => return Err(EventParseError::MissingPath),
            _ => {}
        }

        if let Some(summary) = raw.summary {
            events.push(SyncEvent::Summary(summary));
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_normalization() {
        assert_eq!(normalize_progress(0.5), 50.0);
        assert_eq!(normalize_progress(1.0), 100.0);
        assert_eq!(normalize_progress(42.0), 42.0);
        assert_eq!(normalize_progress(250.0), 100.0);
        assert_eq!(normalize_progress(-3.0), 0.0);
        assert_eq!(normalize_progress(f64::NAN), 0.0);
    }

    #[test]
    fn test_file_event_camel_case() {
        let events = SyncEvent::from_json(
            r#"{"path":"alice@x.org/a.csv","state":"uploading","progress":0.25,"conflictState":"none","uploadId":"u1"}"#,
        )
        .unwrap();
        assert_eq!(events.len(), 1);
        let SyncEvent::File(file) = &events[0] else {
            panic!("expected a file event");
        };
        assert_eq!(file.state, SyncState::Uploading);
        assert_eq!(file.progress, Some(25.0));
        assert!(!file.conflicted);
        assert_eq!(file.upload_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_conflict_from_marker_and_state() {
        let events = SyncEvent::from_json(
            r#"{"path":"a/b","state":"completed","conflict_state":"remote_newer"}"#,
        )
        .unwrap();
        assert!(matches!(&events[0], SyncEvent::File(f) if f.conflicted));

        let events = SyncEvent::from_json(r#"{"path":"a/b","state":"rejected"}"#).unwrap();
        assert!(matches!(&events[0], SyncEvent::File(f) if f.conflicted));
    }

    #[test]
    fn test_pure_summary() {
        let events =
            SyncEvent::from_json(r#"{"summary":{"pending":2,"syncing":1,"completed":9,"error":0}}"#)
                .unwrap();
        assert_eq!(
            events,
            vec![SyncEvent::Summary(QueueSummary {
                pending: 2,
                syncing: 1,
                completed: 9,
                error: 0
            })]
        );
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(
            SyncEvent::from_json("{not json"),
            Err(EventParseError::Json(_))
        ));
        assert!(matches!(
            SyncEvent::from_json(r#"{"state":"syncing"}"#),
            Err(EventParseError::MissingPath)
        ));
        assert!(matches!(
            SyncEvent::from_json(r#"{"path":"a/b"}"#),
            Err(EventParseError::MissingState(_))
        ));
        assert!(matches!(
            SyncEvent::from_json(r#"{"path":"a/b","state":"warping"}"#),
            Err(EventParseError::UnknownState(_))
        ));
    }

    #[test]
    fn test_status_event() {
        let status =
            StatusEvent::from_json(r#"{"status":"connected","url":"ws://127.0.0.1:7938"}"#).unwrap();
        assert!(status.connected);
        assert!(StatusEvent::from_json(r#"{"status":"maybe"}"#).is_err());
    }
}
