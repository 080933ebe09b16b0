use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BoundedLog;
use crate::event::{Direction, FileEvent};
use crate::tree::SyncState;

pub const ACTIVITY_LOG_CAPACITY: usize = 500;
pub const ACTIVITY_LOG_KEY: &str = "activity_log";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub path: String,
    pub status: SyncState,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub upload_id: Option<String>,
}

impl ActivityEntry {
    fn from_event(event: &FileEvent, now: DateTime<Utc>) -> Self {
        Self {
            path: event.path.clone(),
            status: event.state,
            progress: event.progress,
            error: event.error.clone(),
            timestamp: now,
            direction: event.direction,
            size: event.size,
            upload_id: event.upload_id.clone(),
        }
    }
}

/// One live entry per path, newest first
#[derive(Debug, Clone)]
pub struct ActivityLog {
    inner: BoundedLog<ActivityEntry>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(ACTIVITY_LOG_CAPACITY)
    }
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: BoundedLog::new(capacity),
        }
    }

    /// Restore persisted entries, dropping duplicates past the first per path
    pub fn restore(capacity: usize, entries: Vec<ActivityEntry>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|e| seen.insert(e.path.clone()))
            .collect();
        Self {
            inner: BoundedLog::from_entries(capacity, entries),
        }
    }

    /// Record a file event.
    ///
    /// An existing entry for the path is updated in place and only moves to
    /// the front when its status changed. Fields the event leaves empty keep
    /// their previous value.
    pub fn record(&mut self, event: &FileEvent, now: DateTime<Utc>) {
        match self.inner.position(|e| e.path == event.path) {
            Some(idx) => {
                let mut changed = false;
                if let Some(entry) = self.inner.get_mut(idx) {
                    changed = entry.status != event.state;
                    entry.status = event.state;
                    entry.timestamp = now;
                    entry.progress = event.progress.or(entry.progress);
                    entry.error = event.error.clone();
                    entry.direction = event.direction.or(entry.direction);
                    entry.size = event.size.or(entry.size);
                    if event.upload_id.is_some() {
                        entry.upload_id = event.upload_id.clone();
                    }
                }
                if changed {
                    self.inner.promote(idx);
                }
            }
            None => self.inner.push_front(ActivityEntry::from_event(event, now)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.inner.to_vec()
    }

    pub fn recent(&self, n: usize) -> Vec<ActivityEntry> {
        self.inner.iter().take(n).cloned().collect()
    }
}
