use chrono::{DateTime, Utc};
use serde::Serialize;

use common::event::QueueSummary;
use common::health::HealthStats;
use common::ledger::{ActivityEntry, ConnectionLogEntry};
use common::status::ConnectionStatus;
use common::tree::Sections;

/// Owned view of the engine published to observers.
///
/// Observers never see engine internals; every field is a copy taken at
/// `taken_at`.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub status: ConnectionStatus,
    pub health: HealthStats,
    pub summary: QueueSummary,
    pub sections: Sections,
    pub activity: Vec<ActivityEntry>,
    pub connection_log: Vec<ConnectionLogEntry>,
    /// paths with an ignore toggle in flight
    pub busy: Vec<String>,
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn recent_activity(&self, n: usize) -> &[ActivityEntry] {
        &self.activity[..n.min(self.activity.len())]
    }

    pub fn recent_connections(&self, n: usize) -> &[ConnectionLogEntry] {
        &self.connection_log[..n.min(self.connection_log.len())]
    }

    pub fn is_busy(&self, path: &str) -> bool {
        self.busy.iter().any(|p| p == path)
    }
}
