use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Synchronization state of a single path as reported by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Completed,
    Syncing,
    Uploading,
    Downloading,
    Pending,
    Error,
    Conflicted,
    Rejected,
    Ignored,
    Partial,
    Paused,
}

/// The four aggregation ranks a folder can take, ordered by priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rank {
    Completed = 0,
    Pending = 1,
    Syncing = 2,
    Error = 3,
}

impl Rank {
    /// The state a folder shows when this rank wins
    pub fn as_state(self) -> SyncState {
        match self {
            Rank::Completed => SyncState::Completed,
            Rank::Pending => SyncState::Pending,
            Rank::Syncing => SyncState::Syncing,
            Rank::Error => SyncState::Error,
        }
    }
}

impl SyncState {
    pub fn rank(self) -> Rank {
        match self {
            SyncState::Error | SyncState::Conflicted | SyncState::Rejected => Rank::Error,
            SyncState::Syncing | SyncState::Uploading | SyncState::Downloading => Rank::Syncing,
            SyncState::Pending | SyncState::Partial | SyncState::Paused => Rank::Pending,
            SyncState::Completed | SyncState::Ignored => Rank::Completed,
        }
    }

    /// States that keep the polling fallback on its fast cadence
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SyncState::Syncing | SyncState::Pending | SyncState::Uploading | SyncState::Downloading
        )
    }

    pub fn is_conflict(self) -> bool {
        matches!(self, SyncState::Conflicted | SyncState::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Completed => "completed",
            SyncState::Syncing => "syncing",
            SyncState::Uploading => "uploading",
            SyncState::Downloading => "downloading",
            SyncState::Pending => "pending",
            SyncState::Error => "error",
            SyncState::Conflicted => "conflicted",
            SyncState::Rejected => "rejected",
            SyncState::Ignored => "ignored",
            SyncState::Partial => "partial",
            SyncState::Paused => "paused",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sync state: {0}")]
pub struct UnknownSyncState(pub String);

impl FromStr for SyncState {
    type Err = UnknownSyncState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s.trim().to_ascii_lowercase().as_str() {
            "completed" | "complete" | "synced" | "done" => SyncState::Completed,
            "syncing" | "in_progress" | "inprogress" => SyncState::Syncing,
            "uploading" => SyncState::Uploading,
            "downloading" => SyncState::Downloading,
            "pending" | "queued" => SyncState::Pending,
            "error" | "failed" => SyncState::Error,
            "conflicted" | "conflict" => SyncState::Conflicted,
            "rejected" => SyncState::Rejected,
            "ignored" => SyncState::Ignored,
            "partial" => SyncState::Partial,
            "paused" => SyncState::Paused,
            _ => return Err(UnknownSyncState(s.to_string())),
        };
        Ok(state)
    }
}

/// One filesystem path known to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncNode {
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    #[serde(default)]
    pub child_count: Option<u32>,
    #[serde(default)]
    pub sync_state: SyncState,
    #[serde(default)]
    pub conflicted: bool,
    #[serde(default)]
    pub is_ignored: bool,
    #[serde(default)]
    pub is_essential: bool,
    #[serde(default)]
    pub is_subscribed: bool,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub has_mixed_state: bool,
    #[serde(default)]
    pub has_mixed_ignore: bool,
}

impl SyncNode {
    pub fn file(path: impl Into<String>) -> Self {
        Self::new(path, false)
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self::new(path, true)
    }

    fn new(path: impl Into<String>, is_dir: bool) -> Self {
        let path = path.into();
        let name = crate::paths::file_name(&path).to_string();
        Self {
            path,
            name,
            is_dir,
            child_count: None,
            sync_state: SyncState::Completed,
            conflicted: false,
            is_ignored: false,
            is_essential: false,
            is_subscribed: false,
            progress: None,
            size: None,
            last_modified: None,
            has_mixed_state: false,
            has_mixed_ignore: false,
        }
    }

    pub fn with_state(mut self, state: SyncState) -> Self {
        self.sync_state = state;
        self
    }

    pub fn ignored(mut self, ignored: bool) -> Self {
        self.is_ignored = ignored;
        self
    }

    pub fn essential(mut self, essential: bool) -> Self {
        self.is_essential = essential;
        self
    }
}

/// Permission line from a `syft.pub.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubPermission {
    pub user: String,
    pub access: String,
    pub is_wildcard: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubInfo {
    pub permissions: Vec<PubPermission>,
    pub description: Option<String>,
}

/// Detailed view of a single node, fetched on demand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDetails {
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub file_count: Option<u32>,
    pub sync_state: SyncState,
    pub progress: Option<f64>,
    pub error: Option<String>,
    pub last_modified: Option<String>,
    pub is_ignored: bool,
    /// The ignore pattern that matched this path, if any
    pub ignore_pattern: Option<String>,
    pub is_essential: bool,
    /// The essential pattern that matched this path, if any
    pub essential_pattern: Option<String>,
    pub is_priority: bool,
    pub file_type: Option<String>,
    pub file_content: Option<String>,
    pub pub_info: Option<PubInfo>,
}

/// Content another datasite has shared with the current identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedWithMeItem {
    pub owner: String,
    pub path: String,
    pub description: Option<String>,
    pub access: String,
    pub is_subscribed: bool,
}

/// A remote file the daemon can sync but is not subscribed to yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryFile {
    pub path: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parsing_aliases() {
        assert_eq!("Synced".parse::<SyncState>().unwrap(), SyncState::Completed);
        assert_eq!("failed".parse::<SyncState>().unwrap(), SyncState::Error);
        assert_eq!("uploading".parse::<SyncState>().unwrap(), SyncState::Uploading);
        assert!("teleporting".parse::<SyncState>().is_err());
    }

    #[test]
    fn test_rank_order() {
        assert!(Rank::Error > Rank::Syncing);
        assert!(Rank::Syncing > Rank::Pending);
        assert!(Rank::Pending > Rank::Completed);
        assert_eq!(SyncState::Conflicted.rank(), Rank::Error);
        assert_eq!(SyncState::Downloading.rank(), Rank::Syncing);
        assert_eq!(SyncState::Paused.rank(), Rank::Pending);
        assert_eq!(SyncState::Ignored.rank(), Rank::Completed);
    }
}
