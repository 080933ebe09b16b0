//! Single dispatch point for normalized events.
//!
//! Every [`SyncEvent`], whether it came from the push stream, a poll or the
//! socket-status bridge, goes through [`Reconciler::apply`]. The reconciler
//! owns the tree and both logs; it returns the nodes that need rendering and
//! leaves I/O to the engine.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use common::event::{FileEvent, QueueSummary, StatusEvent, SyncEvent};
use common::ledger::{
    ActivityEntry, ActivityLog, Channel, ConnectionKind, ConnectionLog, ConnectionLogEntry,
};
use common::paths;
use common::tree::{
    DiscoveryFile, NodeDetails, Sections, SyncNode, SyncTreeStore, TrustedDatasites,
};

/// One node whose displayed state changed
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub path: String,
    pub node: SyncNode,
}

/// An accepted ignore toggle, ready to be sent to the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleRequest {
    pub path: String,
    pub ignore: bool,
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToggleError {
    #[error("a toggle for {0} is already in flight")]
    InFlight(String),
    #[error("unknown path: {0}")]
    UnknownPath(String),
    #[error("{0} is essential and cannot be ignored")]
    Essential(String),
    #[error("control plane rejected toggle for {path}: {message}")]
    Rejected { path: String, message: String },
}

pub struct Reconciler {
    tree: SyncTreeStore,
    activity: ActivityLog,
    connections: ConnectionLog,
    summary: QueueSummary,
    identity: Option<String>,
    trusted: TrustedDatasites,
    busy: BTreeSet<String>,
    bridge_active: bool,
    activity_dirty: bool,
    connections_dirty: bool,
}

impl Reconciler {
    pub fn new(
        identity: Option<String>,
        trusted: TrustedDatasites,
        activity_capacity: usize,
        connection_capacity: usize,
    ) -> Self {
        Self {
            tree: SyncTreeStore::new(),
            activity: ActivityLog::new(activity_capacity),
            connections: ConnectionLog::new(connection_capacity),
            summary: QueueSummary::default(),
            identity,
            trusted,
            busy: BTreeSet::new(),
            bridge_active: false,
            activity_dirty: false,
            connections_dirty: false,
        }
    }

    /// Replace both logs with persisted entries
    pub fn restore_logs(&mut self, activity: Vec<ActivityEntry>, connections: Vec<ConnectionLogEntry>) {
        let activity_capacity = self.activity.capacity();
        let connection_capacity = self.connections.capacity();
        self.activity = ActivityLog::restore(activity_capacity, activity);
        self.connections = ConnectionLog::restore(connection_capacity, connections);
    }

    pub fn tree(&self) -> &SyncTreeStore {
        &self.tree
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn connections(&self) -> &ConnectionLog {
        &self.connections
    }

    pub fn summary(&self) -> QueueSummary {
        self.summary
    }

    pub fn bridge_active(&self) -> bool {
        self.bridge_active
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn set_identity(&mut self, identity: Option<String>) {
        self.identity = identity;
    }

    pub fn set_trusted(&mut self, trusted: TrustedDatasites) {
        self.trusted = trusted;
    }

    /// Paths with a toggle in flight
    pub fn busy(&self) -> Vec<String> {
        self.busy.iter().cloned().collect()
    }

    pub fn apply(&mut self, event: SyncEvent, now: DateTime<Utc>) -> Vec<RenderRequest> {
        match event {
            SyncEvent::File(file) => self.apply_file(file, now),
            SyncEvent::Summary(summary) => {
                self.summary = summary;
                Vec::new()
            }
            SyncEvent::Status(status) => {
                self.apply_status(&status, now);
                Vec::new()
            }
        }
    }

    fn apply_file(&mut self, mut event: FileEvent, now: DateTime<Utc>) -> Vec<RenderRequest> {
        let normalized = paths::normalize(&event.path);
        let path = normalized.trim_end_matches('/').to_string();
        if path.is_empty() {
            return Vec::new();
        }
        tracing::debug!(path = %path, state = %event.state, "file event");

        let dir_like = paths::has_dir_marker(&normalized) || self.tree.is_dir(&path);
        event.path = path.clone();
        if !dir_like {
            self.activity.record(&event, now);
            self.activity_dirty = true;
        }

        let mut changed = Vec::new();
        if self
            .tree
            .apply_state(&path, event.state, event.progress, event.conflicted)
        {
            changed.push(path.clone());
        }
        changed.extend(self.tree.recompute_ancestors(&path));
        self.renders(changed)
    }

    fn apply_status(&mut self, status: &StatusEvent, now: DateTime<Utc>) {
        let kind = if status.connected {
            ConnectionKind::Connected
        } else {
            ConnectionKind::Disconnected
        };
        let message = status
            .message
            .clone()
            .or_else(|| status.url.clone())
            .unwrap_or_else(|| kind.to_string());
        self.record_connection(kind, Channel::Websocket, message, now);
        if self.bridge_active != status.connected {
            tracing::info!(active = status.connected, "socket bridge changed");
        }
        self.bridge_active = status.connected;
    }

    pub fn record_connection(
        &mut self,
        kind: ConnectionKind,
        channel: Channel,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.connections.record(kind, channel, message, now);
        self.connections_dirty = true;
    }

    /// Merge a directory listing. `None` is a full refresh from the root.
    pub fn apply_listing(&mut self, parent: Option<&str>, listing: Vec<SyncNode>) -> Vec<RenderRequest> {
        match parent.map(|p| p.trim_end_matches('/')).filter(|p| !p.is_empty()) {
            None => {
                self.tree.replace_root(listing);
                Vec::new()
            }
            Some(parent) => {
                let changed = self.tree.insert_listing(Some(parent), listing);
                self.renders(changed)
            }
        }
    }

    pub fn set_discovery(&mut self, files: Vec<DiscoveryFile>) {
        self.tree.set_discovery(files);
    }

    pub fn remove_discovered(&mut self, path: &str, is_folder: bool) -> usize {
        self.tree.remove_discovered(path, is_folder)
    }

    /// Overlay live state onto details fetched from the control plane
    pub fn overlay_details(&self, details: &mut NodeDetails) {
        if let Some(node) = self.tree.get(&details.path) {
            details.sync_state = node.sync_state;
            details.progress = node.progress;
            details.is_ignored = node.is_ignored;
        }
        if let Some(entry) = self
            .activity
            .entries()
            .into_iter()
            .find(|e| e.path == details.path)
        {
            if details.error.is_none() {
                details.error = entry.error;
            }
        }
    }

    pub fn sections(&self) -> Sections {
        Sections::build(
            self.tree.roots(),
            self.identity.as_deref(),
            &self.trusted,
            self.tree.discovery(),
        )
    }

    /// Validate and optimistically apply an ignore toggle.
    ///
    /// The path stays busy until [`Reconciler::finish_toggle`].
    pub fn begin_toggle(
        &mut self,
        path: &str,
    ) -> Result<(ToggleRequest, Vec<RenderRequest>), ToggleError> {
        let path = paths::normalize(path).trim_end_matches('/').to_string();
        if self.busy.contains(&path) {
            return Err(ToggleError::InFlight(path));
        }
        let Some(node) = self.tree.get(&path) else {
            return Err(ToggleError::UnknownPath(path));
        };
        let ignore = !node.is_ignored;
        if ignore && node.is_essential {
            return Err(ToggleError::Essential(path));
        }
        let is_dir = node.is_dir;

        self.tree.set_ignored(&path, ignore);
        self.busy.insert(path.clone());
        let mut changed = vec![path.clone()];
        changed.extend(self.tree.recompute_ancestors(&path));

        let request = ToggleRequest { path, ignore, is_dir };
        Ok((request, self.renders(changed)))
    }

    /// Release a toggle, reverting the flip when the call failed
    pub fn finish_toggle(&mut self, request: &ToggleRequest, ok: bool) -> Vec<RenderRequest> {
        self.busy.remove(&request.path);
        let mut changed = vec![request.path.clone()];
        if !ok {
            self.tree.set_ignored(&request.path, !request.ignore);
            changed.extend(self.tree.recompute_ancestors(&request.path));
        }
        self.renders(changed)
    }

    /// Logs changed since the last call, for persistence
    pub fn take_dirty_activity(&mut self) -> Option<Vec<ActivityEntry>> {
        std::mem::take(&mut self.activity_dirty).then(|| self.activity.entries())
    }

    pub fn take_dirty_connections(&mut self) -> Option<Vec<ConnectionLogEntry>> {
        std::mem::take(&mut self.connections_dirty).then(|| self.connections.entries())
    }

    fn renders(&self, paths: Vec<String>) -> Vec<RenderRequest> {
        paths
            .into_iter()
            .filter_map(|path| {
                self.tree.get(&path).cloned().map(|node| RenderRequest { path, node })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::tree::SyncState;

    fn reconciler() -> Reconciler {
        let mut r = Reconciler::new(Some("alice@x.org".into()), TrustedDatasites::default(), 500, 200);
        r.apply_listing(None, vec![SyncNode::dir("alice@x.org"), SyncNode::dir("bob@y.org")]);
        r.apply_listing(
            Some("alice@x.org"),
            vec![SyncNode::dir("alice@x.org/public"), SyncNode::file("alice@x.org/notes.md")],
        );
        r.apply_listing(Some("alice@x.org/public"), vec![SyncNode::dir("alice@x.org/public/sub")]);
        r.apply_listing(
            Some("alice@x.org/public/sub"),
            vec![
                SyncNode::file("alice@x.org/public/sub/file.csv"),
                SyncNode::file("alice@x.org/public/sub/other.csv"),
                SyncNode::file("alice@x.org/public/sub/syft.pub.yaml").essential(true),
            ],
        );
        r
    }

    fn file(path: &str, state: SyncState) -> SyncEvent {
        SyncEvent::File(FileEvent::new(path, state))
    }

    #[test]
    fn test_file_event_renders_node_then_ancestors() {
        let mut r = reconciler();
        let renders = r.apply(
            file("/home/u/SyftBox/datasites/alice@x.org/public/sub/file.csv", SyncState::Syncing),
            Utc::now(),
        );
        let order: Vec<&str> = renders.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "alice@x.org/public/sub/file.csv",
                "alice@x.org/public/sub",
                "alice@x.org/public",
                "alice@x.org",
            ]
        );
        assert_eq!(renders[1].node.sync_state, SyncState::Syncing);
        assert!(renders[1].node.has_mixed_state);
        assert_eq!(r.activity().len(), 1);
        assert_eq!(r.activity().entries()[0].path, "alice@x.org/public/sub/file.csv");
    }

    #[test]
    fn test_directory_events_skip_activity() {
        let mut r = reconciler();
        r.apply(file("alice@x.org/public/", SyncState::Syncing), Utc::now());
        r.apply(file("alice@x.org/public/sub", SyncState::Syncing), Utc::now());
        assert!(r.activity().is_empty());
    }

    #[test]
    fn test_unknown_path_still_logs_activity() {
        let mut r = reconciler();
        let renders = r.apply(file("carol@z.org/a.csv", SyncState::Pending), Utc::now());
        assert!(renders.is_empty());
        assert_eq!(r.activity().len(), 1);
        assert!(r.take_dirty_activity().is_some());
        assert!(r.take_dirty_activity().is_none());
    }

    #[test]
    fn test_summary_and_status_events() {
        let mut r = reconciler();
        let summary = QueueSummary {
            pending: 1,
            syncing: 2,
            completed: 3,
            error: 4,
        };
        r.apply(SyncEvent::Summary(summary), Utc::now());
        assert_eq!(r.summary(), summary);

        let status = StatusEvent {
            connected: true,
            url: Some("ws://127.0.0.1:7938".into()),
            message: None,
        };
        r.apply(SyncEvent::Status(status), Utc::now());
        assert!(r.bridge_active());
        let head = &r.connections().entries()[0];
        assert_eq!(head.channel, Channel::Websocket);
        assert_eq!(head.kind, ConnectionKind::Connected);
    }

    #[test]
    fn test_toggle_rules() {
        let mut r = reconciler();
        assert!(matches!(
            r.begin_toggle("alice@x.org/missing"),
            Err(ToggleError::UnknownPath(_))
        ));
        assert!(matches!(
            r.begin_toggle("alice@x.org/public/sub/syft.pub.yaml"),
            Err(ToggleError::Essential(_))
        ));

        let (request, renders) = r.begin_toggle("alice@x.org/public/sub/file.csv").unwrap();
        assert!(request.ignore);
        assert!(!request.is_dir);
        assert_eq!(renders[0].path, "alice@x.org/public/sub/file.csv");
        assert!(r.tree().get("alice@x.org/public/sub").unwrap().has_mixed_ignore);
        assert!(matches!(
            r.begin_toggle("alice@x.org/public/sub/file.csv"),
            Err(ToggleError::InFlight(_))
        ));
        assert_eq!(r.busy(), vec!["alice@x.org/public/sub/file.csv".to_string()]);

        r.finish_toggle(&request, false);
        assert!(r.busy().is_empty());
        assert!(!r.tree().get("alice@x.org/public/sub/file.csv").unwrap().is_ignored);
        assert!(!r.tree().get("alice@x.org/public/sub").unwrap().has_mixed_ignore);
    }

    #[test]
    fn test_sections_split_identity() {
        let mut r = reconciler();
        r.set_trusted(TrustedDatasites::new(["BOB@y.org"]));
        let sections = r.sections();
        let mine = sections.section(common::tree::SectionKind::MyDatasite).unwrap();
        assert_eq!(mine.roots[0].name, "alice@x.org");
        let trusted = sections.section(common::tree::SectionKind::Trusted).unwrap();
        assert_eq!(trusted.roots[0].name, "bob@y.org");
    }
}
