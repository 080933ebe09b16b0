//! In-memory sync tree.
//!
//! Nodes are keyed by their datasite-relative path and indexed by parent so a
//! folder's aggregate state can be recomputed from its direct children
//! without scanning the whole map.

use std::collections::{BTreeSet, HashMap};

use crate::paths;

mod node;
mod sections;

pub use node::{
    DiscoveryFile, NodeDetails, PubInfo, PubPermission, Rank, SharedWithMeItem, SyncNode,
    SyncState, UnknownSyncState,
};
pub use sections::{
    group_discovery, AvailableFolder, AvailableOwner, SectionKind, Sections, TreeSection,
    TrustedDatasites,
};

/// Key used in the children index for top-level (datasite) nodes
const ROOT_KEY: &str = "";

/// Aggregate of a folder's direct children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub state: SyncState,
    pub has_mixed_state: bool,
    pub has_mixed_ignore: bool,
}

/// Compute the aggregate for a set of sibling nodes.
///
/// Returns `None` for an empty set; a folder without known children keeps
/// whatever state it already has.
pub fn aggregate<'a, I>(children: I) -> Option<Aggregate>
where
    I: IntoIterator<Item = &'a SyncNode>,
{
    let mut worst: Option<Rank> = None;
    let mut first_rank: Option<Rank> = None;
    let mut mixed_state = false;
    let mut any_ignored = false;
    let mut any_included = false;

    for child in children {
        let rank = child.sync_state.rank();
        match first_rank {
            None => first_rank = Some(rank),
            Some(r) if r != rank => mixed_state = true,
            _ => {}
        }
        worst = Some(worst.map_or(rank, |w| w.max(rank)));
        if child.is_ignored {
            any_ignored = true;
        } else {
            any_included = true;
        }
    }

    worst.map(|rank| Aggregate {
        state: rank.as_state(),
        has_mixed_state: mixed_state,
        has_mixed_ignore: any_ignored && any_included,
    })
}

/// Hierarchical map of sync nodes plus the discovery listing
#[derive(Debug, Default, Clone)]
pub struct SyncTreeStore {
    nodes: HashMap<String, SyncNode>,
    children: HashMap<String, BTreeSet<String>>,
    discovery: Vec<DiscoveryFile>,
}

impl SyncTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&SyncNode> {
        self.nodes.get(path.trim_end_matches('/'))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.get(path).map(|n| n.is_dir).unwrap_or(false)
    }

    /// Replace the whole tree with a fresh root listing.
    ///
    /// This is the only operation that drops nodes.
    pub fn replace_root(&mut self, roots: Vec<SyncNode>) {
        self.nodes.clear();
        self.children.clear();
        for node in roots {
            self.insert_node(node);
        }
    }

    /// Merge the listing of `parent` into the tree.
    ///
    /// Existing nodes keep live state delivered by events when the listing
    /// only reports `completed`. Returns the ancestors whose aggregate was
    /// recomputed, nearest first.
    pub fn insert_listing(&mut self, parent: Option<&str>, listing: Vec<SyncNode>) -> Vec<String> {
        for node in listing {
            self.insert_node(node);
        }

        match parent {
            Some(parent) if !parent.is_empty() => {
                let parent = parent.trim_end_matches('/');
                if let Some(node) = self.nodes.get_mut(parent) {
                    node.child_count = Some(
                        self.children
                            .get(parent)
                            .map(|c| c.len() as u32)
                            .unwrap_or(0),
                    );
                }
                let mut updated = Vec::new();
                if self.recompute(parent) {
                    updated.push(parent.to_string());
                }
                updated.extend(self.recompute_ancestors(parent));
                updated
            }
            _ => Vec::new(),
        }
    }

    fn insert_node(&mut self, mut node: SyncNode) {
        node.path = node.path.trim_end_matches('/').to_string();
        if node.path.is_empty() {
            return;
        }
        if let Some(existing) = self.nodes.get(&node.path) {
            if node.sync_state == SyncState::Completed && existing.sync_state != SyncState::Completed
            {
                node.sync_state = existing.sync_state;
                node.progress = existing.progress;
                node.conflicted = existing.conflicted;
            }
            if node.is_dir && self.children.get(&node.path).is_some_and(|c| !c.is_empty()) {
                node.has_mixed_state = existing.has_mixed_state;
                node.has_mixed_ignore = existing.has_mixed_ignore;
            }
        }
        let parent_key = paths::parent(&node.path).unwrap_or(ROOT_KEY).to_string();
        self.children
            .entry(parent_key)
            .or_default()
            .insert(node.path.clone());
        self.nodes.insert(node.path.clone(), node);
    }

    /// Apply an event's state to an existing node.
    ///
    /// Returns false when no node exists for `path`.
    pub fn apply_state(
        &mut self,
        path: &str,
        state: SyncState,
        progress: Option<f64>,
        conflicted: bool,
    ) -> bool {
        match self.nodes.get_mut(path.trim_end_matches('/')) {
            Some(node) => {
                node.sync_state = state;
                node.progress = progress;
                node.conflicted = conflicted || state.is_conflict();
                true
            }
            None => false,
        }
    }

    /// Recompute every existing ancestor folder of `path`, nearest first.
    ///
    /// Returns the ancestors that were recomputed, in order.
    pub fn recompute_ancestors(&mut self, path: &str) -> Vec<String> {
        let mut updated = Vec::new();
        for ancestor in paths::ancestors(path) {
            if self.recompute(&ancestor) {
                updated.push(ancestor);
            }
        }
        updated
    }

    /// Recompute one folder from its direct children.
    fn recompute(&mut self, folder: &str) -> bool {
        if !self.nodes.get(folder).is_some_and(|n| n.is_dir) {
            return false;
        }
        let aggregate = {
            let Some(child_paths) = self.children.get(folder) else {
                return false;
            };
            aggregate(child_paths.iter().filter_map(|p| self.nodes.get(p)))
        };
        let Some(aggregate) = aggregate else {
            return false;
        };
        if let Some(node) = self.nodes.get_mut(folder) {
            node.sync_state = aggregate.state;
            node.has_mixed_state = aggregate.has_mixed_state;
            node.has_mixed_ignore = aggregate.has_mixed_ignore;
            if aggregate.state != SyncState::Syncing {
                node.progress = None;
            }
        }
        true
    }

    /// Set a node's ignore flag, returning the previous value
    pub fn set_ignored(&mut self, path: &str, ignored: bool) -> Option<bool> {
        self.nodes.get_mut(path.trim_end_matches('/')).map(|node| {
            let previous = node.is_ignored;
            node.is_ignored = ignored;
            previous
        })
    }

    /// Top-level (datasite) nodes, sorted by name
    pub fn roots(&self) -> Vec<SyncNode> {
        self.children_of(ROOT_KEY)
    }

    /// Direct children of `path`, directories first then case-insensitive name
    pub fn children_of(&self, path: &str) -> Vec<SyncNode> {
        let mut out: Vec<SyncNode> = self
            .children
            .get(path.trim_end_matches('/'))
            .map(|set| set.iter().filter_map(|p| self.nodes.get(p)).cloned().collect())
            .unwrap_or_default();
        sort_listing(&mut out);
        out
    }

    /// Owned copy of every node, sorted by path
    pub fn snapshot(&self) -> Vec<SyncNode> {
        let mut out: Vec<SyncNode> = self.nodes.values().cloned().collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    /// Any tracked file in a state that keeps transfers active
    pub fn has_active_files(&self) -> bool {
        self.nodes
            .values()
            .any(|n| !n.is_dir && n.sync_state.is_active())
    }

    pub fn set_discovery(&mut self, files: Vec<DiscoveryFile>) {
        self.discovery = files
            .into_iter()
            .map(|mut f| {
                f.path = paths::normalize(&f.path);
                f
            })
            .collect();
    }

    pub fn discovery(&self) -> &[DiscoveryFile] {
        &self.discovery
    }

    /// Drop a subscribed path from the discovery listing.
    ///
    /// Folders also drop everything underneath. Returns how many entries went.
    pub fn remove_discovered(&mut self, path: &str, is_folder: bool) -> usize {
        let path = path.trim_end_matches('/');
        let prefix = format!("{}/", path);
        let before = self.discovery.len();
        self.discovery
            .retain(|f| !(f.path == path || (is_folder && f.path.starts_with(&prefix))));
        before - self.discovery.len()
    }
}

pub(crate) fn sort_listing(nodes: &mut [SyncNode]) {
    nodes.sort_by(|a, b| match (a.is_dir, b.is_dir) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> SyncTreeStore {
        let mut store = SyncTreeStore::new();
        store.replace_root(vec![SyncNode::dir("alice@x.org")]);
        store.insert_listing(Some("alice@x.org"), vec![SyncNode::dir("alice@x.org/public")]);
        store.insert_listing(
            Some("alice@x.org/public"),
            vec![
                SyncNode::dir("alice@x.org/public/sub"),
                SyncNode::file("alice@x.org/public/data.csv"),
            ],
        );
        store.insert_listing(
            Some("alice@x.org/public/sub"),
            vec![
                SyncNode::file("alice@x.org/public/sub/file.csv"),
                SyncNode::file("alice@x.org/public/sub/other.csv"),
            ],
        );
        store
    }

    fn states(states: &[SyncState]) -> Vec<SyncNode> {
        states
            .iter()
            .enumerate()
            .map(|(i, s)| SyncNode::file(format!("d/{}", i)).with_state(*s))
            .collect()
    }

    #[test]
    fn test_aggregate_priority() {
        let agg = aggregate(&states(&[SyncState::Error, SyncState::Pending])).unwrap();
        assert_eq!(agg.state, SyncState::Error);
        assert!(agg.has_mixed_state);

        let agg = aggregate(&states(&[SyncState::Pending, SyncState::Completed])).unwrap();
        assert_eq!(agg.state, SyncState::Pending);

        let agg = aggregate(&states(&[SyncState::Completed, SyncState::Completed])).unwrap();
        assert_eq!(agg.state, SyncState::Completed);
        assert!(!agg.has_mixed_state);

        let agg = aggregate(&states(&[SyncState::Uploading, SyncState::Pending])).unwrap();
        assert_eq!(agg.state, SyncState::Syncing);

        assert!(aggregate(&Vec::<SyncNode>::new()).is_none());
    }

    #[test]
    fn test_mixed_ignore_requires_both() {
        let all_ignored = vec![
            SyncNode::file("d/a").ignored(true),
            SyncNode::file("d/b").ignored(true),
        ];
        assert!(!aggregate(&all_ignored).unwrap().has_mixed_ignore);

        let mixed = vec![
            SyncNode::file("d/a").ignored(true),
            SyncNode::file("d/b").ignored(false),
        ];
        assert!(aggregate(&mixed).unwrap().has_mixed_ignore);

        let none = vec![SyncNode::file("d/a"), SyncNode::file("d/b")];
        assert!(!aggregate(&none).unwrap().has_mixed_ignore);
    }

    #[test]
    fn test_recompute_walks_nearest_first() {
        let mut store = tree();
        assert!(store.apply_state("alice@x.org/public/sub/file.csv", SyncState::Syncing, Some(40.0), false));
        let updated = store.recompute_ancestors("alice@x.org/public/sub/file.csv");
        assert_eq!(
            updated,
            vec!["alice@x.org/public/sub", "alice@x.org/public", "alice@x.org"]
        );
        assert_eq!(store.get("alice@x.org/public/sub").unwrap().sync_state, SyncState::Syncing);
        assert_eq!(store.get("alice@x.org").unwrap().sync_state, SyncState::Syncing);
        assert!(store.get("alice@x.org/public").unwrap().has_mixed_state);
    }

    #[test]
    fn test_listing_keeps_live_state() {
        let mut store = tree();
        store.apply_state("alice@x.org/public/data.csv", SyncState::Uploading, Some(10.0), false);
        store.insert_listing(
            Some("alice@x.org/public"),
            vec![SyncNode::file("alice@x.org/public/data.csv")],
        );
        let node = store.get("alice@x.org/public/data.csv").unwrap();
        assert_eq!(node.sync_state, SyncState::Uploading);
        assert_eq!(store.get("alice@x.org/public").unwrap().sync_state, SyncState::Syncing);
    }

    #[test]
    fn test_unknown_path_is_not_created() {
        let mut store = tree();
        assert!(!store.apply_state("bob@y.org/x.txt", SyncState::Error, None, false));
        assert!(!store.contains("bob@y.org/x.txt"));
    }

    #[test]
    fn test_replace_root_drops_nodes() {
        let mut store = tree();
        store.replace_root(vec![SyncNode::dir("bob@y.org")]);
        assert_eq!(store.len(), 1);
        assert!(store.children_of("alice@x.org").is_empty());
    }

    #[test]
    fn test_remove_discovered_folder() {
        let mut store = SyncTreeStore::new();
        store.set_discovery(vec![
            DiscoveryFile { path: "bob@y.org/public/a.csv".into(), size: Some(1) },
            DiscoveryFile { path: "bob@y.org/public/deep/b.csv".into(), size: None },
            DiscoveryFile { path: "bob@y.org/publicity.txt".into(), size: None },
        ]);
        assert_eq!(store.remove_discovered("bob@y.org/public", true), 2);
        assert_eq!(store.discovery().len(), 1);
        assert_eq!(store.discovery()[0].path, "bob@y.org/publicity.txt");
    }
}
