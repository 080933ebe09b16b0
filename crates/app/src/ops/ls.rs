use std::collections::BTreeSet;

use clap::Args;

use common::event::{FileEvent, SyncEvent};
use common::tree::{Rank, Sections, SyncNode, TrustedDatasites};
use service::control_plane::{ControlPlane, ControlPlaneError, DaemonConfigFile};

#[derive(Args, Debug, Clone)]
pub struct Ls {
    /// Datasite-relative directory, the datasite roots when omitted
    pub path: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LsError {
    #[error(transparent)]
    State(#[from] crate::state::StateError),
    #[error("ls failed: {0}")]
    ControlPlane(#[from] ControlPlaneError),
}

#[async_trait::async_trait]
impl crate::op::Op for Ls {
    type Error = LsError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.load_state()?;
        let cp = super::control_plane(&state);

        let path = self
            .path
            .as_deref()
            .map(common::paths::normalize)
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty());
        let mut nodes = cp.list_dir(path.as_deref()).await?;

        // live state is best effort; a stopped daemon still has a tree
        if let Ok(queue) = cp.queue_status().await {
            let files: Vec<FileEvent> = queue
                .to_events()
                .into_iter()
                .filter_map(|e| match e {
                    SyncEvent::File(file) => Some(file),
                    _ => None,
                })
                .collect();
            overlay(&mut nodes, &files);
        }

        if nodes.is_empty() {
            return Ok("No items found".to_string());
        }
        if path.is_some() {
            return Ok(nodes.iter().map(line).collect::<Vec<_>>().join("\n"));
        }

        let identity = match &state.config.identity {
            Some(identity) => Some(identity.clone()),
            None => DaemonConfigFile::load(state.daemon_config_path())
                .await
                .ok()
                .and_then(|c| c.email),
        };
        let trusted = TrustedDatasites::new(&state.config.trusted_datasites);
        Ok(sectioned(nodes, identity.as_deref(), &trusted))
    }
}

/// Datasite roots under their section headings, empty sections skipped
fn sectioned(roots: Vec<SyncNode>, identity: Option<&str>, trusted: &TrustedDatasites) -> String {
    let sections = Sections::build(roots, identity, trusted, &[]);
    sections
        .sections
        .iter()
        .filter(|section| !section.roots.is_empty())
        .map(|section| {
            let mut block = format!("{}:", section.kind.title());
            for node in &section.roots {
                block.push('\n');
                block.push_str(&line(node));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Put queue state on listed files, and the worst descendant state on
/// listed folders
fn overlay(nodes: &mut [SyncNode], files: &[FileEvent]) {
    for node in nodes.iter_mut() {
        if !node.is_dir {
            if let Some(file) = files.iter().find(|f| f.path == node.path) {
                node.sync_state = file.state;
                node.progress = file.progress;
                node.conflicted = file.conflicted;
            }
            continue;
        }

        let prefix = format!("{}/", node.path);
        let ranks: BTreeSet<Rank> = files
            .iter()
            .filter(|f| f.path.starts_with(&prefix))
            .map(|f| f.state.rank())
            .collect();
        if let Some(worst) = ranks.last() {
            node.sync_state = worst.as_state();
            node.has_mixed_state = ranks.len() > 1;
        }
    }
}

fn line(node: &SyncNode) -> String {
    let marker = if node.has_mixed_state { '~' } else { ' ' };
    let mut out = format!("{} {:<11} {}", marker, node.sync_state, node.name);
    if node.is_dir {
        out.push('/');
        if let Some(count) = node.child_count {
            out.push_str(&format!(" ({})", count));
        }
    }
    if let Some(progress) = node.progress.filter(|_| node.sync_state.is_active()) {
        out.push_str(&format!(" {:.0}%", progress));
    }
    if node.conflicted {
        out.push_str(" [conflict]");
    }
    if node.is_ignored {
        out.push_str(" [ignored]");
    } else if node.has_mixed_ignore {
        out.push_str(" [partly ignored]");
    }
    if node.is_essential {
        out.push_str(" [essential]");
    }
    if node.is_subscribed {
        out.push_str(" [subscribed]");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::tree::SyncState;

    #[test]
    fn test_overlay_marks_worst_descendant() {
        let mut nodes = vec![
            SyncNode::dir("alice@x.org/public"),
            SyncNode::file("alice@x.org/notes.md"),
            SyncNode::dir("alice@x.org/private"),
        ];
        let files = vec![
            FileEvent::new("alice@x.org/public/a.csv", SyncState::Syncing),
            FileEvent::new("alice@x.org/public/sub/b.csv", SyncState::Error),
            FileEvent::new("alice@x.org/notes.md", SyncState::Pending),
        ];
        overlay(&mut nodes, &files);

        assert_eq!(nodes[0].sync_state, SyncState::Error);
        assert!(nodes[0].has_mixed_state);
        assert_eq!(nodes[1].sync_state, SyncState::Pending);
        assert_eq!(nodes[2].sync_state, SyncState::Completed);
        assert!(!nodes[2].has_mixed_state);
    }

    #[test]
    fn test_sectioned_roots() {
        let roots = vec![
            SyncNode::dir("carol@z.org"),
            SyncNode::dir("alice@x.org"),
        ];
        let out = sectioned(roots, Some("alice@x.org"), &TrustedDatasites::default());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "My Datasite:");
        assert!(lines[1].ends_with("alice@x.org/"));
        assert_eq!(lines[2], "Other Users:");
        assert!(lines[3].ends_with("carol@z.org/"));
        assert!(!out.contains("Trusted Contacts"));
    }

    #[test]
    fn test_line_flags() {
        let mut node = SyncNode::dir("alice@x.org/public").ignored(true);
        node.child_count = Some(3);
        assert_eq!(line(&node), "  completed   public/ (3) [ignored]");

        let node = SyncNode::file("alice@x.org/syft.pub.yaml").essential(true);
        assert!(line(&node).ends_with("syft.pub.yaml [essential]"));
    }
}
