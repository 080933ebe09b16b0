//! Read-side view of the daemon's data directory.
//!
//! Everything here is blocking filesystem work; the daemon control plane
//! runs it on the blocking pool.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use common::ignore::{self, IgnorePatterns, IgnoreRules};
use common::paths::DATASITES_DIR;
use common::tree::{NodeDetails, PubInfo, PubPermission, SharedWithMeItem, SyncNode, SyncState};

use super::ControlPlaneError;

const IGNORE_FILE_NAME: &str = ".syftignore";
const PUB_FILE_NAME: &str = "syft.pub.yaml";
const MAX_PREVIEW_SIZE: u64 = 50 * 1024;

#[derive(Deserialize, Debug)]
struct PubFile {
    #[serde(default)]
    permissions: Vec<PubEntry>,
    #[serde(default)]
    metadata: Option<PubMetadata>,
}

#[derive(Deserialize, Debug)]
struct PubEntry {
    user: String,
    access: String,
}

#[derive(Deserialize, Debug)]
struct PubMetadata {
    description: Option<String>,
}

impl From<PubEntry> for PubPermission {
    fn from(entry: PubEntry) -> Self {
        PubPermission {
            is_wildcard: entry.user == "*",
            user: entry.user,
            access: entry.access,
        }
    }
}

/// Parse a `syft.pub.yaml`, which is either a bare list of permissions or
/// a map with `permissions` and `metadata.description`.
pub fn parse_pub_yaml(content: &str) -> Option<PubInfo> {
    if let Ok(entries) = serde_yaml::from_str::<Vec<PubEntry>>(content) {
        return Some(PubInfo {
            permissions: entries.into_iter().map(Into::into).collect(),
            description: None,
        });
    }
    serde_yaml::from_str::<PubFile>(content).ok().map(|parsed| PubInfo {
        permissions: parsed.permissions.into_iter().map(Into::into).collect(),
        description: parsed.metadata.and_then(|m| m.description),
    })
}

#[derive(Debug, Clone)]
pub struct LocalTree {
    data_dir: PathBuf,
}

impl LocalTree {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn datasites_path(&self) -> PathBuf {
        self.data_dir.join(DATASITES_DIR)
    }

    pub fn ignore_path(&self) -> PathBuf {
        self.data_dir.join(IGNORE_FILE_NAME)
    }

    /// Resolve a datasite-relative path, refusing anything that escapes the root
    fn resolve(&self, rel: &str) -> Result<PathBuf, ControlPlaneError> {
        let rel = rel.trim_matches('/');
        let escapes = Path::new(rel)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(ControlPlaneError::NotFound(rel.to_string()));
        }
        Ok(self.datasites_path().join(rel))
    }

    pub fn read_rules(&self) -> io::Result<IgnoreRules> {
        match fs::read_to_string(self.ignore_path()) {
            Ok(contents) => Ok(IgnoreRules::parse(&contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(IgnoreRules::default()),
            Err(e) => Err(e),
        }
    }

    fn write_rules(&self, rules: &IgnoreRules) -> io::Result<()> {
        fs::write(self.ignore_path(), rules.to_contents())
    }

    fn update_rules(&self, f: impl FnOnce(&mut IgnoreRules) -> bool) -> Result<bool, ControlPlaneError> {
        let mut rules = self.read_rules()?;
        let changed = f(&mut rules);
        if changed {
            self.write_rules(&rules)?;
        }
        Ok(changed)
    }

    pub fn add_ignore(&self, pattern: &str) -> Result<bool, ControlPlaneError> {
        self.update_rules(|rules| rules.add(pattern))
    }

    pub fn remove_ignore(&self, pattern: &str) -> Result<bool, ControlPlaneError> {
        self.update_rules(|rules| rules.remove(pattern))
    }

    pub fn subscribe(&self, path: &str) -> Result<bool, ControlPlaneError> {
        self.update_rules(|rules| rules.subscribe(path))
    }

    pub fn unsubscribe(&self, path: &str) -> Result<bool, ControlPlaneError> {
        self.update_rules(|rules| rules.unsubscribe(path))
    }

    pub fn ignore_patterns(&self) -> Result<IgnorePatterns, ControlPlaneError> {
        let rules = self.read_rules()?;
        Ok(IgnorePatterns::from_rules(
            &rules,
            self.ignore_path().to_string_lossy(),
        ))
    }

    /// Write the default policy when the ignore file is missing or only
    /// holds comments. Returns whether it wrote anything.
    pub fn init_default_policy(&self) -> Result<bool, ControlPlaneError> {
        if !self.read_rules()?.is_empty() {
            return Ok(false);
        }
        self.write_rules(&IgnoreRules::default_policy())?;
        Ok(true)
    }

    pub fn list_dir(&self, path: Option<&str>) -> Result<Vec<SyncNode>, ControlPlaneError> {
        let prefix = path.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty());
        let target = match prefix {
            Some(p) => self.resolve(p)?,
            None => self.datasites_path(),
        };
        if !target.exists() {
            return Ok(Vec::new());
        }

        let rules = self.read_rules()?;
        let mut nodes = Vec::new();
        for entry in fs::read_dir(&target)?.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let entry_path = entry.path();
            let is_dir = entry_path.is_dir();
            let rel = match prefix {
                Some(p) => format!("{}/{}", p, name),
                None => name.clone(),
            };

            let mut node = if is_dir {
                SyncNode::dir(rel.clone())
            } else {
                SyncNode::file(rel.clone())
            };
            node.is_essential = ignore::is_essential(&rel);
            node.is_subscribed = rules.is_whitelisted(&rel);
            node.is_ignored = rules.is_ignored(&rel);
            node.child_count = if is_dir { count_children(&entry_path) } else { None };
            node.size = if is_dir { None } else { file_size(&entry_path) };
            node.last_modified = modified_time(&entry_path);
            nodes.push(node);
        }

        nodes.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });
        Ok(nodes)
    }

    pub fn details(&self, path: &str) -> Result<NodeDetails, ControlPlaneError> {
        let rel = path.trim_matches('/');
        let full = self.resolve(rel)?;
        if !full.exists() {
            return Err(ControlPlaneError::NotFound(rel.to_string()));
        }

        let rules = self.read_rules()?;
        let is_dir = full.is_dir();
        let name = common::paths::file_name(rel).to_string();
        let size = if is_dir {
            dir_size(&full)
        } else {
            file_size(&full).unwrap_or(0)
        };
        let is_subscribed = rules.is_whitelisted(rel);
        let essential_pattern = ignore::essential_pattern(rel).map(str::to_string);
        let (file_type, file_content, pub_info) = if is_dir {
            (None, None, None)
        } else {
            preview(&full, &name, size)
        };

        Ok(NodeDetails {
            path: rel.to_string(),
            name,
            is_dir,
            size,
            file_count: if is_dir { Some(count_files(&full)) } else { None },
            sync_state: SyncState::Completed,
            progress: None,
            error: None,
            last_modified: modified_time(&full),
            is_ignored: rules.is_ignored(rel),
            ignore_pattern: if is_subscribed {
                None
            } else {
                rules.matching_pattern(rel).map(str::to_string)
            },
            is_essential: essential_pattern.is_some(),
            essential_pattern,
            is_priority: rel.contains(".request") || rel.contains(".response"),
            file_type,
            file_content,
            pub_info,
        })
    }

    /// Scan every other datasite for `syft.pub.yaml` files granting
    /// `identity` (or everyone) access.
    pub fn shared_with_me(&self, identity: &str) -> Result<Vec<SharedWithMeItem>, ControlPlaneError> {
        let rules = self.read_rules()?;
        let mut items = Vec::new();
        let root = self.datasites_path();
        let Ok(datasites) = fs::read_dir(&root) else {
            return Ok(items);
        };
        for datasite in datasites.flatten() {
            let owner = datasite.file_name().to_string_lossy().to_string();
            if owner.starts_with('.') || owner.eq_ignore_ascii_case(identity) {
                continue;
            }
            if datasite.path().is_dir() {
                scan_shared(&datasite.path(), &owner, &owner, identity, &rules, &mut items);
            }
        }
        items.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(items)
    }
}

fn scan_shared(
    dir: &Path,
    owner: &str,
    rel: &str,
    identity: &str,
    rules: &IgnoreRules,
    items: &mut Vec<SharedWithMeItem>,
) {
    if let Ok(content) = fs::read_to_string(dir.join(PUB_FILE_NAME)) {
        if let Some(info) = parse_pub_yaml(&content) {
            let grant = info.permissions.iter().find(|p| {
                (p.is_wildcard || p.user.eq_ignore_ascii_case(identity)) && p.access != "none"
            });
            if let Some(grant) = grant {
                items.push(SharedWithMeItem {
                    owner: owner.to_string(),
                    path: rel.to_string(),
                    description: info.description.clone(),
                    access: grant.access.clone(),
                    is_subscribed: rules.is_whitelisted(rel),
                });
            }
        }
    }

    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if !name.starts_with('.') && path.is_dir() {
            scan_shared(&path, owner, &format!("{}/{}", rel, name), identity, rules, items);
        }
    }
}

fn preview(path: &Path, name: &str, size: u64) -> (Option<String>, Option<String>, Option<PubInfo>) {
    let ext = name.rsplit('.').next().unwrap_or("").to_lowercase();
    let file_type = match ext.as_str() {
        "json" => Some("json"),
        "yaml" | "yml" => Some("yaml"),
        "md" => Some("markdown"),
        "txt" => Some("text"),
        _ => None,
    }
    .map(str::to_string);

    if size > MAX_PREVIEW_SIZE || file_type.is_none() {
        return (file_type, None, None);
    }
    let content = fs::read_to_string(path).ok();
    let pub_info = if name == PUB_FILE_NAME {
        content.as_deref().and_then(parse_pub_yaml)
    } else {
        None
    };
    (file_type, content, pub_info)
}

fn modified_time(path: &Path) -> Option<String> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
}

fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}

fn count_children(path: &Path) -> Option<u32> {
    fs::read_dir(path).ok().map(|d| d.count() as u32)
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let p = entry.path();
            if p.is_dir() {
                dir_size(&p)
            } else {
                file_size(&p).unwrap_or(0)
            }
        })
        .sum()
}

fn count_files(path: &Path) -> u32 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let p = entry.path();
            if p.is_dir() {
                count_files(&p)
            } else {
                1
            }
        })
        .sum()
}
