use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{DiscoveryFile, SyncNode};
use crate::paths;

/// Identities whose datasites are shown as trusted contacts.
///
/// Lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedDatasites(HashSet<String>);

impl TrustedDatasites {
    pub fn new<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            identities
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.0.contains(&identity.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    MyDatasite,
    Trusted,
    Others,
}

impl SectionKind {
    pub fn title(self) -> &'static str {
        match self {
            SectionKind::MyDatasite => "My Datasite",
            SectionKind::Trusted => "Trusted Contacts",
            SectionKind::Others => "Other Users",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSection {
    pub kind: SectionKind,
    pub collapsed: bool,
    pub roots: Vec<SyncNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableFolder {
    /// Parent path below the owner, empty for files at the datasite root
    pub folder: String,
    pub files: Vec<DiscoveryFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableOwner {
    pub owner: String,
    pub folders: Vec<AvailableFolder>,
}

/// Roots split for display, plus the grouped discovery listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sections {
    pub sections: Vec<TreeSection>,
    pub available: Vec<AvailableOwner>,
}

impl Sections {
    pub fn build(
        roots: Vec<SyncNode>,
        identity: Option<&str>,
        trusted: &TrustedDatasites,
        discovery: &[DiscoveryFile],
    ) -> Self {
        let mut mine = Vec::new();
        let mut trusted_roots = Vec::new();
        let mut others = Vec::new();

        for root in roots {
            let is_mine = identity.is_some_and(|id| root.name.eq_ignore_ascii_case(id));
            if is_mine {
                mine.push(root);
            } else if trusted.contains(&root.name) {
                trusted_roots.push(root);
            } else {
                others.push(root);
            }
        }

        let sections = vec![
            TreeSection {
                kind: SectionKind::MyDatasite,
                collapsed: false,
                roots: mine,
            },
            TreeSection {
                kind: SectionKind::Trusted,
                collapsed: false,
                roots: trusted_roots,
            },
            TreeSection {
                kind: SectionKind::Others,
                collapsed: true,
                roots: others,
            },
        ];

        Self {
            sections,
            available: group_discovery(discovery),
        }
    }

    pub fn section(&self, kind: SectionKind) -> Option<&TreeSection> {
        self.sections.iter().find(|s| s.kind == kind)
    }
}

/// Group discovery files by owner, then by folder
pub fn group_discovery(files: &[DiscoveryFile]) -> Vec<AvailableOwner> {
    let mut grouped: BTreeMap<String, BTreeMap<String, Vec<DiscoveryFile>>> = BTreeMap::new();
    for file in files {
        let path = paths::normalize(&file.path);
        let owner = paths::datasite(&path).to_string();
        if owner.is_empty() {
            continue;
        }
        let folder = paths::parent(&path)
            .and_then(|p| p.strip_prefix(&owner))
            .map(|p| p.trim_start_matches('/').to_string())
            .unwrap_or_default();
        grouped
            .entry(owner)
            .or_default()
            .entry(folder)
            .or_default()
            .push(DiscoveryFile {
                path,
                size: file.size,
            });
    }

    grouped
        .into_iter()
        .map(|(owner, folders)| AvailableOwner {
            owner,
            folders: folders
                .into_iter()
                .map(|(folder, files)| AvailableFolder { folder, files })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_split() {
        let roots = vec![
            SyncNode::dir("Alice@X.org"),
            SyncNode::dir("bob@y.org"),
            SyncNode::dir("carol@z.org"),
        ];
        let trusted = TrustedDatasites::new(["BOB@y.org"]);
        let sections = Sections::build(roots, Some("alice@x.org"), &trusted, &[]);

        let mine = sections.section(SectionKind::MyDatasite).unwrap();
        assert_eq!(mine.roots.len(), 1);
        assert_eq!(mine.roots[0].name, "Alice@X.org");

        let trusted = sections.section(SectionKind::Trusted).unwrap();
        assert_eq!(trusted.roots[0].name, "bob@y.org");

        let others = sections.section(SectionKind::Others).unwrap();
        assert!(others.collapsed);
        assert_eq!(others.roots[0].name, "carol@z.org");
    }

    #[test]
    fn test_group_discovery() {
        let files = vec![
            DiscoveryFile { path: "bob@y.org/public/a.csv".into(), size: None },
            DiscoveryFile { path: "bob@y.org/public/b.csv".into(), size: None },
            DiscoveryFile { path: "bob@y.org/readme.md".into(), size: Some(3) },
            DiscoveryFile { path: "/datasites/ann@q.org/x/y/z.txt".into(), size: None },
        ];
        let grouped = group_discovery(&files);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].owner, "ann@q.org");
        assert_eq!(grouped[0].folders[0].folder, "x/y");

        let bob = &grouped[1];
        assert_eq!(bob.folders.len(), 2);
        assert_eq!(bob.folders[0].folder, "");
        assert_eq!(bob.folders[1].folder, "public");
        assert_eq!(bob.folders[1].files.len(), 2);
    }
}
