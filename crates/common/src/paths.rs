//! Path helpers for datasite-relative paths.
//!
//! Every path the engine stores is slash-separated and relative to the
//! datasites root, e.g. `alice@x.org/public/data.csv`.

/// Directory under the daemon data dir that holds every datasite
pub const DATASITES_DIR: &str = "datasites";

/// Normalize a path reported by the daemon into a datasite-relative path.
///
/// Backslashes become slashes, anything up to and including a `datasites/`
/// segment is dropped, and leading slashes and duplicate separators are removed.
/// A trailing slash is preserved since it marks a directory.
pub fn normalize(raw: &str) -> String {
    let mut path = raw.trim().replace('\\', "/");

    let marker = format!("{}/", DATASITES_DIR);
    if path.starts_with(&marker) {
        path = path[marker.len()..].to_string();
    } else if let Some(idx) = path.find(&format!("/{}", marker)) {
        path = path[idx + marker.len() + 1..].to_string();
    }

    while path.contains("//") {
        path = path.replace("//", "/");
    }
    path.trim_start_matches('/').to_string()
}

/// Parent of a datasite-relative path, `None` for a root (datasite) entry
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    trimmed.rfind('/').map(|idx| &trimmed[..idx])
}

/// Ancestors of `path`, nearest first.
///
/// `alice@x.org/public/sub/file.csv` yields `alice@x.org/public/sub`,
/// `alice@x.org/public`, `alice@x.org`.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = parent(path);
    while let Some(p) = cursor {
        if p.is_empty() {
            break;
        }
        out.push(p.to_string());
        cursor = parent(p);
    }
    out
}

/// Final segment of a path
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// First segment of a path, which is the owning datasite
pub fn datasite(path: &str) -> &str {
    path.split('/').next().unwrap_or("")
}

/// Whether the raw path itself marks a directory
pub fn has_dir_marker(path: &str) -> bool {
    path.ends_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_datasite_root() {
        assert_eq!(
            normalize("/home/u/SyftBox/datasites/alice@x.org/public/a.csv"),
            "alice@x.org/public/a.csv"
        );
        assert_eq!(
            normalize("datasites/alice@x.org/public/a.csv"),
            "alice@x.org/public/a.csv"
        );
        assert_eq!(normalize("alice@x.org//public/a.csv"), "alice@x.org/public/a.csv");
        assert_eq!(normalize("C:\\SyftBox\\datasites\\bob@y.org\\x"), "bob@y.org/x");
        assert_eq!(normalize("/bob@y.org/dir/"), "bob@y.org/dir/");
    }

    #[test]
    fn test_ancestors_nearest_first() {
        assert_eq!(
            ancestors("alice@x.org/public/sub/file.csv"),
            vec![
                "alice@x.org/public/sub".to_string(),
                "alice@x.org/public".to_string(),
                "alice@x.org".to_string(),
            ]
        );
        assert!(ancestors("alice@x.org").is_empty());
    }

    #[test]
    fn test_names() {
        assert_eq!(file_name("a/b/c.txt"), "c.txt");
        assert_eq!(file_name("a/b/"), "b");
        assert_eq!(datasite("alice@x.org/public"), "alice@x.org");
        assert_eq!(parent("alice@x.org"), None);
    }
}
