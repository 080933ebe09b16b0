//! `.syftignore` rules and the essential path list.
//!
//! The ignore file is one pattern per line. `#` starts a comment and a
//! leading `!` whitelists whatever the rest of the line matches. Whitelist
//! lines are also how subscriptions to shared content are recorded.

use serde::{Deserialize, Serialize};

/// Paths that always sync and can never be ignored
pub const ESSENTIAL_PATTERNS: &[&str] = &[
    "*/public/crypto/did.json",
    "*/public/crypto/*.yaml",
    "*/public/biovault/datasets.yaml",
    "*/public/biovault/datasets/*/dataset.yaml",
    "*/public/biovault/datasets/*.json",
    "*/app_data/biovault/*.yaml",
    "**/syft.pub.yaml",
];

/// Patterns every install ignores; anything else in the file is custom
pub const DEFAULT_PATTERNS: &[&str] = &[
    "*.tmp",
    "*.log",
    ".DS_Store",
    "Thumbs.db",
    ".git/",
    "__pycache__/",
    "node_modules/",
];

/// The ignore file split into built-in and user-added patterns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnorePatterns {
    pub default_patterns: Vec<String>,
    pub custom_patterns: Vec<String>,
    pub syftignore_path: String,
}

impl IgnorePatterns {
    pub fn from_rules(rules: &IgnoreRules, syftignore_path: impl Into<String>) -> Self {
        Self {
            default_patterns: DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect(),
            custom_patterns: rules.custom_patterns().into_iter().map(str::to_string).collect(),
            syftignore_path: syftignore_path.into(),
        }
    }
}

/// Match `path` against the glob dialect used in `.syftignore`.
///
/// Supported forms: `*`, `**/x`, `x/**`, `a**b`, `*/x` (any one leading
/// segment), `a*b`, and otherwise an exact or directory-prefix match.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix("**/") {
        if path.ends_with(suffix) || path.contains(&format!("/{}", suffix)) {
            return true;
        }
        return glob_match(suffix, path);
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return path.starts_with(prefix) || path == prefix;
    }
    if let Some((head, tail)) = pattern.split_once("**") {
        if !tail.contains("**") {
            return path.starts_with(head) && path.ends_with(tail);
        }
    }
    if let Some(suffix) = pattern.strip_prefix("*/") {
        return match path.split_once('/') {
            Some((_, rest)) => glob_match(suffix, rest),
            None => false,
        };
    }
    if let Some((head, tail)) = pattern.split_once('*') {
        if !tail.contains('*') {
            return path.starts_with(head) && path.ends_with(tail);
        }
    }
    let pattern = pattern.trim_end_matches('/');
    path == pattern || path.starts_with(&format!("{}/", pattern))
}

/// First essential pattern matching `path`
pub fn essential_pattern(path: &str) -> Option<&'static str> {
    ESSENTIAL_PATTERNS
        .iter()
        .copied()
        .find(|p| glob_match(p, path))
}

pub fn is_essential(path: &str) -> bool {
    essential_pattern(path).is_some()
}

/// Whitelist line recording a subscription to `path` and everything under it
pub fn subscription_line(path: &str) -> String {
    format!("!{}/**", path.trim_end_matches('/'))
}

/// Parsed contents of a `.syftignore` file, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreRules {
    lines: Vec<String>,
}

impl IgnoreRules {
    /// Parse file contents, dropping blank lines
    pub fn parse(contents: &str) -> Self {
        Self {
            lines: contents
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Policy for a fresh install: ignore everything except essential paths
    /// and request/response traffic.
    pub fn default_policy() -> Self {
        let mut lines = vec![
            "# Ignore everything by default, whitelist essential paths".to_string(),
            "*".to_string(),
        ];
        lines.extend(
            ESSENTIAL_PATTERNS
                .iter()
                .filter(|p| !p.ends_with("*.json") && !p.ends_with("crypto/*.yaml"))
                .map(|p| format!("!{}", p)),
        );
        lines.push("!**/*.request".to_string());
        lines.push("!**/*.response".to_string());
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.trim_start().starts_with('#'))
    }

    /// Lines that are not part of [`DEFAULT_PATTERNS`] or comments
    pub fn custom_patterns(&self) -> Vec<&str> {
        self.lines
            .iter()
            .map(String::as_str)
            .filter(|l| !DEFAULT_PATTERNS.contains(l) && !l.trim_start().starts_with('#'))
            .collect()
    }

    /// The first ignore pattern matching `path`, ignoring whitelist lines
    pub fn matching_pattern(&self, path: &str) -> Option<&str> {
        self.lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.starts_with('!') && !l.starts_with('#'))
            .find(|l| glob_match(l, path))
    }

    pub fn is_whitelisted(&self, path: &str) -> bool {
        self.lines
            .iter()
            .filter_map(|l| l.trim().strip_prefix('!'))
            .any(|p| glob_match(p, path))
    }

    /// Effective ignore flag: essential and whitelisted paths are never ignored
    pub fn is_ignored(&self, path: &str) -> bool {
        if is_essential(path) || self.is_whitelisted(path) {
            return false;
        }
        self.matching_pattern(path).is_some()
    }

    /// Append `pattern` unless already present. Returns whether it changed.
    pub fn add(&mut self, pattern: &str) -> bool {
        if self.lines.iter().any(|l| l == pattern) {
            return false;
        }
        self.lines.push(pattern.to_string());
        true
    }

    /// Remove every line equal to `pattern`. Returns whether it changed.
    pub fn remove(&mut self, pattern: &str) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| l != pattern);
        before != self.lines.len()
    }

    pub fn subscribe(&mut self, path: &str) -> bool {
        self.add(&subscription_line(path))
    }

    /// Drop both the recursive and exact whitelist lines for `path`
    pub fn unsubscribe(&mut self, path: &str) -> bool {
        let recursive = self.remove(&subscription_line(path));
        let exact = self.remove(&format!("!{}", path.trim_end_matches('/')));
        recursive || exact
    }

    pub fn to_contents(&self) -> String {
        self.lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_forms() {
        assert!(glob_match("*", "anything/at/all"));
        assert!(glob_match("**/syft.pub.yaml", "alice@x.org/public/syft.pub.yaml"));
        assert!(glob_match("**/syft.pub.yaml", "syft.pub.yaml"));
        assert!(glob_match("alice@x.org/private/**", "alice@x.org/private/a/b"));
        assert!(glob_match("*/public/crypto/did.json", "bob@y.org/public/crypto/did.json"));
        assert!(!glob_match("*/public/crypto/did.json", "public/crypto/did.json"));
        assert!(glob_match("*.log", "bob@y.org/run.log"));
        assert!(glob_match("node_modules/", "node_modules/x/y.js"));
        assert!(glob_match("alice@x.org/tmp", "alice@x.org/tmp/a.txt"));
        assert!(!glob_match("alice@x.org/tmp", "alice@x.org/tmpfile"));
    }

    #[test]
    fn test_whitelist_and_essential_win() {
        let rules = IgnoreRules::parse("*\n# comment\n!bob@y.org/shared/**\n");
        assert!(rules.is_ignored("bob@y.org/private/a.csv"));
        assert!(!rules.is_ignored("bob@y.org/shared/a.csv"));
        assert!(!rules.is_ignored("bob@y.org/public/syft.pub.yaml"));
        assert_eq!(rules.matching_pattern("bob@y.org/x"), Some("*"));
    }

    #[test]
    fn test_subscribe_round_trip() {
        let mut rules = IgnoreRules::parse("*");
        assert!(rules.subscribe("bob@y.org/shared"));
        assert!(!rules.subscribe("bob@y.org/shared"));
        assert!(rules.is_whitelisted("bob@y.org/shared/a.csv"));
        assert!(rules.unsubscribe("bob@y.org/shared"));
        assert!(!rules.is_whitelisted("bob@y.org/shared/a.csv"));
        assert_eq!(rules.to_contents(), "*");
    }

    #[test]
    fn test_default_policy() {
        let rules = IgnoreRules::default_policy();
        assert!(rules.is_ignored("bob@y.org/data/big.bin"));
        assert!(!rules.is_ignored("bob@y.org/rpc/x.request"));
        assert!(!rules.is_empty());
        assert!(IgnoreRules::parse("# only a comment").is_empty());
    }

    #[test]
    fn test_custom_patterns_skip_defaults() {
        let rules = IgnoreRules::parse("*.tmp\n# note\nalice@x.org/big\n");
        assert_eq!(rules.custom_patterns(), vec!["alice@x.org/big"]);

        let listed = IgnorePatterns::from_rules(&rules, "/data/.syftignore");
        assert_eq!(listed.default_patterns.len(), DEFAULT_PATTERNS.len());
        assert_eq!(listed.custom_patterns, vec!["alice@x.org/big".to_string()]);
        assert_eq!(listed.syftignore_path, "/data/.syftignore");
    }
}
