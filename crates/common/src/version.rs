use serde::{Deserialize, Serialize};
use std::fmt;

/// Compile-time build metadata, filled from env vars a build script or CI
/// may set. Missing values read as `unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub version: String,
    pub git_hash: String,
    pub profile: String,
    pub features: Vec<String>,
    pub target: String,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self::from_parts(
            env!("CARGO_PKG_VERSION"),
            option_env!("REPO_VERSION"),
            option_env!("BUILD_PROFILE"),
            option_env!("BUILD_FEATURES"),
            option_env!("BUILD_TARGET"),
        )
    }

    fn from_parts(
        version: &str,
        git_hash: Option<&str>,
        profile: Option<&str>,
        features: Option<&str>,
        target: Option<&str>,
    ) -> Self {
        let features = features
            .filter(|f| *f != "none")
            .map(|f| {
                f.split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            version: version.to_string(),
            git_hash: git_hash.unwrap_or("unknown").to_string(),
            profile: profile.unwrap_or("unknown").to_string(),
            features,
            target: target.unwrap_or("unknown").to_string(),
        }
    }

    pub fn short_hash(&self) -> &str {
        self.git_hash.get(..7).unwrap_or(&self.git_hash)
    }

    pub fn is_dirty(&self) -> bool {
        self.git_hash.ends_with("-dirty")
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {}", self.version, self.short_hash(), self.profile)?;
        if !self.features.is_empty() {
            write!(f, ", features: {}", self.features.join(","))?;
        }
        write!(f, ") for {}", self.target)
    }
}

pub fn build_info() -> BuildInfo {
    BuildInfo::current()
}
