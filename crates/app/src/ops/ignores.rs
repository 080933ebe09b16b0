use std::fmt::Write;

use clap::Args;

use common::ignore::IgnorePatterns;
use service::control_plane::{ControlPlane, ControlPlaneError};

#[derive(Args, Debug, Clone)]
pub struct Ignores;

#[derive(Debug, thiserror::Error)]
pub enum IgnoresError {
    #[error(transparent)]
    State(#[from] crate::state::StateError),
    #[error("ignore patterns: {0}")]
    ControlPlane(#[from] ControlPlaneError),
}

#[async_trait::async_trait]
impl crate::op::Op for Ignores {
    type Error = IgnoresError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.load_state()?;
        let patterns = super::control_plane(&state).ignore_patterns().await?;
        Ok(render(&patterns))
    }
}

fn render(patterns: &IgnorePatterns) -> String {
    let mut out = format!("file: {}\ndefault:", patterns.syftignore_path);
    for p in &patterns.default_patterns {
        let _ = write!(out, "\n  {}", p);
    }
    if patterns.custom_patterns.is_empty() {
        out.push_str("\ncustom: none");
    } else {
        out.push_str("\ncustom:");
        for p in &patterns.custom_patterns {
            let _ = write!(out, "\n  {}", p);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_sections() {
        let patterns = IgnorePatterns {
            default_patterns: vec!["*.tmp".into()],
            custom_patterns: vec![],
            syftignore_path: "/d/.syftignore".into(),
        };
        assert_eq!(render(&patterns), "file: /d/.syftignore\ndefault:\n  *.tmp\ncustom: none");
    }
}
