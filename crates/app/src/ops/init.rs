use std::path::PathBuf;

use clap::Args;

use crate::state::{AppConfig, AppState};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Daemon config file (default: ~/.syftbox/config.json)
    #[arg(long)]
    pub daemon_config: Option<PathBuf>,

    /// Daemon data directory, if it differs from the daemon config
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Local datasite identity, if it differs from the daemon's email
    #[arg(long)]
    pub identity: Option<String>,

    /// Datasites listed under "Trusted" (repeatable)
    #[arg(long = "trust")]
    pub trusted: Vec<String>,

    /// Write the default ignore policy when the data dir has none
    #[arg(long)]
    pub default_policy: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] crate::state::StateError),

    #[error("ignore policy: {0}")]
    Policy(#[from] service::control_plane::ControlPlaneError),
}

#[async_trait::async_trait]
impl crate::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let daemon_config = match &self.daemon_config {
            Some(path) => path.clone(),
            None => AppState::default_daemon_config()?,
        };
        let config = AppConfig {
            data_dir: self.data_dir.clone(),
            identity: self.identity.clone(),
            trusted_datasites: self.trusted.clone(),
            ..AppConfig::new(daemon_config)
        };

        let state = AppState::init(ctx.app_dir.clone(), config)?;

        let mut out = format!(
            "Initialized syncscope directory at: {}\n\
             - Config: {}\n\
             - Logs: {}\n\
             - Daemon config: {}",
            state.app_dir.display(),
            state.config_path.display(),
            state.state_dir.display(),
            state.config.daemon_config_path.display(),
        );
        if self.default_policy && super::control_plane(&state).init_default_policy().await? {
            out.push_str("\n- Wrote default ignore policy");
        }
        Ok(out)
    }
}
