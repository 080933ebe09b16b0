use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use service::Config;

pub const APP_NAME: &str = "syncscope";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATE_DIR_NAME: &str = "state";
/// Where the daemon keeps its config, relative to the home directory
pub const DEFAULT_DAEMON_CONFIG: &str = ".syftbox/config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// The daemon's JSON config (client_url, client_token, data_dir, email)
    pub daemon_config_path: PathBuf,
    /// Overrides the data dir from the daemon config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Overrides the daemon's email as the local identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(default)]
    pub trusted_datasites: Vec<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn new(daemon_config_path: PathBuf) -> Self {
        Self {
            daemon_config_path,
            data_dir: None,
            identity: None,
            trusted_datasites: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the app directory (~/.syncscope)
    pub app_dir: PathBuf,
    /// Persisted activity and connection logs
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub config: AppConfig,
}

impl AppState {
    /// `~/.syncscope` unless overridden
    pub fn app_dir(custom: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(dir) = custom {
            return Ok(dir);
        }
        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    pub fn default_daemon_config() -> Result<PathBuf, StateError> {
        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(DEFAULT_DAEMON_CONFIG))
    }

    pub fn init(custom: Option<PathBuf>, config: AppConfig) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom)?;
        let config_path = app_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Err(StateError::AlreadyInitialized(app_dir));
        }

        let state_dir = app_dir.join(STATE_DIR_NAME);
        fs::create_dir_all(&state_dir)?;
        fs::write(&config_path, toml::to_string_pretty(&config)?)?;

        Ok(Self {
            app_dir,
            state_dir,
            config_path,
            config,
        })
    }

    pub fn load(custom: Option<PathBuf>) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom)?;
        let config_path = app_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::NotInitialized);
        }

        let state_dir = app_dir.join(STATE_DIR_NAME);
        if !state_dir.exists() {
            fs::create_dir_all(&state_dir)?;
        }
        let config: AppConfig = toml::from_str(&fs::read_to_string(&config_path)?)?;

        Ok(Self {
            app_dir,
            state_dir,
            config_path,
            config,
        })
    }

    pub fn daemon_config_path(&self) -> &Path {
        &self.config.daemon_config_path
    }

    /// Engine config for this app directory
    pub fn service_config(&self) -> Result<Config, StateError> {
        let log_level = self
            .config
            .log_level
            .parse::<tracing::Level>()
            .map_err(|_| StateError::InvalidLogLevel(self.config.log_level.clone()))?;
        Ok(Config {
            data_dir: self.config.data_dir.clone(),
            daemon_config_path: Some(self.config.daemon_config_path.clone()),
            identity: self.config.identity.clone(),
            trusted_datasites: self.config.trusted_datasites.clone(),
            state_dir: Some(self.state_dir.clone()),
            log_level,
            ..Default::default()
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("syncscope directory not initialized. Run 'syncscope init' first")]
    NotInitialized,

    #[error("already initialized at {}", .0.display())]
    AlreadyInitialized(PathBuf),

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("app");

        assert!(matches!(
            AppState::load(Some(dir.clone())),
            Err(StateError::NotInitialized)
        ));

        let mut config = AppConfig::new(temp.path().join("daemon.json"));
        config.trusted_datasites = vec!["bob@y.org".into()];
        let created = AppState::init(Some(dir.clone()), config.clone()).unwrap();
        assert!(created.state_dir.is_dir());

        let loaded = AppState::load(Some(dir.clone())).unwrap();
        assert_eq!(loaded.config, config);
        assert!(matches!(
            AppState::init(Some(dir), config),
            Err(StateError::AlreadyInitialized(_))
        ));

        let service = loaded.service_config().unwrap();
        assert_eq!(service.log_level, tracing::Level::INFO);
        assert_eq!(service.state_dir.as_deref(), Some(loaded.state_dir.as_path()));
        assert_eq!(service.trusted_datasites, vec!["bob@y.org".to_string()]);
    }

    #[test]
    fn test_bad_log_level() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::new(temp.path().join("daemon.json"));
        config.log_level = "loud".into();
        let state = AppState::init(Some(temp.path().join("app")), config).unwrap();
        assert!(matches!(
            state.service_config(),
            Err(StateError::InvalidLogLevel(_))
        ));
    }
}
