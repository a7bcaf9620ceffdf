use crate::shared::logging;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {message}")]
    Read { path: String, message: String },

    #[error("Invalid config file '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Missing required setting '{0}'. Set it in the config file or via environment variable.")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub central_manager: CentralManagerConfig,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CentralManagerConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for CentralManagerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            accept_invalid_certs: false,
        }
    }
}

// Hand-written so the password never reaches a log line
impl std::fmt::Debug for CentralManagerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CentralManagerConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &logging::redact(&self.password))
            .field("timeout_secs", &self.timeout_secs)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Config {
    /// Location of the observed-state file
    pub fn state_path(&self) -> PathBuf {
        self.state.path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".cmsync")
                .join("state.json")
        })
    }

    /// Fail early when connection settings are incomplete
    pub fn require_connection(&self) -> Result<&CentralManagerConfig, ConfigError> {
        let cm = &self.central_manager;
        if cm.host.trim().is_empty() {
            return Err(ConfigError::Missing("central_manager.host"));
        }
        if cm.username.is_empty() {
            return Err(ConfigError::Missing("central_manager.username"));
        }
        if cm.password.is_empty() {
            return Err(ConfigError::Missing("central_manager.password"));
        }
        Ok(cm)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = env::var("CMSYNC_HOST") {
            logging::debug(&format!("Using host from CMSYNC_HOST: {}", host));
            self.central_manager.host = host;
        }
        if let Ok(username) = env::var("CMSYNC_USERNAME") {
            self.central_manager.username = username;
        }
        if let Ok(password) = env::var("CMSYNC_PASSWORD") {
            self.central_manager.password = password;
        }
        if let Ok(val) = env::var("CMSYNC_TIMEOUT") {
            match val.parse::<u64>() {
                Ok(secs) => self.central_manager.timeout_secs = secs,
                Err(_) => logging::warn(&format!("Ignoring invalid CMSYNC_TIMEOUT value: {}", val)),
            }
        }
        if let Ok(path) = env::var("CMSYNC_STATE_FILE") {
            self.state.path = Some(PathBuf::from(path));
        }
    }
}

/// Build configuration from defaults and environment variables only
pub fn init_default() -> Result<Config, ConfigError> {
    let mut config = Config::default();
    config.apply_env_overrides();
    Ok(config)
}

/// Load configuration from a JSON file, then apply environment overrides
pub fn init_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    logging::info(&format!("Loading configuration from {}", display));

    let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: display.clone(),
        message: e.to_string(),
    })?;
    let mut config: Config = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
        path: display,
        message: e.to_string(),
    })?;
    config.apply_env_overrides();
    Ok(config)
}
