//! Configuration for the skill manager daemon.
//!
//! Uses a `key=value` file format with `#` comments.
//! Precedence: CLI flags > `--config` file > environment > defaults.

use crate::protocol::{COMMUNICATION_SERVICE_KEY, SKILL_SERVICE_KEY, STORE_SERVICE_KEY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default port for the bus listener.
pub const DEFAULT_PORT: u16 = 7810;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
}

/// Where install history is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallLogMode {
    /// Local SQLite database at `db_path`.
    #[default]
    Sqlite,
    /// `record` requests to `store_service_key` over the bus.
    Bus,
}

/// Daemon configuration. All paths are resolved once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Directories
    /// User-writable skill storage root; installs land here.
    pub skills_dir: PathBuf,
    /// Skills bundled with the distribution.
    pub core_skills_dir: PathBuf,
    /// Per-skill log files are written here as `<name>.log`.
    pub logs_dir: PathBuf,
    /// SQLite database for install history.
    pub db_path: PathBuf,

    // Bus
    pub port: u16,
    pub service_key: String,
    pub relay_service_key: String,
    pub store_service_key: String,
    /// Service key -> base URL of the peer answering for it.
    pub peers: BTreeMap<String, String>,
    /// Send the message-handler registration to the relay at startup.
    pub announce: bool,

    // Processes and packages
    /// Program and arguments used to launch a skill from its directory.
    pub entry_command: Vec<String>,
    /// Base URL for `owner/repo` package identifiers.
    pub git_host: String,
    pub install_log: InstallLogMode,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .map_or_else(|| PathBuf::from("~/.local/share/skilld"), |d| d.join("skilld"));
        Self {
            skills_dir: PathBuf::from("skills"),
            core_skills_dir: PathBuf::from("core-skills"),
            logs_dir: PathBuf::from("logs"),
            db_path: data_dir.join("skilld.db"),
            port: DEFAULT_PORT,
            service_key: SKILL_SERVICE_KEY.to_string(),
            relay_service_key: COMMUNICATION_SERVICE_KEY.to_string(),
            store_service_key: STORE_SERVICE_KEY.to_string(),
            peers: BTreeMap::new(),
            announce: true,
            entry_command: vec!["node".to_string(), "index.js".to_string()],
            git_host: "https://github.com".to_string(),
            install_log: InstallLogMode::Sqlite,
        }
    }
}

impl Config {
    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Apply `SKILL_FOLDER`, `SKILL_CORE_FOLDER` and `SKILL_LOG_FOLDER`
    /// from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides using the given lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(dir) = non_empty("SKILL_FOLDER") {
            self.skills_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty("SKILL_CORE_FOLDER") {
            self.core_skills_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty("SKILL_LOG_FOLDER") {
            self.logs_dir = PathBuf::from(dir);
        }
    }

    /// Parse config content (key=value format).
    pub fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            // Skip empty lines and comments
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    /// Apply a single config value.
    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if let Some(service) = key.strip_prefix("peer.") {
            if service.is_empty() {
                return Err(ConfigError::InvalidLine(format!("{key}={value}")));
            }
            self.peers
                .insert(service.to_string(), value.trim_end_matches('/').to_string());
            return Ok(());
        }

        match key {
            "skills_dir" => self.skills_dir = PathBuf::from(value),
            "core_skills_dir" => self.core_skills_dir = PathBuf::from(value),
            "logs_dir" => self.logs_dir = PathBuf::from(value),
            "db_path" => self.db_path = PathBuf::from(value),
            "port" => {
                self.port = value.parse().map_err(|_| ConfigError::InvalidInt {
                    key: key.to_string(),
                    value: value.to_string(),
                })?;
            }
            "service_key" => self.service_key = value.to_string(),
            "relay_service_key" => self.relay_service_key = value.to_string(),
            "store_service_key" => self.store_service_key = value.to_string(),
            "announce" => self.announce = Self::parse_bool(key, value)?,
            "entry_command" => {
                let parts: Vec<String> = value.split_whitespace().map(str::to_string).collect();
                if parts.is_empty() {
                    return Err(ConfigError::InvalidLine(
                        "entry_command must not be empty".to_string(),
                    ));
                }
                self.entry_command = parts;
            }
            "git_host" => self.git_host = value.trim_end_matches('/').to_string(),
            "install_log" => {
                self.install_log = match value {
                    "sqlite" => InstallLogMode::Sqlite,
                    "bus" => InstallLogMode::Bus,
                    _ => {
                        return Err(ConfigError::InvalidLine(format!(
                            "install_log must be 'sqlite' or 'bus', got '{value}'"
                        )))
                    }
                }
            }
            _ => {
                // Unknown keys are tolerated so newer config files keep working.
                eprintln!("Warning: unknown config key: {key}");
            }
        }
        Ok(())
    }

    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }
}
