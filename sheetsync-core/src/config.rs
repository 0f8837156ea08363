//! Configuration loading and management
//!
//! Configuration is assembled once at startup from three layers, later layers
//! winning:
//!
//! 1. Built-in defaults
//! 2. `~/.config/sheetsync/config.toml` (optional)
//! 3. Environment variables (`SMARTSHEET_API_TOKEN`, `WORKSPACE_ID`, ...)
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/sheetsync/` (~/.config/sheetsync/)
//! - Data: `$XDG_DATA_HOME/sheetsync/` (~/.local/share/sheetsync/)
//! - State/Logs: `$XDG_STATE_HOME/sheetsync/` (~/.local/state/sheetsync/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default Smartsheet REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.smartsheet.com/2.0";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Smartsheet API access
    #[serde(default)]
    pub smartsheet: SmartsheetConfig,

    /// TLS and proxy policy
    #[serde(default)]
    pub security: SecurityConfig,

    /// Snapshot storage location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Smartsheet API configuration
#[derive(Deserialize, Clone)]
pub struct SmartsheetConfig {
    /// API access token
    pub api_token: Option<String>,

    /// Workspace to synchronize
    pub workspace_id: Option<i64>,

    /// API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Max retry attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for SmartsheetConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            workspace_id: None,
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

// Keeps the token out of debug logs.
impl fmt::Debug for SmartsheetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmartsheetConfig")
            .field("api_token", &self.api_token.as_ref().map(|_| "<set>"))
            .field("workspace_id", &self.workspace_id)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

/// How strictly outbound HTTPS is policed
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Certificate verification is mandatory; corporate proxy and CA bundle apply
    #[default]
    Enterprise,
    /// Relaxed checks for local testing: verification may be disabled, proxies bypassed
    Testing,
}

impl SecurityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityMode::Enterprise => "enterprise",
            SecurityMode::Testing => "testing",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enterprise" => Ok(SecurityMode::Enterprise),
            "testing" => Ok(SecurityMode::Testing),
            other => Err(Error::Config(format!(
                "unknown security mode '{}' (expected enterprise or testing)",
                other
            ))),
        }
    }
}

/// TLS verification and proxy settings
#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    #[serde(default)]
    pub mode: SecurityMode,

    /// Verify server certificates (only honoured in testing mode)
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    /// Extra PEM root certificate to trust
    pub ca_bundle: Option<PathBuf>,

    /// Proxy for all outbound requests (enterprise mode only)
    pub proxy_url: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            mode: SecurityMode::default(),
            verify_tls: default_verify_tls(),
            ca_bundle: None,
            proxy_url: None,
        }
    }
}

fn default_verify_tls() -> bool {
    true
}

/// Snapshot storage configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct StorageConfig {
    /// Override for the data directory
    pub data_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path, then apply the environment.
    ///
    /// A `.env` file in the working directory (or a parent) is merged into
    /// the process environment first; variables already set win.
    ///
    /// Runs before logging is initialized, so it does not emit events.
    pub fn load() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(Error::Config(format!("failed to load .env file: {}", e)));
            }
        }

        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            Config::default()
        };

        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)?;

        Ok(config)
    }

    /// Overlay settings from process environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay settings from an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("SMARTSHEET_API_TOKEN") {
            self.smartsheet.api_token = Some(token);
        }
        if let Some(id) = get("WORKSPACE_ID") {
            self.smartsheet.workspace_id = Some(parse_env("WORKSPACE_ID", &id)?);
        }
        if let Some(url) = get("SMARTSHEET_BASE_URL") {
            self.smartsheet.base_url = url;
        }
        if let Some(timeout) = get("REQUEST_TIMEOUT") {
            self.smartsheet.timeout_secs = parse_env("REQUEST_TIMEOUT", &timeout)?;
        }
        if let Some(retries) = get("MAX_RETRIES") {
            self.smartsheet.max_retries = parse_env("MAX_RETRIES", &retries)?;
        }
        if let Some(mode) = get("SECURITY_MODE") {
            self.security.mode = mode.parse()?;
        }
        if let Some(verify) = get("SSL_VERIFY") {
            self.security.verify_tls = parse_bool("SSL_VERIFY", &verify)?;
        }
        if let Some(bundle) = get("SSL_CA_BUNDLE") {
            self.security.ca_bundle = Some(PathBuf::from(bundle));
        }
        if let Some(proxy) = get("HTTPS_PROXY").or_else(|| get("https_proxy")) {
            self.security.proxy_url = Some(proxy);
        }
        if let Some(dir) = get("SHEETSYNC_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.logging.level = level.to_ascii_lowercase();
        }

        Ok(())
    }

    /// Check required settings before any sync operation runs.
    pub fn validate(&self) -> Result<()> {
        if self.smartsheet.api_token.is_none() {
            return Err(Error::Config("SMARTSHEET_API_TOKEN is required".to_string()));
        }
        if self.smartsheet.workspace_id.is_none() {
            return Err(Error::Config("WORKSPACE_ID is required".to_string()));
        }
        if self.smartsheet.timeout_secs == 0 {
            return Err(Error::Config(
                "request timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding snapshots and sync history.
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/sheetsync/config.toml` (~/.config/sheetsync/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("sheetsync").join("config.toml")
    }

    /// Returns the default data directory path
    ///
    /// `$XDG_DATA_HOME/sheetsync/` (~/.local/share/sheetsync/)
    pub fn default_data_dir() -> PathBuf {
        xdg_data_home().join("sheetsync")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/sheetsync/` (~/.local/state/sheetsync/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("sheetsync")
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid {} '{}': {}", key, value, e)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "invalid {} '{}': expected true or false",
            key, value
        ))),
    }
}
