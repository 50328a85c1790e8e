//! Proxy configuration
//!
//! Values come from three layers, later ones winning:
//! - built-in defaults
//! - an optional YAML file named by `COOKIE_CATCHER_CONFIG`
//! - environment variables (a `.env` file is loaded first if present)

use crate::auth::DEFAULT_REALM;
use crate::logger::LogFormat;
use secrecy::SecretString;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Shape of the YAML config file; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    database_path: Option<PathBuf>,
    log_format: Option<LogFormat>,
    auth_realm: Option<String>,
    connect_timeout_seconds: Option<u64>,
    max_response_body_size: Option<usize>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,

    /// SQLite database holding watchlist, credentials and cookies
    pub database_path: PathBuf,

    pub log_format: LogFormat,
    pub auth_realm: String,

    // Plain HTTP forwarding
    pub connect_timeout_seconds: u64,
    pub max_response_body_size: usize,

    /// Written to the store at startup when both are present
    pub bootstrap_username: Option<String>,
    pub bootstrap_password: Option<SecretString>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_path: PathBuf::from("cookies.db"),
            log_format: LogFormat::Pretty,
            auth_realm: DEFAULT_REALM.to_string(),
            connect_timeout_seconds: 10,
            max_response_body_size: 100 * 1024 * 1024,
            bootstrap_username: None,
            bootstrap_password: None,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file if present

        let config = Self::from_lookup(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = non_empty(lookup("COOKIE_CATCHER_CONFIG")) {
            config.apply_file(Self::read_file(&path)?);
        }

        if let Some(host) = non_empty(lookup("PROXY_HOST")) {
            config.host = host;
        }
        if let Some(port) = lookup("PROXY_PORT") {
            config.port = parse_value("PROXY_PORT", port)?;
        }
        if let Some(path) = non_empty(lookup("DATABASE_PATH")) {
            config.database_path = PathBuf::from(path);
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            config.log_format = parse_value("LOG_FORMAT", format)?;
        }
        if let Some(realm) = lookup("AUTH_REALM") {
            config.auth_realm = realm;
        }
        if let Some(timeout) = lookup("CONNECT_TIMEOUT_SECONDS") {
            config.connect_timeout_seconds = parse_value("CONNECT_TIMEOUT_SECONDS", timeout)?;
        }
        if let Some(size) = lookup("MAX_RESPONSE_BODY_SIZE") {
            config.max_response_body_size = parse_value("MAX_RESPONSE_BODY_SIZE", size)?;
        }
        if let Some(username) = non_empty(lookup("PROXY_USERNAME")) {
            config.bootstrap_username = Some(username);
        }
        if let Some(password) = non_empty(lookup("PROXY_PASSWORD")) {
            config.bootstrap_password = Some(SecretString::new(password));
        }

        Ok(config)
    }

    fn read_file<P: AsRef<Path>>(path: P) -> Result<FileConfig, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(format!("{}: {}", path.as_ref().display(), e)))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(path) = file.database_path {
            self.database_path = path;
        }
        if let Some(format) = file.log_format {
            self.log_format = format;
        }
        if let Some(realm) = file.auth_realm {
            self.auth_realm = realm;
        }
        if let Some(timeout) = file.connect_timeout_seconds {
            self.connect_timeout_seconds = timeout;
        }
        if let Some(size) = file.max_response_body_size {
            self.max_response_body_size = size;
        }
        if let Some(username) = non_empty(file.username) {
            self.bootstrap_username = Some(username);
        }
        if let Some(password) = non_empty(file.password) {
            self.bootstrap_password = Some(SecretString::new(password));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ValidationError(
                "PROXY_PORT cannot be 0".to_string(),
            ));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "DATABASE_PATH cannot be empty".to_string(),
            ));
        }
        if self.auth_realm.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "AUTH_REALM cannot be empty".to_string(),
            ));
        }
        if self.connect_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "CONNECT_TIMEOUT_SECONDS must be greater than 0".to_string(),
            ));
        }
        if self.max_response_body_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_RESPONSE_BODY_SIZE must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Bootstrap credentials, only when both halves are configured
    pub fn bootstrap_credentials(&self) -> Option<(&str, &SecretString)> {
        match (&self.bootstrap_username, &self.bootstrap_password) {
            (Some(username), Some(password)) => Some((username.as_str(), password)),
            _ => None,
        }
    }
}
