//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via ACP_CONFIG or --config)
//! 3. Environment variables
//! 4. Command-line flags (applied by the caller)

use acp_client::SessionConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device connection settings.
    pub connection: ConnectionConfig,
    /// Authentication settings.
    pub auth: AuthConfig,
    /// Property table settings.
    pub properties: PropertiesConfig,
}

impl Config {
    /// Loads configuration from `path` (or ACP_CONFIG), then applies
    /// environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var("ACP_CONFIG") {
                Ok(path) => Self::from_file(&path)?,
                Err(_) => Self::default(),
            },
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides looked up by variable name.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.connection.apply_overrides(&lookup);
        self.auth.apply_overrides(&lookup);
        self.properties.apply_overrides(&lookup);
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "connection.host must not be empty".to_string(),
            ));
        }
        if self.connection.port == 0 {
            return Err(ConfigError::ValidationError(
                "connection.port must not be 0".to_string(),
            ));
        }
        if self.connection.connect_timeout_secs == 0 || self.connection.read_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "connection timeouts must be at least 1 second".to_string(),
            ));
        }
        if self.auth.password.len() > acp_protocol::HEADER_KEY_SIZE {
            tracing::warn!(
                "Password is longer than {} bytes and will be truncated",
                acp_protocol::HEADER_KEY_SIZE
            );
        }
        Ok(())
    }

    /// Builds the session configuration.
    pub fn session_config(&self) -> SessionConfig {
        let connection = &self.connection;
        let mut config = SessionConfig::new(&connection.host, connection.port)
            .with_connect_timeout(connection.connect_timeout())
            .with_read_timeout(connection.read_timeout());
        if let Some(ip) = connection.bind_addr {
            config = config.with_bind_addr(SocketAddr::new(ip, 0));
        }
        config
    }
}

/// Device connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Device host name or address.
    pub host: String,
    /// Device port.
    pub port: u16,
    /// Local source address to bind before connecting.
    pub bind_addr: Option<IpAddr>,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    pub read_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.1".to_string(),
            port: acp_protocol::DEFAULT_PORT,
            bind_addr: None,
            connect_timeout_secs: 10,
            read_timeout_secs: 10,
        }
    }
}

impl ConnectionConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("ACP_HOST") {
            self.host = host;
        }

        if let Some(port) = lookup("ACP_PORT") {
            if let Ok(parsed) = port.parse() {
                self.port = parsed;
            }
        }

        if let Some(addr) = lookup("ACP_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = Some(parsed);
            }
        }

        if let Some(timeout) = lookup("ACP_CONNECT_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.connect_timeout_secs = secs;
            }
        }

        if let Some(timeout) = lookup("ACP_READ_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.read_timeout_secs = secs;
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Device password.
    pub password: String,
}

impl AuthConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(password) = lookup("ACP_PASSWORD") {
            self.password = password;
        }
    }
}

/// Property table configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertiesConfig {
    /// YAML property table replacing the built-in one.
    pub table_file: Option<PathBuf>,
}

impl PropertiesConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("ACP_PROPERTY_TABLE") {
            self.table_file = Some(PathBuf::from(path));
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
