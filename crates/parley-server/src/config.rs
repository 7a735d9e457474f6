//! Server configuration.
//!
//! Settings come from a TOML file (the first found of `$PARLEY_CONFIG`,
//! `./parley.toml`, `/etc/parley/parley.toml`, `~/.config/parley/parley.toml`),
//! then `PARLEY_HOST` / `PARLEY_PORT` override the bind address. Missing
//! keys take their defaults.

use anyhow::{bail, Context, Result};
use parley_protocol::codec::MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SEARCH_PATHS: [&str; 3] = [
    "parley.toml",
    "/etc/parley/parley.toml",
    "~/.config/parley/parley.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    pub transport: TransportConfig,
    pub limits: LimitsConfig,
    pub router: RouterSettings,
    pub metrics: MetricsConfig,
}

/// `[transport]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Path of the WebSocket endpoint.
    pub websocket_path: String,
}

/// `[limits]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Concurrent peers before new upgrades are turned away.
    pub max_connections: usize,
    /// Largest WebSocket message accepted, in bytes.
    pub max_message_size: usize,
}

/// `[router]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    /// Timeout for server-originated requests, in seconds. Zero or
    /// negative waits indefinitely.
    pub request_timeout_secs: i64,
    /// Send a `hello` request to every client after it connects.
    pub hello: bool,
}

/// `[metrics]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Port of the Prometheus listener.
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            router: RouterSettings::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: "/ws".to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            max_message_size: 64 * 1024,
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            hello: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl Config {
    /// Load the first configuration file found, apply environment
    /// overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if a file exists but cannot be parsed, an override
    /// is malformed, or validation fails.
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_file() {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                debug!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration file, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn find_file() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var("PARLEY_CONFIG") {
            return Some(PathBuf::from(shellexpand::tilde(&explicit).as_ref()));
        }
        SEARCH_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = var("PARLEY_HOST") {
            self.host = host;
        }
        if let Some(port) = var("PARLEY_PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("PARLEY_PORT is not a port number: {}", port))?;
        }
        Ok(())
    }

    /// Reject settings the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if !self.transport.websocket_path.starts_with('/') {
            bail!(
                "transport.websocket_path must start with '/': {}",
                self.transport.websocket_path
            );
        }
        if self.limits.max_connections == 0 {
            bail!("limits.max_connections must be at least 1");
        }
        if self.limits.max_message_size == 0 || self.limits.max_message_size > MAX_FRAME_SIZE {
            bail!(
                "limits.max_message_size must be between 1 and {} bytes",
                MAX_FRAME_SIZE
            );
        }
        if self.metrics.enabled && self.metrics.port == self.port {
            bail!("metrics.port {} collides with the server port", self.port);
        }
        self.bind_addr().map(|_| ())
    }

    /// The socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}
