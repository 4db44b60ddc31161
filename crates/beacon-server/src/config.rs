//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (`BEACON__*`, e.g. `BEACON__PRESENCE__ONLINE_WINDOW_SECS`)
//! - Command line arguments

use anyhow::{Context, Result};
use beacon_core::{LivenessPolicy, NewIdentity};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Liveness window configuration.
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Identity storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path prefix for the signaling WebSocket; the identity follows it.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Liveness window configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// A peer is online if seen within this many seconds.
    #[serde(default = "default_online_window")]
    pub online_window_secs: u64,

    /// Disconnect backdates liveness by this many seconds.
    #[serde(default = "default_stale_offset")]
    pub stale_offset_secs: u64,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of concurrent WebSocket sessions.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Deliveries buffered per session before drops.
    #[serde(default = "default_session_queue_capacity")]
    pub session_queue_capacity: usize,
}

/// Identity storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path. In-memory storage when absent.
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Identities registered at startup.
    #[serde(default)]
    pub seed: Vec<NewIdentity>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("BEACON_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("BEACON_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws/signal".to_string()
}

fn default_max_message_size() -> usize {
    beacon_core::router::DEFAULT_MAX_MESSAGE_SIZE
}

fn default_online_window() -> u64 {
    beacon_core::presence::DEFAULT_ONLINE_WINDOW.as_secs()
}

fn default_stale_offset() -> u64 {
    beacon_core::presence::DEFAULT_STALE_OFFSET.as_secs()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_session_queue_capacity() -> usize {
    beacon_core::registry::DEFAULT_SESSION_QUEUE_CAPACITY
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            presence: PresenceConfig::default(),
            limits: LimitsConfig::default(),
            storage: StorageConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            online_window_secs: default_online_window(),
            stale_offset_secs: default_stale_offset(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            session_queue_capacity: default_session_queue_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first default path found, then apply
    /// `BEACON__*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "beacon.toml",
            "/etc/beacon/beacon.toml",
            "~/.config/beacon/beacon.toml",
        ];

        let found = config_paths
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        Self::layered(found.as_deref())
    }

    /// Load `path` if given, then apply `BEACON__*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or an override cannot be parsed.
    pub fn layered(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            tracing::info!("Loading configuration from {}", path.display());
            builder = builder
                .add_source(::config::File::from(path).format(::config::FileFormat::Toml));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("BEACON")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error if the presence windows are inconsistent.
    pub fn validate(&self) -> Result<()> {
        self.liveness_policy()?;
        Ok(())
    }

    /// The liveness policy described by `[presence]`.
    ///
    /// # Errors
    ///
    /// Returns an error unless the stale offset exceeds the online window.
    pub fn liveness_policy(&self) -> Result<LivenessPolicy> {
        LivenessPolicy::new(
            Duration::from_secs(self.presence.online_window_secs),
            Duration::from_secs(self.presence.stale_offset_secs),
        )
        .context("Invalid [presence] configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
