//! Configuration for warden-daemon

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use warden_recovery::{DetectionConfig, EngineConfig, PatternConfig, RecoveryConfig, StormConfig};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Symptom detection rules and criticality
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Recovery budgets and timeouts
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Fleet storm circuit breaker
    #[serde(default)]
    pub storm: StormConfig,

    /// Pattern learning and persistence
    #[serde(default)]
    pub patterns: PatternConfig,

    /// External capability endpoints
    #[serde(default)]
    pub capability: CapabilityConfig,

    /// JSON file with the service dependency graph. The built-in topology
    /// is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_path: Option<PathBuf>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
            max_body_size: default_max_body_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Where remediation and notifications are sent.
///
/// Without an action webhook the daemon runs in dry-run mode: actions are
/// logged and reported as applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Endpoint receiving `{device_id, action}` for every remediation step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_webhook: Option<String>,

    /// Endpoint receiving `{incident, channel}` for escalations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_webhook: Option<String>,

    /// Request timeout for both webhooks in seconds
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            action_webhook: None,
            notify_webhook: None,
            timeout_secs: default_webhook_timeout(),
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_webhook_timeout() -> u64 {
    10
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `WARDEN__SECTION__KEY` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Add environment variables with WARDEN__ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("WARDEN")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Engine configuration assembled from the daemon sections.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            detection: self.detection.clone(),
            recovery: self.recovery.clone(),
            storm: self.storm.clone(),
            patterns: self.patterns.clone(),
        }
    }
}
