use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CompassError, Result};

/// Top-level configuration for the Compass action core.
///
/// Loaded from `~/.compass/config.toml` by default. Each section corresponds
/// to a subsystem or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompassConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl CompassConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CompassConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CompassError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for SQLite and credential files.
    pub data_dir: String,
    /// API server port.
    pub port: u16,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.compass/data".to_string(),
            port: 4040,
            log_level: "info".to_string(),
        }
    }
}

/// Execution queue worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Poll loop interval in seconds.
    pub poll_interval_secs: u64,
    /// Max candidates inspected per claim attempt.
    pub claim_batch_size: u32,
    /// Default retry budget for enqueued executions.
    pub default_max_attempts: u32,
    /// Base for the exponential retry backoff, in seconds.
    pub retry_base_secs: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            claim_batch_size: 10,
            default_max_attempts: 3,
            retry_base_secs: 2,
        }
    }
}

/// Authorization gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Confidence at or above which a call is executed without a human.
    pub allow_threshold: f64,
    /// Confidence below which a call is denied outright.
    pub deny_threshold: f64,
    /// Max allowed clock skew on the call timestamp, in seconds.
    pub timestamp_skew_secs: i64,
    /// Validity window for nonces, in seconds.
    pub nonce_ttl_secs: i64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            allow_threshold: 0.8,
            deny_threshold: 0.35,
            timestamp_skew_secs: 300,
            nonce_ttl_secs: 600,
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Override path for the operator bearer token file.
    /// Defaults to `<data_dir>/api.token` when empty.
    pub token_path: String,
}
