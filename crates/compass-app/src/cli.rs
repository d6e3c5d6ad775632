//! CLI argument definitions for the Compass application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Compass — autonomous action execution and authorization engine.
#[derive(Parser, Debug)]
#[command(name = "compass", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory for SQLite and credential files.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Disable the background worker poll loop (trigger-only mode).
    #[arg(long = "no-poller")]
    pub no_poller: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > COMPASS_CONFIG env var > ~/.compass/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("COMPASS_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > COMPASS_PORT env var > config file value > 4040.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Ok(val) = std::env::var("COMPASS_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        if config_port != 0 {
            return config_port;
        }
        4040
    }

    /// Resolve the data directory path.
    ///
    /// Priority: --data-dir flag > config file value.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

/// Platform default config location: ~/.compass/config.toml.
pub fn default_config_path() -> PathBuf {
    home_dir().join(".compass").join("config.toml")
}

/// Expand a leading `~/` in a configured path.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        return home_dir().join(rest);
    }
    PathBuf::from(path)
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_port_priority() {
        let args = CliArgs {
            config: None,
            port: Some(9000),
            data_dir: None,
            log_level: None,
            no_poller: false,
        };
        assert_eq!(args.resolve_port(4040), 9000);

        let args = CliArgs {
            config: None,
            port: None,
            data_dir: None,
            log_level: None,
            no_poller: false,
        };
        assert_eq!(args.resolve_port(5050), 5050);
        assert_eq!(args.resolve_port(0), 4040);
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home("~/data");
        assert!(!expanded.to_string_lossy().starts_with("~/"));
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }
}
