//! CLI argument definitions for the Parley terminal client.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

use parley_core::ParleyConfig;

/// Parley: a terminal client for the assistant service.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Base URL of the assistant service.
    #[arg(short = 's', long = "server")]
    pub server: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Open an existing conversation on startup.
    #[arg(long = "conversation")]
    pub conversation: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > PARLEY_CONFIG env var > ~/.parley/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("PARLEY_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the service URL.
    ///
    /// Priority: --server flag > PARLEY_SERVER env var > config file value.
    pub fn resolve_server(&self, config_url: &str) -> String {
        if let Some(ref url) = self.server {
            return url.clone();
        }
        match std::env::var("PARLEY_SERVER") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => config_url.to_string(),
        }
    }

    /// Resolve the log level: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }

    /// Apply flag and environment overrides to a loaded configuration.
    pub fn apply(&self, config: &mut ParleyConfig) {
        config.server.base_url = self.resolve_server(&config.server.base_url);
        config.general.log_level = self.resolve_log_level(&config.general.log_level);
        if let Ok(token) = std::env::var("PARLEY_ACCESS_TOKEN") {
            config.auth.access_token = Some(token);
        }
        if let Ok(token) = std::env::var("PARLEY_REFRESH_TOKEN") {
            config.auth.refresh_token = Some(token);
        }
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".parley").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".parley").join("config.toml");
    }
    PathBuf::from("config.toml")
}
