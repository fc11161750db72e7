//! Bootstrap configuration loading
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)
//!
//! The CLI/env layer lives in the service binary (clap handles both); this
//! module locates and parses the TOML file and supplies the defaults. A
//! missing TOML file is never fatal: a warning is logged and defaults apply.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit TOML config file
pub const CONFIG_ENV_VAR: &str = "ETP_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Address the HTTP server binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path to the regression model artifact (JSON)
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Pipeline tuning (optional)
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Stream/store wiring applied at startup (optional)
    ///
    /// When absent, resources are wired later through `/init_data_resources`.
    #[serde(default)]
    pub resources: Option<ResourceSettings>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            model_path: default_model_path(),
            logging: LoggingConfig::default(),
            pipeline: PipelineSettings::default(),
            resources: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Pipeline tuning knobs
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PipelineSettings {
    /// Upper bound on the time spent accumulating one batch
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Sleep between polls while the stream has nothing new
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Largest batch a single request may ask for
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Imputed `days_since_last_purchase` when a batch has no usable value at all
    #[serde(default)]
    pub days_since_last_purchase_fallback: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_timeout_ms: default_batch_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_batch_size: default_max_batch_size(),
            days_since_last_purchase_fallback: 0.0,
        }
    }
}

impl PipelineSettings {
    /// Reject settings that would make every run fail or spin
    pub fn validate(&self) -> Result<()> {
        if self.batch_timeout_ms == 0 {
            return Err(Error::Config("pipeline.batch_timeout_ms must be > 0".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("pipeline.poll_interval_ms must be > 0".to_string()));
        }
        if self.max_batch_size == 0 {
            return Err(Error::Config("pipeline.max_batch_size must be > 0".to_string()));
        }
        if !self.days_since_last_purchase_fallback.is_finite()
            || self.days_since_last_purchase_fallback < 0.0
        {
            return Err(Error::Config(
                "pipeline.days_since_last_purchase_fallback must be a non-negative number"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Stream + store wiring
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResourceSettings {
    pub stream: StreamConfig,
    pub store: StoreConfig,
}

/// Where the stream consumer starts when its group has no committed offset
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Start from the oldest retained event
    #[default]
    Earliest,
    /// Start after the newest event present at connect time
    Latest,
}

/// Stream consumer configuration
///
/// Field names follow the consumer settings the upstream stream controller
/// already sends (`bootstrap_servers`, `topics`, ...).
#[derive(Clone, Deserialize, Serialize, PartialEq)]
pub struct StreamConfig {
    /// Connection target of the event log
    #[serde(alias = "url")]
    pub bootstrap_servers: String,
    /// Topic to consume
    #[serde(alias = "topic")]
    pub topics: String,
    /// Consumer group owning the committed read position
    pub group_id: String,
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,
    #[serde(default = "default_true")]
    pub enable_auto_commit: bool,
}

impl StreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(Error::Config("stream bootstrap_servers is empty".to_string()));
        }
        if self.topics.trim().is_empty() {
            return Err(Error::Config("stream topics is empty".to_string()));
        }
        if self.group_id.trim().is_empty() {
            return Err(Error::Config("stream group_id is empty".to_string()));
        }
        Ok(())
    }
}

// Connection targets may carry credentials; keep them out of logs.
impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("bootstrap_servers", &"<redacted>")
            .field("topics", &self.topics)
            .field("group_id", &self.group_id)
            .field("auto_offset_reset", &self.auto_offset_reset)
            .field("enable_auto_commit", &self.enable_auto_commit)
            .finish()
    }
}

/// Historical feature store configuration
#[derive(Clone, Deserialize, Serialize, PartialEq)]
pub struct StoreConfig {
    /// Database path or `sqlite:` URL
    #[serde(alias = "url")]
    pub database: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Open the store read-only (the scorer never writes features)
    #[serde(default = "default_true")]
    pub read_only: bool,
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(Error::Config("store database is empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(Error::Config("store max_connections must be > 0".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("database", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("read_only", &self.read_only)
            .finish()
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/purchase_regressor.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_batch_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_batch_size() -> usize {
    10_000
}

fn default_max_connections() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

/// Locate the TOML config file
///
/// Priority: explicit path (CLI) → `ETP_CONFIG` → user config dir → `/etc/etp`.
/// Returns `None` when no candidate exists.
pub fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("etp").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/etp/config.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_toml_config(&content)
}

/// Parse TOML config text and validate it
pub fn parse_toml_config(content: &str) -> Result<TomlConfig> {
    let config: TomlConfig =
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;

    config.pipeline.validate()?;
    if let Some(resources) = &config.resources {
        resources.stream.validate()?;
        resources.store.validate()?;
    }

    Ok(config)
}

/// Load configuration with graceful degradation
///
/// A file that was located but cannot be read or parsed is an error (the
/// operator asked for it); no file at all yields the built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    match locate_config_file(explicit) {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            load_toml_config(&path)
        }
        None => {
            warn!("No configuration file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.bind_addr, "0.0.0.0");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.pipeline.batch_timeout_ms, 30_000);
        assert!(config.resources.is_none());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = parse_toml_config("").unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.pipeline, PipelineSettings::default());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = parse_toml_config("[pipeline]\nbatch_timeout_ms = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_debug_redacts_connection_targets() {
        let stream = StreamConfig {
            bootstrap_servers: "sqlite://secret-host/events.db".to_string(),
            topics: "events".to_string(),
            group_id: "g".to_string(),
            auto_offset_reset: OffsetReset::Earliest,
            enable_auto_commit: true,
        };
        let printed = format!("{:?}", stream);
        assert!(!printed.contains("secret-host"));
        assert!(printed.contains("<redacted>"));
    }
}
