//! # Configuration Management
//!
//! Centralized configuration for the Insteon protocol engine.
//!
//! This module groups every tunable of the engine: the modem link and its reconnect
//! policy, request deadlines and retries, broadcast deduplication windows, link
//! database sync, and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables prefixed `INSTEON_` via `from_env()`
//! - Direct instantiation with defaults
//!
//! Durations are written in milliseconds.

use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::DEFAULT_RETRANSMIT_LIMIT;
use crate::transport::tcp::HUB_PORT;
use crate::utils::dedup::{self, DedupSettings};
use crate::utils::{backoff, timeout};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default number of resends for a failed request.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Top-level engine configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EngineConfig {
    /// Modem link configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Request/response coordination
    #[serde(default)]
    pub request: RequestConfig,

    /// Broadcast deduplication
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Link database sync
    #[serde(default)]
    pub aldb: AldbConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(address) = std::env::var("INSTEON_MODEM_ADDRESS") {
            config.connection.address = address;
        }

        if let Some(val) = env_millis("INSTEON_SETTLE_INTERVAL_MS") {
            config.connection.settle_interval = val;
        }

        if let Some(val) = env_millis("INSTEON_RECONNECT_MAX_DELAY_MS") {
            config.connection.reconnect_max_delay = val;
        }

        if let Some(val) = env_millis("INSTEON_WIRE_ACK_TIMEOUT_MS") {
            config.request.wire_ack_timeout = val;
        }

        if let Some(val) = env_millis("INSTEON_REPLY_TIMEOUT_MS") {
            config.request.reply_timeout = val;
        }

        if let Ok(retries) = std::env::var("INSTEON_MAX_RETRIES") {
            if let Ok(val) = retries.parse::<u32>() {
                config.request.max_retries = val;
            }
        }

        if let Ok(level) = std::env::var("INSTEON_LOG_LEVEL") {
            if let Ok(val) = level.parse::<Level>() {
                config.logging.log_level = val;
            }
        }

        if let Ok(json) = std::env::var("INSTEON_LOG_JSON") {
            config.logging.json_format = matches!(json.as_str(), "1" | "true" | "yes");
            if config.logging.json_format {
                config.logging.ansi = false;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.connection.validate());
        errors.extend(self.request.validate());
        errors.extend(self.dedup.validate());
        errors.extend(self.aldb.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Modem link configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Hub or serial bridge address (`host:port`)
    pub address: String,

    /// Deadline for opening the transport
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Idle time after each write before the next frame
    #[serde(with = "duration_serde")]
    pub settle_interval: Duration,

    /// First reconnect delay; doubles on each failure
    #[serde(with = "duration_serde")]
    pub reconnect_initial_delay: Duration,

    /// Reconnect delay ceiling
    #[serde(with = "duration_serde")]
    pub reconnect_max_delay: Duration,

    /// Automatic resends of a frame the modem refused
    pub retransmit_limit: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{HUB_PORT}"),
            connect_timeout: timeout::CONNECT_TIMEOUT,
            settle_interval: timeout::SETTLE_INTERVAL,
            reconnect_initial_delay: backoff::INITIAL_DELAY,
            reconnect_max_delay: backoff::MAX_DELAY,
            retransmit_limit: DEFAULT_RETRANSMIT_LIMIT,
        }
    }
}

impl ConnectionConfig {
    /// Validate connection configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Modem address cannot be empty".to_string());
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        }

        if self.settle_interval.as_secs() > 10 {
            errors.push("Settle interval too long (maximum: 10s)".to_string());
        }

        if self.reconnect_initial_delay.is_zero() {
            errors.push("Reconnect delay must be greater than 0".to_string());
        }

        if self.reconnect_max_delay < self.reconnect_initial_delay {
            errors.push("Reconnect max delay cannot be less than the initial delay".to_string());
        }

        if self.retransmit_limit > 10 {
            errors.push(format!(
                "Retransmit limit too high: {} (maximum: 10)",
                self.retransmit_limit
            ));
        }

        errors
    }
}

/// Request/response coordination configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Deadline for the modem echo
    #[serde(with = "duration_serde")]
    pub wire_ack_timeout: Duration,

    /// Deadline for the device reply
    #[serde(with = "duration_serde")]
    pub reply_timeout: Duration,

    /// Resends after a failed attempt
    pub max_retries: u32,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            wire_ack_timeout: timeout::WIRE_ACK_TIMEOUT,
            reply_timeout: timeout::REPLY_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RequestConfig {
    /// Validate request configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.wire_ack_timeout.as_millis() < 100 {
            errors.push("Wire ack timeout too short (minimum: 100ms)".to_string());
        }

        if self.reply_timeout.as_millis() < 100 {
            errors.push("Reply timeout too short (minimum: 100ms)".to_string());
        } else if self.reply_timeout.as_secs() > 60 {
            errors.push("Reply timeout too long (maximum: 60s)".to_string());
        }

        if self.max_retries > 10 {
            errors.push(format!(
                "Max retries too high: {} (maximum: 10)",
                self.max_retries
            ));
        }

        errors
    }
}

/// Broadcast deduplication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Window in which a same-hops copy is a repeat
    #[serde(with = "duration_serde")]
    pub short_threshold: Duration,

    /// After this long every copy is a new event
    #[serde(with = "duration_serde")]
    pub long_threshold: Duration,

    /// Window in which a cleanup repeats an earlier broadcast
    #[serde(with = "duration_serde")]
    pub cleanup_window: Duration,

    /// Entry lifetime
    #[serde(with = "duration_serde")]
    pub ttl: Duration,

    /// Maximum tracked events
    pub max_entries: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            short_threshold: dedup::SHORT_THRESHOLD,
            long_threshold: dedup::LONG_THRESHOLD,
            cleanup_window: dedup::CLEANUP_WINDOW,
            ttl: dedup::DEFAULT_TTL,
            max_entries: dedup::DEFAULT_MAX_ENTRIES,
        }
    }
}

impl DedupConfig {
    pub fn settings(&self) -> DedupSettings {
        DedupSettings {
            short_threshold: self.short_threshold,
            long_threshold: self.long_threshold,
            cleanup_window: self.cleanup_window,
            ttl: self.ttl,
            max_entries: self.max_entries,
        }
    }

    /// Validate deduplication configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.short_threshold > self.long_threshold {
            errors.push("Short dedup threshold cannot exceed the long threshold".to_string());
        }

        if self.ttl < self.long_threshold || self.ttl < self.cleanup_window {
            errors.push(
                "Dedup TTL must cover both the long threshold and the cleanup window".to_string(),
            );
        }

        if self.max_entries == 0 {
            errors.push("Dedup max entries must be greater than 0".to_string());
        } else if self.max_entries > 1_000_000 {
            errors.push(format!(
                "Dedup max entries too large: {} (maximum recommended: 1,000,000)",
                self.max_entries
            ));
        }

        errors
    }
}

/// Link database sync configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AldbConfig {
    /// Resends for each record read
    pub read_retries: u32,

    /// Resends for each record write
    pub write_retries: u32,

    /// Write even when the table is not fully loaded
    pub force_writes: bool,
}

impl Default for AldbConfig {
    fn default() -> Self {
        Self {
            read_retries: DEFAULT_MAX_RETRIES,
            write_retries: DEFAULT_MAX_RETRIES,
            force_writes: false,
        }
    }
}

impl AldbConfig {
    /// Validate link database configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.read_retries > 10 {
            errors.push(format!(
                "ALDB read retries too high: {} (maximum: 10)",
                self.read_retries
            ));
        }

        if self.write_retries > 10 {
            errors.push(format!(
                "ALDB write retries too high: {} (maximum: 10)",
                self.write_retries
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,

    /// Include the event target (module path)
    pub show_target: bool,

    /// Colour output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("insteon-protocol"),
            log_level: Level::INFO,
            json_format: false,
            show_target: true,
            ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.json_format && self.ansi {
            errors.push("ANSI colours are not supported with JSON logs".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
