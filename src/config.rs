//! # Configuration Management
//!
//! Centralized configuration for the peer link transport.
//!
//! This module provides structured configuration for the connection acceptor,
//! the line-framed reader, identity generation, TLS negotiation, and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Security Considerations
//! - The frame buffer limit bounds memory held for a single unterminated frame
//! - Device certificates default to a ten year validity window
//! - TLS settings enforce modern cryptography (TLS 1.2+)

use crate::error::{ProtocolError, Result};
use crate::transport::tls::TlsVersion;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Single-byte frame delimiter
pub const FRAME_DELIMITER: u8 = b'\n';

/// Max bytes a reader will hold for one unterminated frame (16 MB)
pub const MAX_BUFFERED_BYTES: usize = 16 * 1024 * 1024;

/// Default number of bytes reserved per socket read
pub const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Default device certificate lifetime (10 years)
pub const CERT_VALIDITY_DAYS: u32 = 3650;

/// Main link configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LinkConfig {
    /// Connection acceptor configuration
    #[serde(default)]
    pub acceptor: AcceptorConfig,

    /// Frame reader configuration
    #[serde(default)]
    pub frame: FrameConfig,

    /// Device identity configuration
    #[serde(default)]
    pub identity: IdentityConfig,

    /// TLS negotiation configuration
    #[serde(default)]
    pub tls: TlsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LinkConfig {
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

        if let Ok(addr) = std::env::var("PEER_LINK_ADDRESS") {
            config.acceptor.address = addr;
        }

        if let Ok(limit) = std::env::var("PEER_LINK_BACKPRESSURE_LIMIT") {
            if let Ok(val) = limit.parse::<usize>() {
                config.acceptor.backpressure_limit = val;
            }
        }

        if let Ok(wait) = std::env::var("PEER_LINK_PENDING_WAIT_MS") {
            if let Ok(val) = wait.parse::<u64>() {
                config.acceptor.pending_wait = Duration::from_millis(val);
            }
        }

        if let Ok(max) = std::env::var("PEER_LINK_MAX_BUFFERED_BYTES") {
            if let Ok(val) = max.parse::<usize>() {
                config.frame.max_buffered_bytes = val;
            }
        }

        if let Ok(days) = std::env::var("PEER_LINK_CERT_VALIDITY_DAYS") {
            if let Ok(val) = days.parse::<u32>() {
                config.identity.validity_days = val;
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
        errors.extend(self.acceptor.validate());
        errors.extend(self.frame.validate());
        errors.extend(self.identity.validate());
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

/// Connection acceptor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AcceptorConfig {
    /// Listen address (e.g., "127.0.0.1:1716")
    pub address: String,

    /// Maximum number of accepted-but-unclaimed connections
    pub backpressure_limit: usize,

    /// Default bound for `Acceptor::wait_pending`
    #[serde(with = "duration_serde")]
    pub pending_wait: Duration,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:1716"),
            backpressure_limit: 32,
            pending_wait: timeout::DEFAULT_TIMEOUT,
        }
    }
}

impl AcceptorConfig {
    /// Validate acceptor configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Acceptor address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid acceptor address format: '{}' (expected format: '0.0.0.0:1716')",
                self.address
            ));
        }

        if self.backpressure_limit == 0 {
            errors.push("Backpressure limit must be greater than 0".to_string());
        } else if self.backpressure_limit > 100_000 {
            errors.push(format!(
                "Backpressure limit too large: {} (max recommended: 100,000)",
                self.backpressure_limit
            ));
        }

        if self.pending_wait.as_millis() < 10 {
            errors.push("Pending wait too short (minimum: 10ms)".to_string());
        } else if self.pending_wait.as_secs() > 300 {
            errors.push("Pending wait too long (maximum: 300s)".to_string());
        }

        errors
    }
}

/// Frame reader configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FrameConfig {
    /// Maximum bytes held for a single frame that has not seen its delimiter
    pub max_buffered_bytes: usize,

    /// Bytes reserved in the buffer before each socket read
    pub read_chunk_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_buffered_bytes: MAX_BUFFERED_BYTES,
            read_chunk_size: READ_CHUNK_SIZE,
        }
    }
}

impl FrameConfig {
    /// Validate frame configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_buffered_bytes < 1024 {
            errors.push("Max buffered bytes too small (minimum: 1 KB)".to_string());
        } else if self.max_buffered_bytes > 256 * 1024 * 1024 {
            errors.push(format!(
                "Max buffered bytes too large: {} (maximum recommended: 256 MB)",
                self.max_buffered_bytes
            ));
        }

        if self.read_chunk_size == 0 {
            errors.push("Read chunk size must be greater than 0".to_string());
        } else if self.read_chunk_size > self.max_buffered_bytes {
            errors.push("Read chunk size cannot exceed max buffered bytes".to_string());
        }

        errors
    }
}

/// Device identity configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    /// Certificate lifetime in days, starting at creation
    pub validity_days: u32,

    /// Organization (O) recorded in generated certificates
    pub organization: String,

    /// Organizational unit (OU) recorded in generated certificates
    pub organizational_unit: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            validity_days: CERT_VALIDITY_DAYS,
            organization: String::from("KDE"),
            organizational_unit: String::from("Kde connect"),
        }
    }
}

impl IdentityConfig {
    /// Validate identity configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.validity_days == 0 {
            errors.push("Certificate validity must be at least 1 day".to_string());
        } else if self.validity_days > 36_500 {
            errors.push(format!(
                "Certificate validity too long: {} days (maximum: 100 years)",
                self.validity_days
            ));
        }

        if self.organization.is_empty() {
            errors.push("Organization cannot be empty".to_string());
        }

        errors
    }
}

/// TLS negotiation configuration
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default)]
pub struct TlsConfig {
    /// Protocol versions offered and accepted
    #[serde(default)]
    pub versions: TlsVersion,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("peer-link"),
            log_level: Level::INFO,
            log_to_console: true,
            json_format: false,
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
        let level_str = level.as_str().to_ascii_lowercase();
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
