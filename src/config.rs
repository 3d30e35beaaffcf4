//! # Configuration Management
//!
//! Centralized configuration for dual-channel servers and clients.
//!
//! This module provides structured configuration for both endpoints: addresses,
//! handshake timeouts, admission control, buffer sizing and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` or `from_toml()`
//! - Environment variables prefixed with `DOUBLE_SOCKET_`
//! - Direct instantiation with defaults, or `default_with_overrides()`
//!
//! Durations are (de)serialized as whole milliseconds.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Size of the reusable send buffer of every connection
pub const SEND_BUFFER_SIZE: usize = 65537;

/// Size of the TCP receive and reassembly buffers
pub const TCP_BUFFER_SIZE: usize = 65537;

/// Size of a UDP receive buffer
pub const UDP_BUFFER_SIZE: usize = 1536;

/// Largest TCP packet body a 2-byte length prefix can describe
pub const MAX_TCP_PACKET_SIZE: usize = u16::MAX as usize;

/// Default number of buffers a receive pool keeps around
pub const DEFAULT_POOL_SIZE: usize = 20;

/// Default deadline for both handshake phases
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_millis(3000);

/// UDP authentication key sends per second
pub const DEFAULT_UDP_AUTH_FREQUENCY: u32 = 30;

/// Inclusive range of the per-connection sequence bound
pub const SEQUENCE_BOUND_RANGE: std::ops::RangeInclusive<u8> = 128..=255;

/// Main network configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Buffer and packet sizing
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
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

        if let Ok(addr) = std::env::var("DOUBLE_SOCKET_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(addr) = std::env::var("DOUBLE_SOCKET_CLIENT_ADDRESS") {
            config.client.address = addr;
        }

        if let Ok(max) = std::env::var("DOUBLE_SOCKET_MAX_AUTHENTICATED") {
            if let Ok(val) = max.parse::<usize>() {
                config.server.max_authenticated = val;
            }
        }

        if let Ok(timeout) = std::env::var("DOUBLE_SOCKET_AUTH_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                let timeout = Duration::from_millis(val);
                config.server.tcp_auth_timeout = timeout;
                config.server.udp_auth_timeout = timeout;
                config.client.tcp_auth_timeout = timeout;
            }
        }

        if let Ok(frequency) = std::env::var("DOUBLE_SOCKET_UDP_AUTH_FREQUENCY") {
            if let Ok(val) = frequency.parse::<u32>() {
                config.client.udp_auth_frequency = val;
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
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
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

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address shared by the TCP listener and the UDP socket (e.g., "127.0.0.1:9000")
    pub address: String,

    /// Maximum number of peers past TCP authentication; acceptance pauses at this count
    pub max_authenticated: usize,

    /// TCP listen backlog
    pub max_pending_connections: u32,

    /// Deadline for a new peer to send its authentication packet
    #[serde(with = "duration_serde")]
    pub tcp_auth_timeout: Duration,

    /// Deadline for an accepted peer to prove its UDP endpoint
    #[serde(with = "duration_serde")]
    pub udp_auth_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            max_authenticated: 64,
            max_pending_connections: 128,
            tcp_auth_timeout: DEFAULT_AUTH_TIMEOUT,
            udp_auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:8080')",
                self.address
            ));
        }

        if self.max_authenticated == 0 {
            errors.push("Max authenticated connections must be greater than 0".to_string());
        } else if self.max_authenticated > 100_000 {
            errors.push(format!(
                "Max authenticated connections very high: {} (ensure system resources can support this)",
                self.max_authenticated
            ));
        }

        if self.max_pending_connections == 0 {
            errors.push("Max pending connections must be greater than 0".to_string());
        }

        for (name, timeout) in [
            ("TCP authentication", self.tcp_auth_timeout),
            ("UDP authentication", self.udp_auth_timeout),
        ] {
            if timeout.as_millis() < 100 {
                errors.push(format!("{name} timeout too short (minimum: 100ms)"));
            } else if timeout.as_secs() > 300 {
                errors.push(format!("{name} timeout too long (maximum: 300s)"));
            }
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Target server address
    pub address: String,

    /// Deadline for the server's TCP authentication reply
    #[serde(with = "duration_serde")]
    pub tcp_auth_timeout: Duration,

    /// UDP authentication key sends per second
    pub udp_auth_frequency: u32,

    /// How long the UDP authentication key is resent before giving up
    #[serde(with = "duration_serde")]
    pub udp_auth_duration: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            tcp_auth_timeout: DEFAULT_AUTH_TIMEOUT,
            udp_auth_frequency: DEFAULT_UDP_AUTH_FREQUENCY,
            udp_auth_duration: DEFAULT_AUTH_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Number of UDP authentication sends before the phase times out
    pub fn udp_auth_attempts(&self) -> u32 {
        let attempts = self.udp_auth_duration.as_millis() * u128::from(self.udp_auth_frequency) / 1000;
        attempts.clamp(1, u128::from(u32::MAX)) as u32
    }

    /// Delay between two UDP authentication sends
    pub fn udp_auth_interval(&self) -> Duration {
        Duration::from_secs(1) / self.udp_auth_frequency.max(1)
    }

    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid client address format: '{}' (expected format: '127.0.0.1:8080')",
                self.address
            ));
        }

        if self.tcp_auth_timeout.as_millis() < 100 {
            errors.push("TCP authentication timeout too short (minimum: 100ms)".to_string());
        }

        if self.udp_auth_frequency == 0 {
            errors.push("UDP authentication frequency must be greater than 0".to_string());
        } else if self.udp_auth_frequency > 1000 {
            errors.push(format!(
                "UDP authentication frequency too high: {} (maximum: 1000/s)",
                self.udp_auth_frequency
            ));
        }

        if self.udp_auth_duration.as_millis() < 100 {
            errors.push("UDP authentication duration too short (minimum: 100ms)".to_string());
        } else if self.udp_auth_duration.as_secs() > 60 {
            errors.push("UDP authentication duration too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Buffer and packet sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Largest accepted TCP packet body; longer declared lengths tear the connection down
    pub max_tcp_packet_size: usize,

    /// Size of each UDP receive buffer
    pub udp_buffer_size: usize,

    /// Buffers each receive pool retains
    pub pool_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_tcp_packet_size: MAX_TCP_PACKET_SIZE,
            udp_buffer_size: UDP_BUFFER_SIZE,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_tcp_packet_size == 0 {
            errors.push("Max TCP packet size cannot be 0".to_string());
        } else if self.max_tcp_packet_size > MAX_TCP_PACKET_SIZE {
            errors.push(format!(
                "Max TCP packet size too large: {} bytes (a 2-byte length prefix allows {MAX_TCP_PACKET_SIZE})",
                self.max_tcp_packet_size
            ));
        }

        if self.udp_buffer_size < 64 {
            errors.push("UDP buffer size too small (minimum: 64 bytes)".to_string());
        } else if self.udp_buffer_size > 65_507 {
            errors.push(format!(
                "UDP buffer size too large: {} bytes (maximum datagram: 65507)",
                self.udp_buffer_size
            ));
        }

        if self.pool_size > 10_000 {
            errors.push(format!("Buffer pool too large: {} (maximum: 10000)", self.pool_size));
        }

        errors
    }
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

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("double-socket"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
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

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
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
