//! # Configuration Management
//!
//! Centralized configuration for the transport client and its peer daemon.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - `DIM_*` environment overrides via `from_env()`
//!
//! ## Sections
//! - `client`: where the local daemon lives (interface / address / port /
//!   protocol) and how long a single RPC may take
//! - `daemon`: how the co-located daemon process is spawned and stopped
//! - `transport`: bulk transfer chunking and object size ceiling
//! - `logging`: tracing subscriber setup

use crate::error::{DimError, Result};
use crate::transport::address::Protocol;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Current supported wire protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Magic bytes to identify protocol packets (0x44494D54 → "DIMT")
pub const MAGIC_BYTES: [u8; 4] = [0x44, 0x49, 0x4D, 0x54];

/// Max allowed frame payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Default number of bytes moved per bulk pull/push round trip
pub const DEFAULT_BULK_CHUNK_SIZE: usize = 1024 * 1024;

/// Default ceiling on a single stored object (1 GiB)
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 1024 * 1024 * 1024;

/// Default daemon port
pub const DEFAULT_PORT: u16 = 6367;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DimConfig {
    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DimConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| DimError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| DimError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| DimError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(interface) = std::env::var("DIM_INTERFACE") {
            config.client.interface = Some(interface);
        }

        if let Ok(address) = std::env::var("DIM_ADDRESS") {
            config.client.address = Some(address);
        }

        if let Ok(port) = std::env::var("DIM_PORT") {
            config.client.port = port
                .parse::<u16>()
                .map_err(|e| DimError::ConfigError(format!("Invalid DIM_PORT '{port}': {e}")))?;
        }

        if let Ok(protocol) = std::env::var("DIM_PROTOCOL") {
            config.client.protocol = protocol.parse()?;
        }

        if let Ok(timeout) = std::env::var("DIM_CALL_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.call_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(program) = std::env::var("DIM_DAEMON_PROGRAM") {
            config.daemon.program = Some(PathBuf::from(program));
        }

        if let Ok(timeout) = std::env::var("DIM_SPAWN_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.daemon.spawn_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("DIM_BULK_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.transport.bulk_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("DIM_ATTACH_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.daemon.attach_timeout = Duration::from_millis(val);
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
            .map_err(|e| DimError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| DimError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.client.validate());
        errors.extend(self.daemon.validate());
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
            Err(DimError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Client-side configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Network interface whose address the local daemon binds (e.g. "ib0")
    #[serde(default)]
    pub interface: Option<String>,

    /// Explicit host address; takes precedence over `interface`
    #[serde(default)]
    pub address: Option<String>,

    /// Daemon port; 0 lets the daemon pick one and report it back
    pub port: u16,

    /// Interconnect protocol tag embedded in every peer URL
    pub protocol: Protocol,

    /// Upper bound on a single RPC, bulk round trips included
    #[serde(with = "duration_serde")]
    pub call_timeout: Duration,

    /// Always spawn a daemon instead of attaching to one already listening
    pub force_spawn_server: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            interface: None,
            address: None,
            port: DEFAULT_PORT,
            protocol: Protocol::Tcp,
            call_timeout: timeout::DEFAULT_TIMEOUT,
            force_spawn_server: false,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(ref interface) = self.interface {
            if interface.is_empty() {
                errors.push("Interface name cannot be empty".to_string());
            }
        }

        if let Some(ref address) = self.address {
            if address.is_empty() {
                errors.push("Client address cannot be empty".to_string());
            } else if address.contains("://") || address.contains('/') {
                errors.push(format!(
                    "Invalid client address: '{address}' (expected a bare host such as '10.0.0.5')"
                ));
            }
        }

        if !self.protocol.is_stream_based() {
            errors.push(format!(
                "Protocol '{}' has no bulk transport backend in this build",
                self.protocol
            ));
        }

        if self.call_timeout.as_millis() < 10 {
            errors.push("Call timeout too short (minimum: 10ms)".to_string());
        } else if self.call_timeout.as_secs() > 3600 {
            errors.push("Call timeout too long (maximum: 1 hour)".to_string());
        }

        errors
    }
}

/// Daemon process configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Daemon executable; defaults to `dimd` next to the current executable
    #[serde(default)]
    pub program: Option<PathBuf>,

    /// How long to wait for a daemon to report readiness (or answer a probe)
    #[serde(with = "duration_serde")]
    pub spawn_timeout: Duration,

    /// How long to probe an already-running daemon before spawning one
    #[serde(with = "duration_serde")]
    pub attach_timeout: Duration,

    /// How long to wait for a stopped daemon to exit before killing it
    #[serde(with = "duration_serde")]
    pub kill_timeout: Duration,

    /// How long a finalizing daemon waits for open connections to drain
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Maximum number of concurrent client connections per daemon
    pub max_connections: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            program: None,
            spawn_timeout: timeout::SPAWN_TIMEOUT,
            attach_timeout: timeout::ATTACH_TIMEOUT,
            kill_timeout: timeout::KILL_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_connections: 1024,
        }
    }
}

impl DaemonConfig {
    /// Daemon executable to spawn
    pub fn program_path(&self) -> Result<PathBuf> {
        if let Some(ref program) = self.program {
            return Ok(program.clone());
        }
        let exe = std::env::current_exe()?;
        let dir = exe.parent().ok_or_else(|| {
            DimError::ConfigError("Cannot locate directory of current executable".to_string())
        })?;
        Ok(dir.join(format!("dimd{}", std::env::consts::EXE_SUFFIX)))
    }

    /// Validate daemon configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(ref program) = self.program {
            if program.as_os_str().is_empty() {
                errors.push("Daemon program path cannot be empty".to_string());
            }
        }

        if self.spawn_timeout.as_millis() < 10 {
            errors.push("Spawn timeout too short (minimum: 10ms)".to_string());
        } else if self.spawn_timeout.as_secs() > 300 {
            errors.push("Spawn timeout too long (maximum: 300s)".to_string());
        }

        if self.attach_timeout.as_secs() > 60 {
            errors.push("Attach timeout too long (maximum: 60s)".to_string());
        }

        if self.kill_timeout.as_secs() > 60 {
            errors.push("Kill timeout too long (maximum: 60s)".to_string());
        }

        if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        errors
    }
}

/// Bulk transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Bytes moved per bulk pull/push round trip
    pub bulk_chunk_size: usize,

    /// Largest object the daemon will allocate for a `set`
    pub max_object_size: u64,

    /// Deadline on each bulk round trip the daemon starts
    #[serde(with = "duration_serde")]
    pub bulk_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bulk_chunk_size: DEFAULT_BULK_CHUNK_SIZE,
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            bulk_timeout: timeout::DEFAULT_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bulk_chunk_size == 0 {
            errors.push("Bulk chunk size cannot be 0".to_string());
        } else if self.bulk_chunk_size > MAX_PAYLOAD_SIZE / 2 {
            errors.push(format!(
                "Bulk chunk size too large: {} bytes (maximum: {} bytes)",
                self.bulk_chunk_size,
                MAX_PAYLOAD_SIZE / 2
            ));
        }

        if self.max_object_size == 0 {
            errors.push("Max object size cannot be 0".to_string());
        }

        if self.bulk_timeout.as_millis() < 10 {
            errors.push("Bulk timeout too short (minimum: 10ms)".to_string());
        } else if self.bulk_timeout.as_secs() > 3600 {
            errors.push("Bulk timeout too long (maximum: 1 hour)".to_string());
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

    /// Whether to log to console (stderr)
    pub log_to_console: bool,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("dim-transport"),
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
