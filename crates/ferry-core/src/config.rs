//! Configuration system for Ferry.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FERRY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ferry/config.toml
//!   3. ~/.config/ferry/config.toml

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::{FrameLimits, DEFAULT_CHUNK_BYTES, DEFAULT_MAX_FILE_BYTES, DEFAULT_MAX_LINE_BYTES};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    pub network: NetworkConfig,
    pub limits: LimitsConfig,
    pub timeouts: TimeoutsConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the server listens on and the client connects to.
    pub bind_addr: IpAddr,
    /// TCP port. 0 = take it from the command line, or OS-assigned.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrently registered sessions.
    pub max_clients: usize,
    /// Longest accepted line, newline excluded.
    pub max_line_bytes: usize,
    /// Largest file size a header may declare.
    pub max_file_bytes: u64,
    /// Payload slice size when relaying file bytes.
    pub chunk_bytes: usize,
    /// Per-session outbound queue depth, in items.
    pub outbound_queue: usize,
    /// Chunks buffered between a sender and a recipient's writer.
    pub transfer_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Time a new connection has to send its name block.
    pub name_secs: u64,
    /// Bound on every socket write and queue wait during relay.
    pub write_secs: u64,
    /// Bound on each read while a file payload is in flight.
    pub transfer_idle_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Where received files are written.
    pub download_dir: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_clients: 100,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            outbound_queue: 256,
            transfer_buffer: 32,
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            name_secs: 30,
            write_secs: 10,
            transfer_idle_secs: 60,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            download_dir: data_dir().join("downloads"),
        }
    }
}

// ── Derived settings ──────────────────────────────────────────────────────────

impl LimitsConfig {
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_line_bytes: self.max_line_bytes,
            max_file_bytes: self.max_file_bytes,
            chunk_bytes: self.chunk_bytes.max(1),
        }
    }
}

impl TimeoutsConfig {
    pub fn name_timeout(&self) -> Duration {
        Duration::from_secs(self.name_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }

    pub fn transfer_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_idle_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("ferry")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("ferry")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl FerryConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides_with(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read one config file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(FerryConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FERRY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(&FerryConfig::default())
            .map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply FERRY_* overrides, reading variables through `lookup`.
    /// Unparsable values are ignored.
    pub fn apply_env_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FERRY_NETWORK__BIND_ADDR") {
            if let Ok(addr) = v.parse() {
                self.network.bind_addr = addr;
            }
        }
        if let Some(v) = lookup("FERRY_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Some(v) = lookup("FERRY_LIMITS__MAX_CLIENTS") {
            if let Ok(n) = v.parse() {
                self.limits.max_clients = n;
            }
        }
        if let Some(v) = lookup("FERRY_LIMITS__MAX_FILE_BYTES") {
            if let Ok(n) = v.parse() {
                self.limits.max_file_bytes = n;
            }
        }
        if let Some(v) = lookup("FERRY_CLIENT__DOWNLOAD_DIR") {
            self.client.download_dir = PathBuf::from(v);
        }
    }
}
