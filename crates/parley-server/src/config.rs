//! Server configuration and loading.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working in-memory server on `0.0.0.0:6666`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::engine::EngineConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// File is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_address: String,
    /// Admit unauthenticated clients as guests.
    pub allow_guests: bool,
    /// Ban score at which a connection is closed.
    pub ban_threshold: u32,
    /// Frames queued per session before sends start failing.
    pub outbound_buffer: usize,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_frame_bytes: usize,
    /// Identity store backend.
    pub storage: StorageConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:6666".to_string(),
            allow_guests: true,
            ban_threshold: 1,
            outbound_buffer: 64,
            max_frame_bytes: 64 * 1024,
            storage: StorageConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Engine policy slice of this configuration.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig { allow_guests: self.allow_guests, ban_threshold: self.ban_threshold }
    }
}

/// Identity store backend selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Process-local, lost on exit.
    #[default]
    Memory,
    /// File-backed redb database.
    Redb {
        /// Database file path.
        path: PathBuf,
    },
}
