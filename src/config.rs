// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Load and validate nine-gate configuration.
// Author: Lukas Bower

//! Gateway configuration.
//!
//! Every key is optional; missing keys take the defaults below and unknown
//! keys are rejected.
//!
//! ```toml
//! [server]
//! net = "tcp"
//! listen = "127.0.0.1:5640"
//! msize = 8192
//! workers = 8
//! owner = "nine-gate"
//!
//! [storage]
//! user = "user@example.com"
//! block_size = 65536
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use gate9p_codec::{MAX_MSIZE, MIN_MSIZE};
use serde::Deserialize;
use thiserror::Error;

use crate::server::DEFAULT_OWNER;
use crate::storage::memory::DEFAULT_BLOCK_SIZE;

/// Environment variable overriding `server.listen`.
pub const LISTEN_ENV: &str = "NINEGATE_LISTEN";

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:5640";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading {path}: {source}")]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid configuration TOML.
    #[error("parsing configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Listener network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Net {
    /// TCP socket; `listen` is `host:port`.
    #[default]
    Tcp,
    /// Unix-domain socket; `listen` is a filesystem path.
    Unix,
}

impl FromStr for Net {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "tcp" => Ok(Net::Tcp),
            "unix" => Ok(Net::Unix),
            other => Err(ConfigError::Invalid(format!("unknown net {other:?}"))),
        }
    }
}

impl fmt::Display for Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Net::Tcp => f.write_str("tcp"),
            Net::Unix => f.write_str("unix"),
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    /// Listener network.
    pub net: Net,
    /// Listen address or socket path.
    pub listen: String,
    /// Upper bound for message size negotiation.
    pub msize: u32,
    /// Request handler threads.
    pub workers: usize,
    /// Owner reported for the root directory.
    pub owner: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            net: Net::Tcp,
            listen: DEFAULT_LISTEN.to_owned(),
            msize: MAX_MSIZE,
            workers: 8,
            owner: DEFAULT_OWNER.to_owned(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StorageConfig {
    /// Account listed at the root from startup.
    pub user: String,
    /// Block size of the in-process backend.
    pub block_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            user: "user@example.com".to_owned(),
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GateConfig {
    /// Listener and protocol settings.
    pub server: ServerConfig,
    /// Storage backend settings.
    pub storage: StorageConfig,
}

impl GateConfig {
    /// Parse configuration text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: GateConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(listen) = std::env::var(LISTEN_ENV) {
            if !listen.is_empty() {
                self.server.listen = listen;
            }
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.msize < MIN_MSIZE {
            return Err(ConfigError::Invalid(format!(
                "server.msize {} below minimum {}",
                self.server.msize, MIN_MSIZE
            )));
        }
        if self.server.workers == 0 {
            return Err(ConfigError::Invalid(
                "server.workers must be at least 1".to_owned(),
            ));
        }
        if self.storage.block_size == 0 {
            return Err(ConfigError::Invalid(
                "storage.block_size must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_defaults() {
        let config = GateConfig::from_toml_str("").expect("defaults");
        assert_eq!(config, GateConfig::default());
        assert_eq!(config.server.listen, DEFAULT_LISTEN);
        assert_eq!(config.server.msize, 8192);
        assert_eq!(config.storage.block_size, 65536);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = GateConfig::from_toml_str("[server]\nnet = \"unix\"\nworkers = 2\n")
            .expect("parse");
        assert_eq!(config.server.net, Net::Unix);
        assert_eq!(config.server.workers, 2);
        assert_eq!(config.server.owner, "nine-gate");
        assert_eq!(config.storage.user, "user@example.com");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = GateConfig::from_toml_str("[server]\nport = 564\n").expect_err("unknown key");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn small_msize_is_rejected() {
        let err = GateConfig::from_toml_str("[server]\nmsize = 128\n").expect_err("too small");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_workers_are_rejected() {
        let err = GateConfig::from_toml_str("[server]\nworkers = 0\n").expect_err("no workers");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn net_parses_from_flags() {
        assert_eq!("tcp".parse::<Net>().expect("tcp"), Net::Tcp);
        assert_eq!("unix".parse::<Net>().expect("unix"), Net::Unix);
        assert!("udp".parse::<Net>().is_err());
        assert_eq!(Net::Unix.to_string(), "unix");
    }
}
