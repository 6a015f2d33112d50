//! Configuration system for Strata.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $STRATA_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/strata/config.toml
//!   3. ~/.config/strata/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::{DEFAULT_MAX_OPERATION_SIZE, DEFAULT_POOL_SIZE, DEFAULT_STRIPE_SIZE};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub client: ClientConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Present => object operations naming a local path are served without
    /// a round trip, bypassing `object_servers` entirely.
    pub object_backend: Option<BackendSpec>,
    /// Present => KV operations are served locally.
    pub kv_backend: Option<BackendSpec>,
    /// Object server hostnames; index into this list is the routing target.
    pub object_servers: Vec<String>,
    pub kv_servers: Vec<String>,
    /// Per-op payloads larger than this are split across multiple messages.
    pub max_operation_size: u64,
    /// Bound connections held per `(backend_kind, server_index)`.
    pub connection_pool_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Reusable scratch region size for the per-connection worker loop.
    pub stripe_size: u64,
    pub object_backend: BackendSpec,
    pub kv_backend: BackendSpec,
}

/// Names a backend implementation and, where relevant, its storage root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendSpec {
    pub name: String,
    pub path: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            object_backend: None,
            kv_backend: None,
            object_servers: Vec::new(),
            kv_servers: Vec::new(),
            max_operation_size: DEFAULT_MAX_OPERATION_SIZE,
            connection_pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9123".to_string(),
            stripe_size: DEFAULT_STRIPE_SIZE,
            object_backend: BackendSpec {
                name: "posix".to_string(),
                path: data_dir().join("objects"),
            },
            kv_backend: BackendSpec {
                name: "sqlite".to_string(),
                path: data_dir().join("kv.sqlite"),
            },
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("strata")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local").join("share"))
        .join("strata")
}

fn home_dir() -> PathBuf {
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

impl StrataConfig {
    /// Load config: file → env var overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            StrataConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("STRATA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&StrataConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("STRATA_SERVER__BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Ok(v) = std::env::var("STRATA_SERVER__STRIPE_SIZE") {
            if let Ok(n) = v.parse() {
                self.server.stripe_size = n;
            }
        }
        if let Ok(v) = std::env::var("STRATA_CLIENT__MAX_OPERATION_SIZE") {
            if let Ok(n) = v.parse() {
                self.client.max_operation_size = n;
            }
        }
        if let Ok(v) = std::env::var("STRATA_CLIENT__CONNECTION_POOL_SIZE") {
            if let Ok(n) = v.parse() {
                self.client.connection_pool_size = n;
            }
        }
        if let Ok(v) = std::env::var("STRATA_CLIENT__OBJECT_SERVERS") {
            self.client.object_servers = v.split(',').map(str::to_string).collect();
        }
        if let Ok(v) = std::env::var("STRATA_CLIENT__KV_SERVERS") {
            self.client.kv_servers = v.split(',').map(str::to_string).collect();
        }
    }
}
