//! Configuration types for grove.
//!
//! [`GroveConfig`] is the user-level configuration stored in
//! `~/.grove/config.yaml`. Every section has defaults, so a missing file is
//! not an error.
//!
//! # Example YAML
//!
//! ```yaml
//! store:
//!   backend: file
//!   path: /home/me/notes/.grove
//! ingest:
//!   batch_size: 200
//!   parallel_parse: true
//! rpc:
//!   port: 7878
//!   request_timeout_ms: 30000
//!   handshake: true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use grove_db::StoreConfig;

use crate::errors::GroveError;

// ============================================================================
// Defaults
// ============================================================================

/// Default number of files committed per ingestion chunk.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default loopback port of the sidecar.
pub const DEFAULT_RPC_PORT: u16 = 7878;

/// Default per-request timeout for remote calls.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV_VAR: &str = "GROVE_CONFIG";

/// Directory under the home directory holding grove's files.
pub const GROVE_HOME_DIR: &str = ".grove";

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_RPC_PORT
}

fn default_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

// ============================================================================
// Sections
// ============================================================================

/// Batch ingestion tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Files per committed chunk.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Parse files on the rayon pool.
    #[serde(default = "default_true")]
    pub parallel_parse: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            parallel_parse: true,
        }
    }
}

/// Protocol settings shared by the sidecar and its clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Loopback port the sidecar binds.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Send a version handshake after connecting.
    #[serde(default = "default_true")]
    pub handshake: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_RPC_PORT,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            handshake: true,
        }
    }
}

impl RpcConfig {
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }
}

// ============================================================================
// GroveConfig
// ============================================================================

/// User-level configuration for grove.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroveConfig {
    /// Storage backend selection.
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub rpc: RpcConfig,
}

impl GroveConfig {
    /// Default config file location (`~/.grove/config.yaml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(GROVE_HOME_DIR).join("config.yaml"))
    }

    /// Load from `GROVE_CONFIG` if set, else from the default location.
    ///
    /// If no file exists, returns defaults.
    ///
    /// # Errors
    ///
    /// Returns [`GroveError::InvalidConfig`] if the file exists but cannot be
    /// read or parsed, and [`GroveError::InvalidConfiguration`] if validation
    /// fails.
    pub fn load_default() -> Result<Self, GroveError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Self::from_path(Path::new(&path));
        }
        match Self::default_path() {
            Some(path) => Self::from_path(&path),
            None => {
                tracing::debug!("Could not determine home directory, using default config");
                Ok(Self::default())
            }
        }
    }

    /// Load from a specific path, falling back to defaults if it is missing.
    pub fn from_path(path: &Path) -> Result<Self, GroveError> {
        if !path.exists() {
            tracing::debug!("Config not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| GroveError::InvalidConfig {
            path: path.display().to_string(),
            message: format!("failed to read: {}", e),
        })?;
        let config = Self::from_yaml(&content).map_err(|e| match e {
            GroveError::InvalidConfig { message, .. } => GroveError::InvalidConfig {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, GroveError> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| GroveError::InvalidConfig {
                path: "<inline>".to_string(),
                message: format!("failed to parse: {}", e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), GroveError> {
        if self.ingest.batch_size == 0 {
            return Err(GroveError::InvalidConfiguration {
                message: "ingest.batch_size must be greater than 0".to_string(),
                hint: "Set ingest.batch_size to a positive number such as 100".to_string(),
            });
        }
        if self.rpc.request_timeout_ms == 0 {
            return Err(GroveError::InvalidConfiguration {
                message: "rpc.request_timeout_ms must be greater than 0".to_string(),
                hint: "Set rpc.request_timeout_ms to a positive number such as 30000"
                    .to_string(),
            });
        }
        if self.store.backend == grove_db::StoreBackendKind::File && self.store.path.is_none() {
            return Err(GroveError::InvalidConfiguration {
                message: "store.path is required for the file backend".to_string(),
                hint: "Set store.path or pass --store".to_string(),
            });
        }
        Ok(())
    }
}
