//! Configuration management
//!
//! Settings live in a TOML file at `$GCSIO_CONFIG_DIR/config.toml`, falling
//! back to the platform config directory (`~/.config/gcsio/config.toml` on
//! Linux). A missing file means defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "GCSIO_CONFIG_DIR";

/// Default size of each ranged read, 16 MiB
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Default resumable upload chunk size, 8 MiB
pub const DEFAULT_WRITE_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Resumable upload chunks must be a multiple of this size
pub const UPLOAD_CHUNK_ALIGNMENT: usize = 256 * 1024;

/// Maximum number of sub-requests in one batched call
pub const MAX_BATCH_OPERATION_SIZE: usize = 100;

/// Default buffer in front of an upload, 128 KiB
pub const DEFAULT_WRITER_BUFFER_SIZE: usize = 128 * 1024;

/// Default number of writes queued between caller and upload task
pub const DEFAULT_UPLOAD_QUEUE_DEPTH: usize = 16;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Stop retrying once this much time has passed since the first attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_elapsed_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            max_elapsed_ms: Some(10 * 60 * 1000),
        }
    }
}

/// Transfer tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub read_buffer_size: usize,
    pub write_chunk_size: usize,
    pub upload_queue_depth: usize,
    pub writer_buffer_size: usize,
    pub max_batch_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_chunk_size: DEFAULT_WRITE_CHUNK_SIZE,
            upload_queue_depth: DEFAULT_UPLOAD_QUEUE_DEPTH,
            writer_buffer_size: DEFAULT_WRITER_BUFFER_SIZE,
            max_batch_size: MAX_BATCH_OPERATION_SIZE,
        }
    }
}

/// Remote endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// JSON API root
    pub api_url: String,
    /// Upload API root
    pub upload_url: String,
    /// Sub-requests in flight while executing a batch
    pub batch_concurrency: usize,
    pub user_agent: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_url: "https://storage.googleapis.com/storage/v1".to_string(),
            upload_url: "https://storage.googleapis.com/upload/storage/v1".to_string(),
            batch_concurrency: 16,
            user_agent: concat!("gcsio/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retry: RetryConfig,
    pub transfer: TransferConfig,
    pub endpoint: EndpointConfig,
}

impl Config {
    /// Check invariants the transfer layer relies on
    pub fn validate(&self) -> Result<()> {
        let t = &self.transfer;
        if t.read_buffer_size == 0 || t.writer_buffer_size == 0 || t.upload_queue_depth == 0 {
            return Err(Error::Config(
                "buffer sizes and queue depth must be non-zero".to_string(),
            ));
        }
        if t.write_chunk_size == 0 || t.write_chunk_size % UPLOAD_CHUNK_ALIGNMENT != 0 {
            return Err(Error::Config(format!(
                "write_chunk_size must be a non-zero multiple of {UPLOAD_CHUNK_ALIGNMENT}"
            )));
        }
        if t.max_batch_size == 0 || t.max_batch_size > MAX_BATCH_OPERATION_SIZE {
            return Err(Error::Config(format!(
                "max_batch_size must be between 1 and {MAX_BATCH_OPERATION_SIZE}"
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.endpoint.batch_concurrency == 0 {
            return Err(Error::Config(
                "endpoint.batch_concurrency must be at least 1".to_string(),
            ));
        }
        for url in [&self.endpoint.api_url, &self.endpoint.upload_url] {
            url::Url::parse(url)
                .map_err(|e| Error::Config(format!("invalid endpoint url {url:?}: {e}")))?;
        }
        Ok(())
    }
}

/// Loads and saves the configuration file
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Resolve the config file from the environment or platform defaults
    pub fn new() -> Result<Self> {
        let dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| Error::Config("could not determine config directory".to_string()))?
                .join("gcsio"),
        };
        Ok(Self::with_path(dir.join("config.toml")))
    }

    /// Use an explicit config file path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config, returning defaults when the file does not exist
    pub fn load(&self) -> Result<Config> {
        let content = match std::fs::read_to_string(&self.config_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.config_path.display(), "No config file, using defaults");
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "failed to read {}: {e}",
                    self.config_path.display()
                )));
            }
        };

        let config: Config = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("failed to parse {}: {e}", self.config_path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config, creating the parent directory if needed
    pub fn save(&self, config: &Config) -> Result<()> {
        config.validate()?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("failed to create {}: {e}", parent.display())))?;
        }
        let content = toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(&self.config_path, content).map_err(|e| {
            Error::Config(format!("failed to write {}: {e}", self.config_path.display()))
        })
    }
}
