use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::core::{Result, UploadError, UploadOptions};
use crate::utils::{RetryStrategy, DEFAULT_CHUNK_SIZE};

pub const DEFAULT_CONFIG_FILE: &str = "uploader.toml";

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Upload manager settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// JSON file backing the pending event store. In-memory when unset.
    pub store_path: Option<PathBuf>,
    /// Directory for staged multipart bodies. OS temp dir when unset.
    pub staging_dir: Option<PathBuf>,
    pub retry: RetryStrategy,
    /// Read/stream chunk size in bytes
    pub chunk_size: usize,
    pub request_timeout_secs: Option<u64>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            staging_dir: None,
            retry: RetryStrategy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_timeout_secs: None,
        }
    }
}

impl ManagerConfig {
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Upload job for the command line binary
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadJob {
    pub endpoint: String,
    pub file_path: String,
    #[serde(default)]
    pub options: UploadOptions,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub manager: ManagerConfig,
    pub upload: Option<UploadJob>,
}

impl Config {
    pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .map_err(|err| UploadError::Config(format!("{}: {}", path.display(), err)))?;
        Config::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<Config> {
        toml::from_str(config_str).map_err(|err| UploadError::Config(err.to_string()))
    }
}

/// Loads the config file once per process.
pub fn init_config(path: impl AsRef<Path>) -> Result<&'static Config> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }
    let config = Config::load_config(path)?;
    Ok(CONFIG.get_or_init(|| config))
}

pub fn get_config() -> Result<Config> {
    init_config(DEFAULT_CONFIG_FILE).cloned()
}
