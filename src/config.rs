use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{DEFAULT_MAX_CLIP_SECONDS, DEFAULT_MIN_CLIP_SECONDS};
use crate::error::{DispatchError, Result};

fn default_database_path() -> PathBuf {
    PathBuf::from("transcribe_dispatch.sqlite")
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_min_clip_seconds() -> u32 {
    DEFAULT_MIN_CLIP_SECONDS
}

fn default_max_clip_seconds() -> u32 {
    DEFAULT_MAX_CLIP_SECONDS
}

fn default_chunker_timeout_secs() -> u64 {
    300
}

fn default_sftp_port() -> u16 {
    22
}

/// Where clip and original audio bytes are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Files under `local_dir`
    Local,
    /// Files uploaded to the `[sftp]` server
    Sftp,
}

/// Top-level configuration file structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// SQLite database file (default: transcribe_dispatch.sqlite)
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Deadline applied to every store request, in seconds (default: 30)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// VAD chunking service (maps to [chunker] section in TOML)
    pub chunker: ChunkerConfig,
    /// Blob storage (maps to [storage] section in TOML)
    pub storage: StorageConfig,
    /// SFTP server, required when `storage.backend = "sftp"`
    pub sftp: Option<SftpStorageConfig>,
}

/// VAD chunking service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkerConfig {
    /// Base URL of the service (e.g., http://vad:8000)
    pub url: String,
    #[serde(default = "default_min_clip_seconds")]
    pub min_clip_seconds: u32,
    #[serde(default = "default_max_clip_seconds")]
    pub max_clip_seconds: u32,
    /// HTTP timeout for one chunker call, in seconds (default: 300)
    #[serde(default = "default_chunker_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Public URL prefix locators are built from (e.g., https://cdn.example.com/audio)
    pub base_url: String,
    /// Directory for the local backend
    pub local_dir: Option<PathBuf>,
}

/// SFTP storage configuration (maps to [sftp] section in TOML)
#[derive(Debug, Clone, Deserialize)]
pub struct SftpStorageConfig {
    /// SFTP server hostname or IP address
    pub host: String,
    /// SFTP server port (default: 22)
    #[serde(default = "default_sftp_port")]
    pub port: u16,
    /// SFTP username for authentication
    pub username: String,
    /// Credential profile name to look up password from ~/.config/transcribe_dispatch/credentials.toml
    pub credential_profile: String,
    /// Remote directory path where files will be uploaded (e.g., /uploads/audio)
    pub remote_dir: String,
}

impl Config {
    /// Read, parse and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DispatchError::Config {
            message: format!("failed to read '{}': {}", path.display(), e),
        })?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks serde cannot express
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| -> Result<()> {
            Err(DispatchError::Config {
                message: message.to_string(),
            })
        };

        if self.chunker.min_clip_seconds >= self.chunker.max_clip_seconds {
            return invalid("chunker.min_clip_seconds must be less than chunker.max_clip_seconds");
        }
        if self.request_timeout_secs == 0 {
            return invalid("request_timeout_secs must be greater than 0");
        }
        if url::Url::parse(&self.chunker.url).is_err() {
            return invalid("chunker.url is not a valid URL");
        }

        match self.storage.backend {
            StorageBackend::Local => {
                if self.storage.local_dir.is_none() {
                    return invalid("storage.backend is 'local' but storage.local_dir is missing");
                }
            }
            StorageBackend::Sftp => {
                if self.sftp.is_none() {
                    return invalid("storage.backend is 'sftp' but [sftp] section is missing in config");
                }
            }
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
