use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

const APP_DIR: &str = "castkeeper";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Every downloaded artifact lives beneath this directory.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Upper bound for a whole request, body included.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: u32,

    #[serde(default = "default_feed_fetch_concurrency")]
    pub feed_fetch_concurrency: usize,

    #[serde(default = "default_backup_keep")]
    pub backup_keep: usize,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_db_path() -> String {
    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("castkeeper.db").to_string_lossy().to_string()
}

fn default_storage_root() -> PathBuf {
    dirs::audio_dir()
        .unwrap_or_else(data_dir)
        .join("Podcasts")
}

fn default_backup_dir() -> PathBuf {
    data_dir().join("backups")
}

fn default_user_agent() -> String {
    format!("castkeeper/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_refresh_interval() -> u32 {
    30
}

fn default_feed_fetch_concurrency() -> usize {
    5
}

fn default_backup_keep() -> usize {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            storage_root: default_storage_root(),
            backup_dir: default_backup_dir(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            refresh_interval_minutes: default_refresh_interval(),
            feed_fetch_concurrency: default_feed_fetch_concurrency(),
            backup_keep: default_backup_keep(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Reads the config at `path`, writing the defaults there first if it does not exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }
}
