//! Uploader configuration.
//!
//! Stored as TOML at `~/.config/ferry/uploader.toml` (`%APPDATA%` on Windows).

use std::path::{Path, PathBuf};

use ferry_connection::ConnectionConfig;
use ferry_transfer::CHUNK_SIZE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Receiver endpoint.
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_ping_period_secs")]
    pub ping_period_secs: u64,

    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,
}

fn default_url() -> String {
    ConnectionConfig::default().url
}

fn default_ping_period_secs() -> u64 {
    ConnectionConfig::default().ping_period_secs
}

fn default_pong_wait_secs() -> u64 {
    ConnectionConfig::default().pong_wait_secs
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: default_url(),
            ping_period_secs: default_ping_period_secs(),
            pong_wait_secs: default_pong_wait_secs(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), url = %config.url, "configuration loaded");
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.url.clone(),
            ping_period_secs: self.ping_period_secs,
            pong_wait_secs: self.pong_wait_secs,
            ..ConnectionConfig::default()
        }
    }
}

/// Number of chunk frames a file of `size` bytes is sent in.
pub fn chunk_count(size: u64) -> u64 {
    size.div_ceil(CHUNK_SIZE as u64)
}

fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    let base = PathBuf::from(
        std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into()),
    );

    #[cfg(not(target_os = "windows"))]
    let base = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".into())).join(".config");

    base.join("ferry").join("uploader.toml")
}
