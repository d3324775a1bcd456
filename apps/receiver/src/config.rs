//! Receiver configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/ferry/receiver.toml`
//! - Windows: `%APPDATA%/ferry/receiver.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory uploads are written into.
    #[serde(default = "default_dest_dir")]
    pub dest_dir: PathBuf,
}

fn default_port() -> u16 {
    3000
}

fn default_dest_dir() -> PathBuf {
    PathBuf::from("./received")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            dest_dir: default_dest_dir(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    let base = PathBuf::from(
        std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into()),
    );

    #[cfg(not(target_os = "windows"))]
    let base = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".into())).join(".config");

    base.join("ferry").join("receiver.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.dest_dir, PathBuf::from("./received"));
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: Config = toml::from_str("port = 9000").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.dest_dir, PathBuf::from("./received"));
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ferry").join("receiver.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("port = 3000"));
    }

    #[test]
    fn config_path_is_under_ferry() {
        assert!(config_path().ends_with("ferry/receiver.toml"));
    }
}
