use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::storage::StoreConfig;

const APP_NAME: &str = "forge";

/// Tool configuration, `~/.config/forge/config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Build history database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Executable used for configure and build steps
    #[serde(default = "default_cmake_command")]
    pub cmake_command: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Forward the tool's output to the console
    #[serde(default = "default_echo_output")]
    pub echo_output: bool,
    /// Drop repeated diagnostics within one build
    #[serde(default)]
    pub deduplicate_diagnostics: bool,
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_database_path() -> PathBuf {
    data_dir().join("forge.db")
}

fn default_cmake_command() -> String {
    "cmake".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_echo_output() -> bool {
    true
}

/// Platform data directory, also home of the log file
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            cmake_command: default_cmake_command(),
            log_level: default_log_level(),
            echo_output: default_echo_output(),
            deduplicate_diagnostics: false,
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Load the config file, writing the defaults on first run
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            if let Err(e) = config.save() {
                tracing::warn!("Failed to save default config: {}", e);
            }
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn config_path() -> Result<PathBuf> {
        let base_dirs = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))?;
        Ok(base_dirs.home_dir().join(".config").join(APP_NAME).join("config.toml"))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "cmake_command = \"/opt/cmake/bin/cmake\"\ndeduplicate_diagnostics = true\n\n[store]\nmax_retries = 5\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.cmake_command, "/opt/cmake/bin/cmake");
        assert!(config.deduplicate_diagnostics);
        assert!(config.echo_output);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.store.max_retries, 5);
        assert_eq!(config.store.busy_timeout_ms, 5000);
        assert_eq!(config.store.retry_base_delay_ms, 50);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            database_path: dir.path().join("history.db"),
            echo_output: false,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "echo_output = \"maybe\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
