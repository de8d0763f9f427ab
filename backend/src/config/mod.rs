//! Configuration management for Picsum Downloader

mod settings;

pub use settings::*;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("picsum-downloader")
}

/// Get the configuration file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load configuration from file or create default
pub fn load_or_create_default() -> Result<Settings> {
    load_or_create_at(&config_path())
}

/// Load configuration from `path`, writing the defaults there if it does not exist yet
pub fn load_or_create_at(path: &Path) -> Result<Settings> {
    if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(settings)
    } else {
        let settings = Settings::default();
        save_at(&settings, path)?;
        Ok(settings)
    }
}

/// Save configuration to `path`
pub fn save_at(settings: &Settings, path: &Path) -> Result<()> {
    // Ensure config directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(settings)?;
    fs::write(path, content)?;

    Ok(())
}
