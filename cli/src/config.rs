// Configuration location for the apn CLI
//
// Stored in:
// - Linux: ~/.config/apn/config.json
// - macOS: ~/Library/Application Support/apn/config.json
// - Windows: %APPDATA%\apn\config.json

use anyhow::{Context, Result};
use apn_core::PushConfig;
use std::path::{Path, PathBuf};

/// Default config file path (cross-platform)
pub fn default_config_file() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .context("Failed to determine config directory")?
        .join("apn");
    Ok(dir.join("config.json"))
}

/// Resolve an explicit `--config` path or fall back to the default
pub fn resolve(path: Option<&Path>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_file(),
    }
}

/// Load the config at `path`; a missing file means defaults
pub fn load(path: &Path) -> Result<PushConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(PushConfig::default());
    }
    PushConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))
}

/// Write the default config, refusing to clobber an existing file unless forced
pub fn init(path: &Path, force: bool) -> Result<PushConfig> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file {} already exists (use --force to overwrite)",
            path.display()
        );
    }
    let config = PushConfig::default();
    config
        .save(path)
        .with_context(|| format!("Failed to write config {}", path.display()))?;
    Ok(config)
}
