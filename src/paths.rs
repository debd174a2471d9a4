//! Common paths for Lightbox data storage
//!
//! All Lightbox data is stored under ~/.config/lightbox/ on all platforms:
//! - config.toml - User configuration
//! - reports/ - Error reports written by `report-issue` recovery

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Get the Lightbox data directory (~/.config/lightbox/)
///
/// This is consistent across all platforms for simplicity.
pub fn lightbox_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let lightbox_dir = home.join(".config").join("lightbox");
    fs::create_dir_all(&lightbox_dir).context("Failed to create lightbox directory")?;
    Ok(lightbox_dir)
}

/// Get the config file path (~/.config/lightbox/config.toml)
pub fn config_path() -> Result<PathBuf> {
    Ok(lightbox_dir()?.join("config.toml"))
}

/// Get the error report directory (~/.config/lightbox/reports/)
pub fn reports_dir() -> Result<PathBuf> {
    let dir = lightbox_dir()?.join("reports");
    fs::create_dir_all(&dir).context("Failed to create reports directory")?;
    Ok(dir)
}
