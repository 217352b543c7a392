use std::path::PathBuf;
use tracing::{debug, warn};

use crate::types::UpdaterError;

use super::Config;

impl Config {
    /// Get the root directory of the application
    pub fn app_root_dir() -> Result<PathBuf, UpdaterError> {
        let config_path = get_config_path()?;
        match config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
            Some(_) => std::env::current_dir().map_err(|err| {
                UpdaterError::Config(format!("Failed to determine app root: {err}"))
            }),
            None => Err(UpdaterError::Config(
                "Unable to determine app root directory".to_string(),
            )),
        }
    }

    /// Directory downloaded artifacts are written to
    pub fn downloads_path(&self) -> Result<PathBuf, UpdaterError> {
        match self.downloads_dir_override() {
            Some(dir) => Ok(dir),
            None => Ok(Self::app_root_dir()?.join("downloads")),
        }
    }
}

/// Get the path to the config.json file
/// Looks for config.json in the app directory (parent of the binary's folder)
pub(super) fn get_config_path() -> Result<PathBuf, UpdaterError> {
    // Executable is at: app_root/bin/whats-updater
    // Config should be at: app_root/config.json
    if let Ok(exe_path) = std::env::current_exe() {
        debug!(path = %exe_path.display(), "Executable path detected");

        if let Some(bin_dir) = exe_path.parent() {
            if let Some(app_root) = bin_dir.parent() {
                let config_path = app_root.join("config.json");
                debug!(path = %config_path.display(), "Looking for config");
                return Ok(config_path);
            }
        }
    }

    warn!("Using fallback: looking for config.json in current directory");
    Ok(PathBuf::from("config.json"))
}
