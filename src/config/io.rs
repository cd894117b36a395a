use std::collections::HashMap;
use std::env::current_exe;
use std::path::{Path, PathBuf};
use directories_next::ProjectDirs;
use log::{info, warn};
use serde_json;

use crate::config::types::{Config, OVERLAY_KEYS};
use crate::error::ConfigError;

pub const ENV_FILE_NAME: &str = ".env";
pub const OVERLAY_FILE_NAME: &str = "pothole-tracker.json";

// creates a path to <exe>.env in the same directory as the executable
fn get_portable_env_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // /opt/pothole-tracker => /opt/pothole-tracker.env
            if !path.set_extension("env") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to .env in an os dependent standard directory, such as ~/.config on linux
fn get_local_env_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "pothole", "pothole-tracker").map(|dirs| {
        dirs.config_dir().join(ENV_FILE_NAME)
    })
}

/// Picks the env file: an explicit path wins, then a portable file beside the executable,
/// then the per-user config directory.
pub fn get_env_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = get_portable_env_path() {
        if path.is_file() {
            return Ok(path);
        }
    }

    match get_local_env_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

pub fn overlay_path_for(env_path: &Path) -> PathBuf {
    match env_path.parent() {
        Some(directory) => directory.join(OVERLAY_FILE_NAME),
        None => PathBuf::from(OVERLAY_FILE_NAME),
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(source) => {
            let err = ConfigError::IOError { path: path.to_path_buf(), source };
            if err.is_file_not_found_error() {
                Ok(None)
            } else {
                Err(err)
            }
        },
    }
}

/// Applies the string entries of a JSON object for the keys the overlay may set.
pub fn apply_overlay(config: &mut Config, content: &str) -> Result<(), ConfigError> {
    let overlay: HashMap<String, serde_json::Value> = serde_json::from_str(content)?;

    for key in OVERLAY_KEYS {
        if let Some(serde_json::Value::String(value)) = overlay.get(key) {
            config.set(key, value);
        }
    }

    Ok(())
}

/// Reads the env file and its JSON overlay. Missing files leave the defaults in place.
pub async fn load_config(env_path: &Path) -> Result<Config, ConfigError> {
    let mut config = Config::new();

    match read_optional(env_path).await? {
        Some(content) => {
            info!("Using env file {}", env_path.to_string_lossy());
            config.merge_env(&content);
        },
        None => info!("Env file {} not found, using defaults", env_path.to_string_lossy()),
    }

    let overlay_path = overlay_path_for(env_path);
    if let Some(content) = read_optional(&overlay_path).await? {
        info!("Applying overlay {}", overlay_path.to_string_lossy());
        apply_overlay(&mut config, &content)?;
    }

    Ok(config)
}
