//! Where the data file lives.
//!
//! Lookup order:
//!
//! 1. An explicit path (the shell's `--data-file`)
//! 2. The `SDALOCAL_DATA_FILE` environment variable
//! 3. `<platform data dir>/sdaLocal/sdalocal_data.json`

use std::env;
use std::path::PathBuf;

use thiserror::Error;

pub const APP_DIR_NAME: &str = "sdaLocal";
pub const DATA_FILE_NAME: &str = "sdalocal_data.json";
pub const DATA_FILE_ENV: &str = "SDALOCAL_DATA_FILE";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Home directory not set")]
    NoHome,
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

/// Return the user's home directory path.
///
/// Uses HOME on Unix-like systems and USERPROFILE on Windows.
pub fn get_home_dir() -> Result<PathBuf, PathError> {
    non_empty_var("HOME")
        .or_else(|| non_empty_var("USERPROFILE"))
        .map(PathBuf::from)
        .ok_or(PathError::NoHome)
}

/// Per-user application data directory for sdaLocal.
///
/// - Windows: `%APPDATA%\sdaLocal`
/// - macOS: `~/Library/Application Support/sdaLocal`
/// - elsewhere: `$XDG_DATA_HOME/sdaLocal` or `~/.local/share/sdaLocal`
pub fn default_data_dir() -> Result<PathBuf, PathError> {
    let base = if cfg!(windows) {
        match non_empty_var("APPDATA") {
            Some(appdata) => PathBuf::from(appdata),
            None => get_home_dir()?,
        }
    } else if cfg!(target_os = "macos") {
        get_home_dir()?.join("Library").join("Application Support")
    } else {
        match non_empty_var("XDG_DATA_HOME") {
            Some(xdg) => PathBuf::from(xdg),
            None => get_home_dir()?.join(".local").join("share"),
        }
    };
    Ok(base.join(APP_DIR_NAME))
}

/// Resolve the data file path, honoring the explicit path and the env override.
pub fn resolve_data_file(explicit: Option<PathBuf>) -> Result<PathBuf, PathError> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Some(path) = non_empty_var(DATA_FILE_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(default_data_dir()?.join(DATA_FILE_NAME))
}
