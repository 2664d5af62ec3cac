//! Configuration module
//!
//! Station settings stored as TOML in the platform configuration directory

mod settings;

pub use settings::{ConfigError, StationConfig};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "rtkbase", "rtkbase").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "rtkbase", "rtkbase").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Default location of the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}

/// Get the default capture directory
pub fn capture_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("captures"))
}
