//! XDG Base Directory paths for drivefs.
//!
//! | Purpose | XDG Variable | Default | drivefs Path |
//! |---------|--------------|---------|--------------|
//! | State DB | `$XDG_DATA_HOME` | `~/.local/share` | `$XDG_DATA_HOME/drivefs/state.db` |
//! | Config | `$XDG_CONFIG_HOME` | `~/.config` | `$XDG_CONFIG_HOME/drivefs/config.toml` |

use std::path::PathBuf;

use directories::BaseDirs;

/// Get the data directory for persistent state.
///
/// Uses `$XDG_DATA_HOME/drivefs` or falls back to `~/.local/share/drivefs`.
pub fn data_dir() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback().join(".local").join("share"))
        .join("drivefs")
}

/// Get the config directory.
///
/// Uses `$XDG_CONFIG_HOME/drivefs` or falls back to `~/.config/drivefs`.
pub fn config_dir() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback().join(".config"))
        .join("drivefs")
}

/// Default config file location.
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

fn home_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
