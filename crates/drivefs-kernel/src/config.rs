//! Runtime configuration.
//!
//! Loaded from `config.toml` in the XDG config directory; every field has a
//! default so a missing file is fine.
//!
//! ```toml
//! data_dir = "/var/lib/drivefs"
//! watch_external = true
//! log_filter = "drivefs_kernel=debug"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::FsResult;
use crate::paths;

/// Overrides `data_dir` when set.
pub const DATA_DIR_ENV: &str = "DRIVEFS_DATA_DIR";

/// State database file name inside `data_dir`.
pub const DATABASE_FILE: &str = "state.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Where the state database lives.
    pub data_dir: PathBuf,
    /// Track host-side edits in mounted drives.
    pub watch_external: bool,
    /// `tracing` filter directives used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            data_dir: paths::data_dir(),
            watch_external: true,
            log_filter: None,
        }
    }
}

impl VfsConfig {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> FsResult<Self> {
        let mut config = Self::load_from(&paths::config_file())?;
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
            config.data_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> FsResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(text: &str) -> FsResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Config rooted at `data_dir`, everything else default.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}
