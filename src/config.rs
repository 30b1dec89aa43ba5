//! Monitor configuration file.
//!
//! The controller's configuration decides which status module nginx runs.
//! Only the settings relevant to monitoring are read:
//!
//! ```toml
//! enable-vts-status = true
//! ```

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::switcher::StatusMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct MonitorConfig {
    /// Serve nginx-module-vts statistics instead of `stub_status`.
    pub enable_vts_status: bool,
}

impl MonitorConfig {
    pub fn status_mode(&self) -> StatusMode {
        StatusMode::from_vts_enabled(self.enable_vts_status)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }
}

/// Re-reads the config file when its modification time changes.
pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl ConfigWatcher {
    /// Creates a watcher; the first [`ConfigWatcher::poll`] always loads.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_modified: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the config if the file changed since the last load.
    pub fn poll(&mut self) -> Result<Option<MonitorConfig>, ConfigError> {
        let modified = self.modified()?;
        if self.last_modified.is_some() && self.last_modified == modified {
            return Ok(None);
        }
        debug!(path = %self.path.display(), "config file changed");
        self.load(modified).map(Some)
    }

    /// Loads the config regardless of its modification time.
    pub fn reload(&mut self) -> Result<MonitorConfig, ConfigError> {
        let modified = self.modified()?;
        self.load(modified)
    }

    fn modified(&self) -> Result<Option<SystemTime>, ConfigError> {
        let metadata = std::fs::metadata(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        // Filesystems without mtime support reload on every poll.
        Ok(metadata.modified().ok())
    }

    fn load(&mut self, modified: Option<SystemTime>) -> Result<MonitorConfig, ConfigError> {
        let config = MonitorConfig::load(&self.path)?;
        self.last_modified = modified;
        info!(
            path = %self.path.display(),
            mode = %config.status_mode(),
            "config loaded"
        );
        Ok(config)
    }
}
