//! Store configuration.
//!
//! Loaded from a RON file when one exists, otherwise defaults. The data
//! directory can always be overridden with `OUTLINER_DATA_DIR`.
//!
//! ```ron
//! (
//!     data_dir: "/var/lib/outliner",
//!     search_limit: 25,
//!     busy_timeout_ms: 5000,
//!     max_tree_depth: 10000,
//! )
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use outliner_types::MAX_TREE_DEPTH;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Environment variable that overrides `data_dir`.
pub const DATA_DIR_ENV: &str = "OUTLINER_DATA_DIR";

/// File name of the catalog registry inside `data_dir`.
pub const CATALOG_FILE: &str = "catalog.db";

/// Subdirectory of `data_dir` holding one SQLite file per tenant.
pub const DATABASES_DIR: &str = "databases";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for the catalog and tenant files.
    pub data_dir: PathBuf,
    /// Results returned by a search when the caller gives no limit.
    pub search_limit: usize,
    /// How long SQLite waits on a locked file before failing.
    pub busy_timeout_ms: u64,
    /// Most levels a page's block tree may have.
    pub max_tree_depth: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            search_limit: 10,
            busy_timeout_ms: 5_000,
            max_tree_depth: MAX_TREE_DEPTH,
        }
    }
}

impl StoreConfig {
    /// Config rooted at `data_dir`, everything else default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Parse a RON document.
    pub fn from_ron(text: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Load from `path`, falling back to defaults when the file is absent,
    /// then apply the environment override.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => {
                tracing::debug!(path = %path.display(), "loading store config");
                Self::from_ron(&text)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load from the default config path.
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) => Self::load(&path),
            None => {
                let mut config = Self::default();
                config.apply_env();
                config.validate()?;
                Ok(config)
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.search_limit == 0 {
            return Err(StoreError::Config("search_limit must be at least 1".into()));
        }
        if self.max_tree_depth == 0 {
            return Err(StoreError::Config("max_tree_depth must be at least 1".into()));
        }
        Ok(())
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(CATALOG_FILE)
    }

    pub fn databases_dir(&self) -> PathBuf {
        self.data_dir.join(DATABASES_DIR)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// `<data_local_dir>/outliner`, or `./outliner-data` when the platform has none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("outliner"))
        .unwrap_or_else(|| PathBuf::from("outliner-data"))
}

/// `<config_dir>/outliner/config.ron`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("outliner").join("config.ron"))
}
