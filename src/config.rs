// src/config.rs

//! Engine configuration
//!
//! Read from `<config dir>/formula-engine/config.toml` when present. Every
//! field has a default, so a partial file (or none at all) works; command
//! line flags override whatever the file says.
//!
//! ```toml
//! cellar = "/opt/formula/cellar"
//! jobs = 4
//! keep_going = true
//! step_timeout_secs = 3600
//! variants = ["with-docs"]
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const APP_DIR: &str = "formula-engine";

/// Fallback `PATH` entries appended after dependency `bin` directories
pub const DEFAULT_SYSTEM_PATH: &str = "/usr/bin:/bin:/usr/sbin:/sbin";

/// Configuration for the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Install root; each formula lands in `<cellar>/<name>/<version>`
    pub cellar: PathBuf,
    /// Content-addressed download cache
    pub cache_dir: PathBuf,
    /// SQLite database holding install receipts
    pub receipts_db: PathBuf,
    /// Directory of `<name>.toml` formulas
    pub formula_dir: PathBuf,
    /// Build logs, one `<name>-<version>.log` per build
    pub log_dir: PathBuf,
    /// Shared tree holding `opt/<name>` and the linked `bin`, `lib` etc.
    pub link_dir: PathBuf,
    /// Parent for temporary build directories (system temp dir if unset)
    pub build_root: Option<PathBuf>,
    /// Formulas built concurrently
    pub jobs: usize,
    /// `-jN` passed to make inside each build
    pub make_jobs: u32,
    /// Concurrent downloads
    pub fetch_jobs: usize,
    /// Keep building unrelated branches after a failure
    pub keep_going: bool,
    /// Keep build directories after the build (for debugging)
    pub keep_builddir: bool,
    /// Kill a step that runs longer than this (no limit if unset)
    pub step_timeout_secs: Option<u64>,
    /// HTTP request timeout
    pub http_timeout_secs: u64,
    /// Variant flags enabled for every install
    pub variants: Vec<String>,
    /// System `PATH` entries available to build steps
    pub system_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);
        let data = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR);
        let cache = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR);

        Self {
            cellar: data.join("cellar"),
            cache_dir: cache.join("downloads"),
            receipts_db: data.join("receipts.db"),
            formula_dir: data.join("formulas"),
            log_dir: data.join("logs"),
            link_dir: data.join("local"),
            build_root: None,
            jobs: parallelism.min(4),
            make_jobs: parallelism as u32,
            fetch_jobs: 4,
            keep_going: false,
            keep_builddir: false,
            step_timeout_secs: None,
            http_timeout_secs: 60,
            variants: Vec::new(),
            system_path: DEFAULT_SYSTEM_PATH.to_string(),
        }
    }
}

impl EngineConfig {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid {}: {}", path.display(), e)))?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path`, or the default file if it exists, or the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.is_file() => Self::load(&default),
            _ => Ok(Self::default()),
        }
    }

    /// A configuration rooted entirely under `root`
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            cellar: root.join("cellar"),
            cache_dir: root.join("cache"),
            receipts_db: root.join("receipts.db"),
            formula_dir: root.join("formulas"),
            log_dir: root.join("logs"),
            link_dir: root.join("local"),
            ..Self::default()
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(Error::Config("jobs must be at least 1".to_string()));
        }
        if self.fetch_jobs == 0 {
            return Err(Error::Config("fetch_jobs must be at least 1".to_string()));
        }
        if self.make_jobs == 0 {
            return Err(Error::Config("make_jobs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Install prefix for one formula version
    pub fn prefix_for(&self, name: &str, version: &str) -> PathBuf {
        self.cellar.join(name).join(version)
    }

    /// Build log location for one formula version
    pub fn log_path(&self, name: &str, version: &str) -> PathBuf {
        self.log_dir.join(format!("{}-{}.log", name, version))
    }
}
