//! Mount configuration: remote roots, pool sizing, cache placement,
//! logging. Loaded from a JSON file by the binary.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tetherfs_transport::RemoteRoot;

use crate::error::{FsError, Result};

/// Logging sink selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Master switch; `false` installs no subscriber at all.
    pub logging: bool,
    /// Log to stderr when set; to `path` otherwise.
    pub console: bool,
    /// Log file path, used when `console` is false.
    #[serde(default)]
    pub path: String,
    /// Debug-level logging when set, info otherwise.
    pub debug: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            logging: true,
            console: true,
            path: String::new(),
            debug: false,
        }
    }
}

fn default_conn_count() -> usize {
    2
}

fn default_cache_entries() -> usize {
    100
}

/// Top-level mount configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    /// Local directory to mount at.
    pub mount_point: String,
    /// Remote subtrees to project. Hostnames must be unique.
    pub remote_roots: Vec<RemoteRoot>,
    /// Connections per remote.
    #[serde(default = "default_conn_count")]
    pub conn_count: usize,
    /// Local directory for cache backing files.
    pub cache_location: String,
    /// Hoarder capacity in entries.
    #[serde(default = "default_cache_entries")]
    pub cache_entries: usize,
    /// Owner uid reported for every node; defaults to the mounting
    /// process's uid.
    #[serde(default)]
    pub uid: Option<u32>,
    /// Owner gid reported for every node; defaults to the mounting
    /// process's gid.
    #[serde(default)]
    pub gid: Option<u32>,
    #[serde(default)]
    pub log: LogConfig,
}

impl FsConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: FsConfig = serde_json::from_str(&text)
            .map_err(|e| FsError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants a mount depends on.
    pub fn validate(&self) -> Result<()> {
        if self.mount_point.is_empty() {
            return Err(FsError::Config("mount_point is required".to_string()));
        }
        if self.remote_roots.is_empty() {
            return Err(FsError::Config("at least one remote root is required".to_string()));
        }
        if self.conn_count == 0 {
            return Err(FsError::Config("conn_count must be positive".to_string()));
        }
        if self.cache_location.is_empty() {
            return Err(FsError::Config("cache_location is required".to_string()));
        }
        if self.cache_entries == 0 {
            return Err(FsError::Config("cache_entries must be positive".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for root in &self.remote_roots {
            if !seen.insert(&root.hostname) {
                return Err(FsError::Config(format!(
                    "duplicate remote root hostname: {}",
                    root.hostname
                )));
            }
        }
        Ok(())
    }

    /// The uid to report, configuration override or process uid.
    pub fn effective_uid(&self) -> u32 {
        self.uid.unwrap_or_else(|| unsafe { libc::getuid() })
    }

    /// The gid to report, configuration override or process gid.
    pub fn effective_gid(&self) -> u32 {
        self.gid.unwrap_or_else(|| unsafe { libc::getgid() })
    }
}
