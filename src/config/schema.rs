//! Configuration schema for Depot
//!
//! Configuration is stored at `~/.config/depot/config.toml`

use crate::artifact::TransferPolicy;
use crate::error::{DepotError, DepotResult};
use crate::mirror::{DirectorySource, HttpSource, MirrorOptions, RemoteArtifactSource};
use crate::store::CoordinateMapper;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Local store settings
    pub store: StoreConfig,

    /// Mirroring behavior
    pub mirror: MirrorConfig,

    /// On-disk layout settings
    pub layout: LayoutConfig,

    /// Remote sources, in priority order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<RemoteConfig>,
}

impl Config {
    /// Check settings that serde cannot express
    pub fn validate(&self, path: &Path) -> DepotResult<()> {
        let invalid = |reason: String| DepotError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        };

        if self.mirror.parallel_fetches == 0 {
            return Err(invalid("mirror.parallel_fetches must be at least 1".to_string()));
        }
        for remote in &self.remotes {
            if remote.name.trim().is_empty() {
                return Err(invalid("every [[remotes]] entry needs a name".to_string()));
            }
            if remote.url.is_some() == remote.path.is_some() {
                return Err(invalid(format!(
                    "remote '{}' must set exactly one of url or path",
                    remote.name
                )));
            }
        }
        Ok(())
    }

    /// Store root, falling back to the per-user cache directory
    pub fn store_root(&self) -> PathBuf {
        self.store.root.clone().unwrap_or_else(default_store_root)
    }

    pub fn mirror_options(&self) -> MirrorOptions {
        MirrorOptions {
            policy: self.mirror.policy,
            offline: self.mirror.offline,
            revalidate: self.mirror.revalidate,
        }
    }

    pub fn coordinate_mapper(&self) -> CoordinateMapper {
        CoordinateMapper::with_extensions(&self.layout.extensions)
    }
}

/// Default store location
pub fn default_store_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("depot")
        .join("repository")
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: true,
        }
    }
}

/// Local store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store root directory (default: `~/.cache/depot/repository`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

/// Mirroring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Which formats to fetch from remotes
    pub policy: TransferPolicy,

    /// Never contact remotes
    pub offline: bool,

    /// Recheck local files against remote checksums on every hit
    pub revalidate: bool,

    /// Concurrent mirror attempts during `depot fetch`
    pub parallel_fetches: usize,

    /// Per-request timeout for HTTP remotes, in seconds
    pub timeout_secs: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            policy: TransferPolicy::default(),
            offline: false,
            revalidate: false,
            parallel_fetches: 4,
            timeout_secs: 300,
        }
    }
}

/// Layout settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Default file extension per artifact type, on top of the built-in table
    pub extensions: BTreeMap<String, String>,
}

/// A remote source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub name: String,

    /// HTTP(S) base URL of a served store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Directory holding another store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl RemoteConfig {
    /// Remote from a command-line location: a URL or a directory
    pub fn from_location(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self {
                name: location.to_string(),
                url: Some(location.to_string()),
                path: None,
            }
        } else {
            Self {
                name: location.to_string(),
                url: None,
                path: Some(PathBuf::from(location)),
            }
        }
    }

    /// Build the source this entry describes
    pub fn to_source(&self, timeout: Duration) -> DepotResult<Box<dyn RemoteArtifactSource>> {
        match (&self.url, &self.path) {
            (Some(url), None) => Ok(Box::new(HttpSource::with_timeout(&self.name, url, timeout))),
            (None, Some(path)) => Ok(Box::new(DirectorySource::new(&self.name, path))),
            _ => Err(DepotError::User(format!(
                "remote '{}' must set exactly one of url or path",
                self.name
            ))),
        }
    }
}
