//! Configuration management for Depot

pub mod schema;

pub use schema::{Config, RemoteConfig};

use crate::error::{DepotError, DepotResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use toml_edit::{DocumentMut, Item, Value};
use tracing::{debug, info};

/// Top-level sections a `config set` key may start with
const KNOWN_SECTIONS: [&str; 4] = ["general", "store", "mirror", "layout"];

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("depot")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("depot")
    }

    /// Get the audit log path
    pub fn audit_log_path() -> PathBuf {
        Self::state_dir().join("audit.log")
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> DepotResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> DepotResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| DepotError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| DepotError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> DepotResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        self.write(&content).await?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Set one dotted key in the config file, keeping the rest of it intact
    ///
    /// The value is read as a TOML literal when it parses as one and as a
    /// string otherwise. The edited file must still load as a valid config.
    pub async fn set_value(&self, key: &str, raw: &str) -> DepotResult<()> {
        let content = if self.config_path.exists() {
            fs::read_to_string(&self.config_path).await.map_err(|e| {
                DepotError::io(format!("reading config from {}", self.config_path.display()), e)
            })?
        } else {
            String::new()
        };

        let mut doc: DocumentMut = content.parse()?;
        set_dotted(&mut doc, key, parse_value(raw))?;

        let edited = doc.to_string();
        let config: Config = toml::from_str(&edited).map_err(|e| DepotError::ConfigInvalid {
            path: self.config_path.clone(),
            reason: e.to_string(),
        })?;
        config.validate(&self.config_path)?;

        self.ensure_config_dir().await?;
        self.write(&edited).await?;
        info!("Set {} in {}", key, self.config_path.display());
        Ok(())
    }

    async fn write(&self, content: &str) -> DepotResult<()> {
        fs::write(&self.config_path, content).await.map_err(|e| {
            DepotError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> DepotResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DepotError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_value(raw: &str) -> Value {
    raw.trim()
        .parse::<Value>()
        .unwrap_or_else(|_| Value::from(raw))
}

/// Set a dot-separated key, creating intermediate tables as needed
fn set_dotted(doc: &mut DocumentMut, key: &str, value: Value) -> DepotResult<()> {
    let parts: Vec<&str> = key.split('.').map(str::trim).collect();
    let (leaf, parents) = match parts.split_last() {
        Some((leaf, parents)) if !parents.is_empty() && parts.iter().all(|p| !p.is_empty()) => {
            (*leaf, parents)
        }
        _ => {
            return Err(DepotError::User(format!(
                "Config key must look like section.name: {}",
                key
            )))
        }
    };
    if !KNOWN_SECTIONS.contains(&parents[0]) {
        return Err(DepotError::User(format!("Unknown config section: {}", parents[0])));
    }

    let mut current: &mut Item = doc.as_item_mut();
    for part in parents {
        current = &mut current[*part];
        if current.is_none() {
            *current = toml_edit::table();
        } else if !current.is_table_like() {
            return Err(DepotError::User(format!("Expected table at key: {}", part)));
        }
    }
    current[leaf] = Item::Value(value);
    Ok(())
}
