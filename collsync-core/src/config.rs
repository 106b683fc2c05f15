//! YAML run configuration.
//!
//! ```yaml
//! registry:
//!   snapshot: registry.yaml
//!   page_size: 500
//! herbarium:
//!   export: ih.json
//! aggregator:
//!   export: idigbio.csv
//! notifications:
//!   enabled: true
//!   outbox: outbox/
//! staff:
//!   linked_threshold: 10
//!   global_threshold: 15
//! dry_run: false
//! ```
//!
//! Relative paths are resolved against the directory holding the config file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_PAGE_SIZE: u64 = 500;
pub const DEFAULT_LINKED_THRESHOLD: u32 = 10;
pub const DEFAULT_GLOBAL_THRESHOLD: u32 = 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub registry: RegistryConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub herbarium: Option<ExportConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<ExportConfig>,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub staff: StaffThresholds,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub snapshot: PathBuf,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    pub export: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox: Option<PathBuf>,
    /// Directory of `.tera` overrides for the notification templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<PathBuf>,
}

/// Minimum staff-match scores per candidate pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffThresholds {
    /// Against persons already linked to the entities being reconciled.
    #[serde(default = "default_linked_threshold")]
    pub linked_threshold: u32,
    /// Against every person in the registry.
    #[serde(default = "default_global_threshold")]
    pub global_threshold: u32,
}

impl Default for StaffThresholds {
    fn default() -> Self {
        Self {
            linked_threshold: DEFAULT_LINKED_THRESHOLD,
            global_threshold: DEFAULT_GLOBAL_THRESHOLD,
        }
    }
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

fn default_linked_threshold() -> u32 {
    DEFAULT_LINKED_THRESHOLD
}

fn default_global_threshold() -> u32 {
    DEFAULT_GLOBAL_THRESHOLD
}

impl SyncConfig {
    /// Parse a config document. Relative paths are kept as written.
    pub fn from_yaml(yaml: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: SyncConfig = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.page_size == 0 {
            return Err(ConfigError::Invalid("registry.page_size must be positive".into()));
        }
        if self.notifications.enabled && self.notifications.outbox.is_none() {
            return Err(ConfigError::Invalid(
                "notifications.outbox is required when notifications are enabled".into(),
            ));
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.registry.snapshot);
        if let Some(h) = self.herbarium.as_mut() {
            resolve(&mut h.export);
        }
        if let Some(a) = self.aggregator.as_mut() {
            resolve(&mut a.export);
        }
        if let Some(o) = self.notifications.outbox.as_mut() {
            resolve(o);
        }
        if let Some(t) = self.notifications.templates.as_mut() {
            resolve(t);
        }
    }
}

/// Load and validate the config at `path`, resolving relative paths against
/// its parent directory.
pub fn load_at(path: &Path) -> Result<SyncConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut config = SyncConfig::from_yaml(&contents, path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.resolve_paths(base);
    Ok(config)
}
