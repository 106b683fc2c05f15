//! Subcommands and the setup they share.

pub mod inspect;
pub mod sync;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use collsync_core::{
    config, ExternalSource, RegistryError, RegistrySnapshot, SnapshotRegistry, SyncConfig,
};
use collsync_sources::{AggregatorExport, HerbariumExport};

/// `~/.config/collsync/config.yaml` or the platform equivalent.
fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().context("could not determine config directory")?;
    Ok(dir.join("collsync").join("config.yaml"))
}

pub fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };
    config::load_at(&path).with_context(|| format!("failed to load config {}", path.display()))
}

/// The snapshot registry at `path`; an empty one when the file does not
/// exist yet. It is written on the first live run.
pub fn open_registry(path: &Path) -> Result<SnapshotRegistry> {
    match SnapshotRegistry::load_at(path) {
        Ok(registry) => Ok(registry),
        Err(RegistryError::SnapshotNotFound { .. }) => {
            tracing::warn!(path = %path.display(), "no registry snapshot yet, starting empty");
            Ok(SnapshotRegistry::in_memory(RegistrySnapshot::default()))
        }
        Err(err) => Err(err)
            .with_context(|| format!("failed to load registry snapshot {}", path.display())),
    }
}

pub fn herbarium_source(config: &SyncConfig) -> Option<Arc<dyn ExternalSource>> {
    config
        .herbarium
        .as_ref()
        .map(|h| Arc::new(HerbariumExport::new(&h.export)) as Arc<dyn ExternalSource>)
}

pub fn aggregator_source(config: &SyncConfig) -> Option<Arc<dyn ExternalSource>> {
    config
        .aggregator
        .as_ref()
        .map(|a| Arc::new(AggregatorExport::new(&a.export)) as Arc<dyn ExternalSource>)
}
