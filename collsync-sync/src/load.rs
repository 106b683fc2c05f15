//! Concurrent bulk load of the registry and the source export.

use std::sync::Arc;

use collsync_core::{
    registry::fetch_all, Collection, ExternalSource, Institution, Person, RegistryError,
    RegistrySource, SourceRecord,
};

use crate::error::SyncError;

/// Everything a run reconciles, loaded up front.
#[derive(Debug, Default)]
pub struct Loaded {
    pub institutions: Vec<Institution>,
    pub collections: Vec<Collection>,
    pub persons: Vec<Person>,
    pub records: Vec<SourceRecord>,
}

/// Drain the three registry listings and read the export, all at once. Any
/// failure fails the load; nothing partial is returned.
pub async fn load_all(
    registry: Arc<dyn RegistrySource>,
    source: Arc<dyn ExternalSource>,
    page_size: u64,
) -> Result<Loaded, SyncError> {
    let institutions = {
        let registry = Arc::clone(&registry);
        blocking("institution load", move || {
            fetch_all(page_size, |page| registry.list_institutions(page))
        })
    };
    let collections = {
        let registry = Arc::clone(&registry);
        blocking("collection load", move || {
            fetch_all(page_size, |page| registry.list_collections(page))
        })
    };
    let persons = blocking("person load", move || {
        fetch_all(page_size, |page| registry.list_persons(page))
    });
    let records = async move {
        tokio::task::spawn_blocking(move || source.list_records())
            .await
            .map_err(|err| SyncError::Task {
                task: "source load",
                message: err.to_string(),
            })?
            .map_err(SyncError::from)
    };

    let (institutions, collections, persons, records) =
        tokio::try_join!(institutions, collections, persons, records)?;
    tracing::info!(
        institutions = institutions.len(),
        collections = collections.len(),
        persons = persons.len(),
        records = records.len(),
        "loaded registry and source"
    );
    Ok(Loaded {
        institutions,
        collections,
        persons,
        records,
    })
}

async fn blocking<T, F>(task: &'static str, load: F) -> Result<T, SyncError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RegistryError> + Send + 'static,
{
    tokio::task::spawn_blocking(load)
        .await
        .map_err(|err| SyncError::Task {
            task,
            message: err.to_string(),
        })?
        .map_err(SyncError::from)
}
