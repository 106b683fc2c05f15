//! Registry contract and the file-backed snapshot registry.
//!
//! # Sub-resources
//!
//! Mirroring the remote registry API, `update_*` only touches descriptive
//! fields. Identifiers, machine tags, the master-source marker and person
//! links are sub-resources changed through their dedicated calls
//! (`add_identifier`, `add_machine_tag`, `add_master_source`, `link_person`,
//! `unlink_person`). `create_*` accepts identifiers and tags in the body.
//!
//! # Snapshot storage
//!
//! [`SnapshotRegistry`] keeps the whole registry in memory behind a `Mutex`
//! and can persist it to a YAML file. Save flow: serialize → `.yaml.tmp`
//! sibling → `chmod 0600` → `rename`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, RegistryError};
use crate::ids;
use crate::types::{
    Collection, EntityKey, EntityKind, Identifier, Institution, MachineTag, MasterSourceMetadata,
    Person,
};

// ---------------------------------------------------------------------------
// 1. Paging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagingResponse<T> {
    pub offset: u64,
    pub limit: u64,
    pub end_of_records: bool,
    pub results: Vec<T>,
}

/// Drain a paginated listing page by page until `end_of_records`.
///
/// Any failing page fails the whole listing; callers never see a partially
/// drained list.
pub fn fetch_all<T, F>(page_size: u64, mut fetch: F) -> Result<Vec<T>, RegistryError>
where
    F: FnMut(Page) -> Result<PagingResponse<T>, RegistryError>,
{
    let limit = page_size.max(1);
    let mut offset = 0;
    let mut all = Vec::new();
    loop {
        let response = fetch(Page { offset, limit })?;
        let received = response.results.len() as u64;
        all.extend(response.results);
        if response.end_of_records || received == 0 {
            break;
        }
        offset += received;
    }
    Ok(all)
}

// ---------------------------------------------------------------------------
// 2. Contract
// ---------------------------------------------------------------------------

/// Everything the reconciliation core needs from the registry.
pub trait RegistrySource: Send + Sync {
    fn list_institutions(&self, page: Page) -> Result<PagingResponse<Institution>, RegistryError>;
    fn list_collections(&self, page: Page) -> Result<PagingResponse<Collection>, RegistryError>;
    fn list_persons(&self, page: Page) -> Result<PagingResponse<Person>, RegistryError>;

    fn get_institution(&self, key: EntityKey) -> Result<Institution, RegistryError>;
    fn get_collection(&self, key: EntityKey) -> Result<Collection, RegistryError>;
    fn get_person(&self, key: EntityKey) -> Result<Person, RegistryError>;

    fn create_institution(&self, institution: &Institution) -> Result<EntityKey, RegistryError>;
    fn update_institution(&self, institution: &Institution) -> Result<(), RegistryError>;
    fn create_collection(&self, collection: &Collection) -> Result<EntityKey, RegistryError>;
    fn update_collection(&self, collection: &Collection) -> Result<(), RegistryError>;
    fn create_person(&self, person: &Person) -> Result<EntityKey, RegistryError>;
    fn update_person(&self, person: &Person) -> Result<(), RegistryError>;

    fn add_identifier(
        &self,
        kind: EntityKind,
        key: EntityKey,
        identifier: &Identifier,
    ) -> Result<(), RegistryError>;
    fn add_machine_tag(
        &self,
        kind: EntityKind,
        key: EntityKey,
        tag: &MachineTag,
    ) -> Result<(), RegistryError>;
    fn add_master_source(
        &self,
        kind: EntityKind,
        key: EntityKey,
        metadata: &MasterSourceMetadata,
    ) -> Result<(), RegistryError>;

    /// Link `person` as a contact of an institution or collection.
    fn link_person(
        &self,
        kind: EntityKind,
        entity: EntityKey,
        person: EntityKey,
    ) -> Result<(), RegistryError>;
    fn unlink_person(
        &self,
        kind: EntityKind,
        entity: EntityKey,
        person: EntityKey,
    ) -> Result<(), RegistryError>;
}

// ---------------------------------------------------------------------------
// 3. Snapshot registry
// ---------------------------------------------------------------------------

/// Serialized form of a [`SnapshotRegistry`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub institutions: Vec<Institution>,
    #[serde(default)]
    pub collections: Vec<Collection>,
    #[serde(default)]
    pub persons: Vec<Person>,
}

/// In-memory registry, optionally backed by a YAML snapshot file.
#[derive(Debug, Default)]
pub struct SnapshotRegistry {
    state: Mutex<RegistrySnapshot>,
    path: Option<PathBuf>,
}

impl SnapshotRegistry {
    /// A registry that lives only in memory.
    pub fn in_memory(snapshot: RegistrySnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
            path: None,
        }
    }

    /// Load the snapshot at `path`.
    ///
    /// Returns `RegistryError::SnapshotNotFound` if absent,
    /// `RegistryError::Parse` (with path) if malformed YAML.
    pub fn load_at(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            return Err(RegistryError::SnapshotNotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let snapshot: RegistrySnapshot = serde_yaml::from_str(&contents).map_err(|e| {
            RegistryError::Parse {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
        tracing::debug!(
            path = %path.display(),
            institutions = snapshot.institutions.len(),
            collections = snapshot.collections.len(),
            persons = snapshot.persons.len(),
            "loaded registry snapshot"
        );
        Ok(Self {
            state: Mutex::new(snapshot),
            path: Some(path.to_path_buf()),
        })
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.lock().clone()
    }

    /// Atomically write the current state back to the file it was loaded from.
    /// A no-op for in-memory registries.
    pub fn save(&self) -> Result<(), RegistryError> {
        match &self.path {
            Some(path) => save_snapshot_at(path, &self.lock()),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistrySnapshot> {
        // A panic mid-mutation leaves plain data behind; keep serving it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Atomically save `snapshot` to `path`.
pub fn save_snapshot_at(path: &Path, snapshot: &RegistrySnapshot) -> Result<(), RegistryError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "registry.yaml".to_string());
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    let yaml = serde_yaml::to_string(snapshot)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(io_err(path, e));
    }
    Ok(())
}

fn page_of<T: Clone>(items: &[T], page: Page) -> PagingResponse<T> {
    let start = (page.offset as usize).min(items.len());
    let end = start.saturating_add(page.limit as usize).min(items.len());
    PagingResponse {
        offset: page.offset,
        limit: page.limit,
        end_of_records: end >= items.len(),
        results: items[start..end].to_vec(),
    }
}

fn not_found(kind: EntityKind, key: EntityKey) -> RegistryError {
    RegistryError::NotFound { kind, key }
}

fn rejected(action: &str, message: impl Into<String>) -> RegistryError {
    RegistryError::Rejected {
        action: action.to_string(),
        message: message.into(),
    }
}

fn find_institution(
    state: &mut RegistrySnapshot,
    key: EntityKey,
) -> Result<&mut Institution, RegistryError> {
    state
        .institutions
        .iter_mut()
        .find(|i| i.key == Some(key))
        .ok_or_else(|| not_found(EntityKind::Institution, key))
}

fn find_collection(
    state: &mut RegistrySnapshot,
    key: EntityKey,
) -> Result<&mut Collection, RegistryError> {
    state
        .collections
        .iter_mut()
        .find(|c| c.key == Some(key))
        .ok_or_else(|| not_found(EntityKind::Collection, key))
}

fn find_person(state: &mut RegistrySnapshot, key: EntityKey) -> Result<&mut Person, RegistryError> {
    state
        .persons
        .iter_mut()
        .find(|p| p.key == Some(key))
        .ok_or_else(|| not_found(EntityKind::Person, key))
}

impl RegistrySource for SnapshotRegistry {
    fn list_institutions(&self, page: Page) -> Result<PagingResponse<Institution>, RegistryError> {
        Ok(page_of(&self.lock().institutions, page))
    }

    fn list_collections(&self, page: Page) -> Result<PagingResponse<Collection>, RegistryError> {
        Ok(page_of(&self.lock().collections, page))
    }

    fn list_persons(&self, page: Page) -> Result<PagingResponse<Person>, RegistryError> {
        Ok(page_of(&self.lock().persons, page))
    }

    fn get_institution(&self, key: EntityKey) -> Result<Institution, RegistryError> {
        find_institution(&mut self.lock(), key).map(|i| i.clone())
    }

    fn get_collection(&self, key: EntityKey) -> Result<Collection, RegistryError> {
        find_collection(&mut self.lock(), key).map(|c| c.clone())
    }

    fn get_person(&self, key: EntityKey) -> Result<Person, RegistryError> {
        find_person(&mut self.lock(), key).map(|p| p.clone())
    }

    fn create_institution(&self, institution: &Institution) -> Result<EntityKey, RegistryError> {
        if institution.code.trim().is_empty() || institution.name.trim().is_empty() {
            return Err(rejected("create institution", "code and name are required"));
        }
        let key = EntityKey::random();
        let mut stored = institution.clone();
        stored.key = Some(key);
        stored.master_source = None;
        stored.contact_persons.clear();
        stored.modified = Some(Utc::now());
        self.lock().institutions.push(stored);
        Ok(key)
    }

    fn update_institution(&self, institution: &Institution) -> Result<(), RegistryError> {
        let key = institution
            .key
            .ok_or_else(|| rejected("update institution", "missing key"))?;
        let mut state = self.lock();
        let stored = find_institution(&mut state, key)?;
        let mut updated = institution.clone();
        updated.identifiers = std::mem::take(&mut stored.identifiers);
        updated.machine_tags = std::mem::take(&mut stored.machine_tags);
        updated.master_source = stored.master_source.take();
        updated.contact_persons = std::mem::take(&mut stored.contact_persons);
        updated.modified = Some(Utc::now());
        *stored = updated;
        Ok(())
    }

    fn create_collection(&self, collection: &Collection) -> Result<EntityKey, RegistryError> {
        if collection.code.trim().is_empty() || collection.name.trim().is_empty() {
            return Err(rejected("create collection", "code and name are required"));
        }
        let mut state = self.lock();
        if let Some(parent) = collection.institution_key {
            find_institution(&mut state, parent)?;
        }
        let key = EntityKey::random();
        let mut stored = collection.clone();
        stored.key = Some(key);
        stored.master_source = None;
        stored.contact_persons.clear();
        stored.modified = Some(Utc::now());
        state.collections.push(stored);
        Ok(key)
    }

    fn update_collection(&self, collection: &Collection) -> Result<(), RegistryError> {
        let key = collection
            .key
            .ok_or_else(|| rejected("update collection", "missing key"))?;
        let mut state = self.lock();
        if let Some(parent) = collection.institution_key {
            find_institution(&mut state, parent)?;
        }
        let stored = find_collection(&mut state, key)?;
        let mut updated = collection.clone();
        updated.identifiers = std::mem::take(&mut stored.identifiers);
        updated.machine_tags = std::mem::take(&mut stored.machine_tags);
        updated.master_source = stored.master_source.take();
        updated.contact_persons = std::mem::take(&mut stored.contact_persons);
        updated.modified = Some(Utc::now());
        *stored = updated;
        Ok(())
    }

    fn create_person(&self, person: &Person) -> Result<EntityKey, RegistryError> {
        if person.first_name.as_deref().map_or(true, |n| n.trim().is_empty()) {
            return Err(rejected("create person", "first name is required"));
        }
        let key = EntityKey::random();
        let mut stored = person.clone();
        stored.key = Some(key);
        stored.modified = Some(Utc::now());
        self.lock().persons.push(stored);
        Ok(key)
    }

    fn update_person(&self, person: &Person) -> Result<(), RegistryError> {
        let key = person
            .key
            .ok_or_else(|| rejected("update person", "missing key"))?;
        let mut state = self.lock();
        let stored = find_person(&mut state, key)?;
        let mut updated = person.clone();
        updated.identifiers = std::mem::take(&mut stored.identifiers);
        updated.modified = Some(Utc::now());
        *stored = updated;
        Ok(())
    }

    fn add_identifier(
        &self,
        kind: EntityKind,
        key: EntityKey,
        identifier: &Identifier,
    ) -> Result<(), RegistryError> {
        let mut state = self.lock();
        let identifiers = match kind {
            EntityKind::Institution => &mut find_institution(&mut state, key)?.identifiers,
            EntityKind::Collection => &mut find_collection(&mut state, key)?.identifiers,
            EntityKind::Person => &mut find_person(&mut state, key)?.identifiers,
        };
        ids::add_identifier(identifiers, identifier.clone());
        Ok(())
    }

    fn add_machine_tag(
        &self,
        kind: EntityKind,
        key: EntityKey,
        tag: &MachineTag,
    ) -> Result<(), RegistryError> {
        let mut state = self.lock();
        let tags = match kind {
            EntityKind::Institution => &mut find_institution(&mut state, key)?.machine_tags,
            EntityKind::Collection => &mut find_collection(&mut state, key)?.machine_tags,
            EntityKind::Person => {
                return Err(rejected("add machine tag", "persons carry no machine tags"))
            }
        };
        ids::add_tag(tags, tag.clone());
        Ok(())
    }

    fn add_master_source(
        &self,
        kind: EntityKind,
        key: EntityKey,
        metadata: &MasterSourceMetadata,
    ) -> Result<(), RegistryError> {
        let mut state = self.lock();
        let marker = match kind {
            EntityKind::Institution => &mut find_institution(&mut state, key)?.master_source,
            EntityKind::Collection => &mut find_collection(&mut state, key)?.master_source,
            EntityKind::Person => {
                return Err(rejected("add master source", "persons have no master source"))
            }
        };
        match marker {
            Some(existing) if existing.source != metadata.source => Err(rejected(
                "add master source",
                format!("entity already mastered by {}", existing.source),
            )),
            Some(_) => Ok(()),
            None => {
                *marker = Some(metadata.clone());
                Ok(())
            }
        }
    }

    fn link_person(
        &self,
        kind: EntityKind,
        entity: EntityKey,
        person: EntityKey,
    ) -> Result<(), RegistryError> {
        let mut state = self.lock();
        find_person(&mut state, person)?;
        let contacts = match kind {
            EntityKind::Institution => &mut find_institution(&mut state, entity)?.contact_persons,
            EntityKind::Collection => &mut find_collection(&mut state, entity)?.contact_persons,
            EntityKind::Person => return Err(rejected("link person", "cannot link to a person")),
        };
        if !contacts.contains(&person) {
            contacts.push(person);
        }
        Ok(())
    }

    fn unlink_person(
        &self,
        kind: EntityKind,
        entity: EntityKey,
        person: EntityKey,
    ) -> Result<(), RegistryError> {
        let mut state = self.lock();
        let contacts = match kind {
            EntityKind::Institution => &mut find_institution(&mut state, entity)?.contact_persons,
            EntityKind::Collection => &mut find_collection(&mut state, entity)?.contact_persons,
            EntityKind::Person => {
                return Err(rejected("unlink person", "cannot unlink from a person"))
            }
        };
        contacts.retain(|k| *k != person);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MasterSource;

    fn institution(code: &str) -> Institution {
        Institution {
            code: code.into(),
            name: format!("{code} Herbarium"),
            ..Default::default()
        }
    }

    #[test]
    fn fetch_all_drains_every_page() {
        let registry = SnapshotRegistry::in_memory(RegistrySnapshot::default());
        for i in 0..7 {
            registry.create_institution(&institution(&format!("I{i}"))).expect("create");
        }
        let mut calls = 0;
        let all = fetch_all(3, |page| {
            calls += 1;
            registry.list_institutions(page)
        })
        .expect("fetch_all");
        assert_eq!(all.len(), 7);
        assert_eq!(calls, 3);
    }

    #[test]
    fn fetch_all_fails_on_any_failing_page() {
        let result: Result<Vec<u32>, _> = fetch_all(2, |page| {
            if page.offset >= 2 {
                return Err(RegistryError::Listing {
                    kind: EntityKind::Collection,
                    offset: page.offset,
                    message: "timeout".into(),
                });
            }
            Ok(PagingResponse {
                offset: page.offset,
                limit: page.limit,
                end_of_records: false,
                results: vec![1, 2],
            })
        });
        assert!(matches!(result, Err(RegistryError::Listing { offset: 2, .. })));
    }

    #[test]
    fn update_keeps_sub_resources() {
        let registry = SnapshotRegistry::in_memory(RegistrySnapshot::default());
        let mut inst = institution("NY");
        inst.identifiers.push(Identifier::irn(1));
        let key = registry.create_institution(&inst).expect("create");

        let mut changed = registry.get_institution(key).expect("get");
        changed.name = "Renamed".into();
        changed.identifiers.clear();
        registry.update_institution(&changed).expect("update");

        let stored = registry.get_institution(key).expect("get");
        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.identifiers, vec![Identifier::irn(1)]);
    }

    #[test]
    fn master_source_of_other_system_is_rejected() {
        let registry = SnapshotRegistry::in_memory(RegistrySnapshot::default());
        let key = registry.create_institution(&institution("NY")).expect("create");
        let herbarium = MasterSourceMetadata {
            source: MasterSource::Herbarium,
            source_id: "1".into(),
        };
        let aggregator = MasterSourceMetadata {
            source: MasterSource::Aggregator,
            source_id: "u".into(),
        };
        registry
            .add_master_source(EntityKind::Institution, key, &herbarium)
            .expect("first");
        registry
            .add_master_source(EntityKind::Institution, key, &herbarium)
            .expect("same source again is a no-op");
        let err = registry
            .add_master_source(EntityKind::Institution, key, &aggregator)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Rejected { .. }));
    }

    #[test]
    fn link_requires_existing_person() {
        let registry = SnapshotRegistry::in_memory(RegistrySnapshot::default());
        let key = registry.create_institution(&institution("NY")).expect("create");
        let err = registry
            .link_person(EntityKind::Institution, key, EntityKey::random())
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { kind: EntityKind::Person, .. }));
    }

    #[test]
    fn link_is_idempotent_and_unlink_removes() {
        let registry = SnapshotRegistry::in_memory(RegistrySnapshot::default());
        let inst = registry.create_institution(&institution("NY")).expect("create");
        let person = registry
            .create_person(&Person {
                first_name: Some("Ann".into()),
                ..Default::default()
            })
            .expect("person");
        registry.link_person(EntityKind::Institution, inst, person).expect("link");
        registry.link_person(EntityKind::Institution, inst, person).expect("link again");
        assert_eq!(registry.get_institution(inst).unwrap().contact_persons, vec![person]);

        registry.unlink_person(EntityKind::Institution, inst, person).expect("unlink");
        assert!(registry.get_institution(inst).unwrap().contact_persons.is_empty());
    }
}
