//! One handler per match state, plus the shared create/update/staff steps.
//!
//! Every registry call goes through the [`CallExecutor`]; every successful call
//! is mirrored into the [`MatchIndex`] before the next one.

use std::collections::HashSet;

use collsync_core::{
    config::StaffThresholds,
    ids,
    types::{
        Collection, EntityKey, EntityKind, Identifier, Institution, MachineTag,
        MasterSourceMetadata, Person,
    },
    RegistrySource, SourceRecord, SourceStaff,
};

use crate::{
    converter::{merge_collection, merge_institution, merge_person},
    error::StepFailed,
    executor::{CallExecutor, EntityRef},
    index::MatchIndex,
    outcome::{
        BothOutcome, EntityMatch, NoMatchOutcome, OnlyCollectionOutcome,
        OnlyInstitutionOutcome, StaffConflict, StaffOutcome,
    },
    staff::{match_staff, StaffMatch},
};

/// Everything a strategy touches while reconciling one record.
pub struct Reconciler<'a> {
    pub registry: &'a dyn RegistrySource,
    pub index: &'a mut MatchIndex,
    pub executor: &'a mut CallExecutor,
    pub thresholds: StaffThresholds,
}

type Targets = [(EntityKind, EntityKey)];

impl Reconciler<'_> {
    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    /// Update the institution, create the collection under it, reconcile staff
    /// against both.
    pub fn only_institution(
        &mut self,
        record: &SourceRecord,
        institution: Institution,
    ) -> Result<OnlyInstitutionOutcome, StepFailed> {
        let institution = self.update_institution(record, institution)?;
        let new_collection = self.create_collection(record, institution.merged.key)?;
        let staff = self.reconcile_staff(record, &targets(&institution.merged, &new_collection));
        Ok(OnlyInstitutionOutcome {
            record_id: record.record_id.clone(),
            institution,
            new_collection,
            staff,
        })
    }

    pub fn only_collection(
        &mut self,
        record: &SourceRecord,
        collection: Collection,
    ) -> Result<OnlyCollectionOutcome, StepFailed> {
        let collection = self.update_collection(record, collection)?;
        let targets: Vec<_> = collection
            .merged
            .key
            .map(|k| (EntityKind::Collection, k))
            .into_iter()
            .collect();
        let staff = self.reconcile_staff(record, &targets);
        Ok(OnlyCollectionOutcome {
            record_id: record.record_id.clone(),
            collection,
            staff,
        })
    }

    pub fn both(
        &mut self,
        record: &SourceRecord,
        institution: Institution,
        collection: Collection,
    ) -> Result<BothOutcome, StepFailed> {
        let institution = self.update_institution(record, institution)?;
        let collection = self.update_collection(record, collection)?;
        let staff = self.reconcile_staff(record, &targets(&institution.merged, &collection.merged));
        Ok(BothOutcome {
            record_id: record.record_id.clone(),
            institution,
            collection,
            staff,
        })
    }

    /// Create the institution, then the collection under it. The caller has
    /// already checked the record carries a code and a name.
    pub fn no_match(&mut self, record: &SourceRecord) -> Result<NoMatchOutcome, StepFailed> {
        let new_institution = self.create_institution(record)?;
        let new_collection = self.create_collection(record, new_institution.key)?;
        let staff = self.reconcile_staff(record, &targets(&new_institution, &new_collection));
        Ok(NoMatchOutcome {
            record_id: record.record_id.clone(),
            new_institution,
            new_collection,
            staff,
        })
    }

    // -----------------------------------------------------------------------
    // Entity steps
    // -----------------------------------------------------------------------

    fn update_institution(
        &mut self,
        record: &SourceRecord,
        matched: Institution,
    ) -> Result<EntityMatch<Institution>, StepFailed> {
        let merged = merge_institution(record, Some(&matched));
        let result = EntityMatch::new(matched, merged);
        let target = EntityRef::new(EntityKind::Institution, result.merged.key, &result.merged.code);
        if result.update {
            let registry = self.registry;
            let body = &result.merged;
            self.executor
                .execute(&target, "update institution", (), || registry.update_institution(body))?;
            self.add_sub_resources(
                &target,
                (&result.matched.identifiers, &result.merged.identifiers),
                (&result.matched.machine_tags, &result.merged.machine_tags),
                (&result.matched.master_source, &result.merged.master_source),
            )?;
        }
        self.index.upsert_institution(result.merged.clone());
        Ok(result)
    }

    fn update_collection(
        &mut self,
        record: &SourceRecord,
        matched: Collection,
    ) -> Result<EntityMatch<Collection>, StepFailed> {
        let merged = merge_collection(record, Some(&matched), None);
        let result = EntityMatch::new(matched, merged);
        let target = EntityRef::new(EntityKind::Collection, result.merged.key, &result.merged.code);
        if result.update {
            let registry = self.registry;
            let body = &result.merged;
            self.executor
                .execute(&target, "update collection", (), || registry.update_collection(body))?;
            self.add_sub_resources(
                &target,
                (&result.matched.identifiers, &result.merged.identifiers),
                (&result.matched.machine_tags, &result.merged.machine_tags),
                (&result.matched.master_source, &result.merged.master_source),
            )?;
        }
        self.index.upsert_collection(result.merged.clone());
        Ok(result)
    }

    fn create_institution(&mut self, record: &SourceRecord) -> Result<Institution, StepFailed> {
        let mut created = merge_institution(record, None);
        let target = EntityRef::new(EntityKind::Institution, None, &created.code);
        let registry = self.registry;
        let key = self.executor.execute(
            &target,
            "create institution",
            EntityKey::random(),
            || registry.create_institution(&created),
        )?;
        created.key = Some(key);
        self.add_master_source(&target.with_key(key), created.master_source.as_ref())?;
        self.index.upsert_institution(created.clone());
        self.index.record_created_institution(key, &created.code);
        Ok(created)
    }

    fn create_collection(
        &mut self,
        record: &SourceRecord,
        parent: Option<EntityKey>,
    ) -> Result<Collection, StepFailed> {
        let mut created = merge_collection(record, None, parent);
        let target = EntityRef::new(EntityKind::Collection, None, &created.code);
        let registry = self.registry;
        let key = self.executor.execute(
            &target,
            "create collection",
            EntityKey::random(),
            || registry.create_collection(&created),
        )?;
        created.key = Some(key);
        self.add_master_source(&target.with_key(key), created.master_source.as_ref())?;
        self.index.upsert_collection(created.clone());
        self.index.record_created_collection(key, &record.record_id);
        Ok(created)
    }

    /// Updates never carry identifiers, tags or the master-source marker, so
    /// anything the merge added is sent separately.
    fn add_sub_resources(
        &mut self,
        target: &EntityRef,
        identifiers: (&[Identifier], &[Identifier]),
        tags: (&[MachineTag], &[MachineTag]),
        master: (&Option<MasterSourceMetadata>, &Option<MasterSourceMetadata>),
    ) -> Result<(), StepFailed> {
        let Some(key) = target.key else { return Ok(()) };
        let registry = self.registry;
        let kind = target.kind;
        for id in identifiers.1 {
            if !ids::contains_identifier(identifiers.0, id.id_type, &id.value) {
                let action = format!("add identifier {}:{}", id.id_type, id.value);
                self.executor.execute(target, &action, (), || {
                    registry.add_identifier(kind, key, id)
                })?;
            }
        }
        for tag in tags.1 {
            if !ids::contains_tag(tags.0, &tag.namespace, &tag.name, &tag.value) {
                let action = format!("add machine tag {}:{}={}", tag.namespace, tag.name, tag.value);
                self.executor.execute(target, &action, (), || {
                    registry.add_machine_tag(kind, key, tag)
                })?;
            }
        }
        if master.0.is_none() {
            self.add_master_source(target, master.1.as_ref())?;
        }
        Ok(())
    }

    fn add_master_source(
        &mut self,
        target: &EntityRef,
        metadata: Option<&MasterSourceMetadata>,
    ) -> Result<(), StepFailed> {
        let (Some(key), Some(metadata)) = (target.key, metadata) else {
            return Ok(());
        };
        let registry = self.registry;
        let kind = target.kind;
        self.executor.execute(
            target,
            &format!("add master source {}", metadata.source),
            (),
            || registry.add_master_source(kind, key, metadata),
        )
    }

    // -----------------------------------------------------------------------
    // Staff
    // -----------------------------------------------------------------------

    /// Reconcile every staff entry against the persons linked to `targets`,
    /// then the whole registry. Linked persons no entry matched are unlinked.
    /// A failed step skips that entry only.
    fn reconcile_staff(&mut self, record: &SourceRecord, targets: &Targets) -> StaffOutcome {
        let previously_linked: Vec<Person> = self
            .index
            .linked_persons(targets)
            .into_iter()
            .cloned()
            .collect();
        let primary_institution = primary(targets, EntityKind::Institution);
        let primary_collection = primary(targets, EntityKind::Collection);

        let mut outcome = StaffOutcome::default();
        let mut matched: HashSet<EntityKey> = HashSet::new();

        for staff in &record.staff {
            let decision = {
                let linked = self.index.linked_persons(targets);
                let global: Vec<&Person> = self.index.persons().collect();
                match_staff(staff, &linked, &global, self.thresholds)
            };
            match decision {
                StaffMatch::Create => {
                    let created = self.create_person(
                        record,
                        staff,
                        primary_institution,
                        primary_collection,
                        targets,
                    );
                    if let Ok(person) = created {
                        matched.extend(person.key);
                        outcome.created.push(person);
                    }
                }
                StaffMatch::Update(person) => {
                    matched.extend(person.key);
                    let updated = self.update_person(
                        record,
                        staff,
                        person,
                        primary_institution,
                        primary_collection,
                        targets,
                    );
                    if let Ok(update) = updated {
                        outcome.updated.push(update);
                    }
                }
                StaffMatch::Conflict(candidates) => {
                    tracing::warn!(
                        record = %record.record_id,
                        staff = %staff.full_name(),
                        candidates = candidates.len(),
                        "staff entry has no single matching person"
                    );
                    matched.extend(candidates.iter().filter_map(|p| p.key));
                    let conflict = StaffConflict {
                        staff: staff.clone(),
                        candidates,
                    };
                    self.executor.notify_staff_conflict(record, &conflict);
                    outcome.conflicts.push(conflict);
                }
            }
        }

        for person in previously_linked {
            let Some(key) = person.key else { continue };
            if matched.contains(&key) {
                continue;
            }
            if self.unlink_everywhere(&person, key, targets).is_ok() {
                outcome.removed.push(person);
            }
        }
        outcome
    }

    fn create_person(
        &mut self,
        record: &SourceRecord,
        staff: &SourceStaff,
        primary_institution: Option<EntityKey>,
        primary_collection: Option<EntityKey>,
        targets: &Targets,
    ) -> Result<Person, StepFailed> {
        let mut created = merge_person(
            staff,
            record.last_modified,
            None,
            primary_institution,
            primary_collection,
        );
        let target = EntityRef::new(EntityKind::Person, None, created.full_name());
        let registry = self.registry;
        let key = self.executor.execute(
            &target,
            "create person",
            EntityKey::random(),
            || registry.create_person(&created),
        )?;
        created.key = Some(key);
        self.index.upsert_person(created.clone());
        self.link_everywhere(&target.with_key(key), key, targets)?;
        Ok(created)
    }

    fn update_person(
        &mut self,
        record: &SourceRecord,
        staff: &SourceStaff,
        matched: Person,
        primary_institution: Option<EntityKey>,
        primary_collection: Option<EntityKey>,
        targets: &Targets,
    ) -> Result<EntityMatch<Person>, StepFailed> {
        let merged = merge_person(
            staff,
            record.last_modified,
            Some(&matched),
            primary_institution,
            primary_collection,
        );
        let result = EntityMatch::new(matched, merged);
        let Some(key) = result.merged.key else {
            return Err(StepFailed);
        };
        let target = EntityRef::new(EntityKind::Person, Some(key), result.merged.full_name());
        if result.update {
            let registry = self.registry;
            let body = &result.merged;
            self.executor
                .execute(&target, "update person", (), || registry.update_person(body))?;
            for id in &result.merged.identifiers {
                if !ids::contains_identifier(&result.matched.identifiers, id.id_type, &id.value) {
                    let action = format!("add identifier {}:{}", id.id_type, id.value);
                    self.executor.execute(&target, &action, (), || {
                        registry.add_identifier(EntityKind::Person, key, id)
                    })?;
                }
            }
        }
        self.index.upsert_person(result.merged.clone());
        self.link_everywhere(&target, key, targets)?;
        Ok(result)
    }

    fn link_everywhere(
        &mut self,
        person_ref: &EntityRef,
        person: EntityKey,
        targets: &Targets,
    ) -> Result<(), StepFailed> {
        let registry = self.registry;
        for &(kind, entity) in targets {
            if self.index.contacts_of(kind, entity).contains(&person) {
                continue;
            }
            self.executor.execute(person_ref, &format!("link to {kind} {entity}"), (), || {
                registry.link_person(kind, entity, person)
            })?;
            self.index.link(kind, entity, person);
        }
        Ok(())
    }

    fn unlink_everywhere(
        &mut self,
        person: &Person,
        key: EntityKey,
        targets: &Targets,
    ) -> Result<(), StepFailed> {
        let person_ref = EntityRef::new(EntityKind::Person, Some(key), person.full_name());
        let registry = self.registry;
        for &(kind, entity) in targets {
            if !self.index.contacts_of(kind, entity).contains(&key) {
                continue;
            }
            self.executor.execute(&person_ref, &format!("unlink from {kind} {entity}"), (), || {
                registry.unlink_person(kind, entity, key)
            })?;
            self.index.unlink(kind, entity, key);
        }
        Ok(())
    }
}

fn targets(institution: &Institution, collection: &Collection) -> Vec<(EntityKind, EntityKey)> {
    institution
        .key
        .map(|k| (EntityKind::Institution, k))
        .into_iter()
        .chain(collection.key.map(|k| (EntityKind::Collection, k)))
        .collect()
}

fn primary(targets: &Targets, kind: EntityKind) -> Option<EntityKey> {
    targets.iter().find(|(k, _)| *k == kind).map(|(_, key)| *key)
}
