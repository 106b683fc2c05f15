//! In-memory lookup maps over the bulk-loaded registry.
//!
//! Built once per run and updated after every successful mutation, so later
//! records see entities created or changed by earlier ones without re-fetching.
//! Only the single reconcile thread touches it.

use std::collections::{HashMap, HashSet};

use collsync_core::{
    types::{Collection, EntityKey, EntityKind, Identifier, Institution, MachineTag, Person},
    ExternalRef,
};

use crate::normalize::normalize;

/// Canonical lookup key of an identifier or tag. Values compare
/// case-insensitively.
fn identifier_key(id: &Identifier) -> String {
    format!("id|{}|{}", id.id_type, id.value.trim().to_lowercase())
}

fn tag_key(tag: &MachineTag) -> String {
    format!(
        "tag|{}|{}|{}",
        tag.namespace.to_lowercase(),
        tag.name.to_lowercase(),
        tag.value.trim().to_lowercase()
    )
}

pub(crate) fn ref_key(r: &ExternalRef) -> String {
    match r {
        ExternalRef::Identifier { id_type, value } => {
            identifier_key(&Identifier::new(*id_type, value.clone()))
        }
        ExternalRef::Tag { namespace, name, value } => {
            tag_key(&MachineTag::new(namespace.clone(), name.clone(), value.clone()))
        }
    }
}

fn entity_ref_keys(identifiers: &[Identifier], tags: &[MachineTag]) -> Vec<String> {
    identifiers
        .iter()
        .map(identifier_key)
        .chain(tags.iter().map(tag_key))
        .collect()
}

#[derive(Debug, Default)]
pub struct MatchIndex {
    institutions: HashMap<EntityKey, Institution>,
    collections: HashMap<EntityKey, Collection>,
    persons: HashMap<EntityKey, Person>,
    /// Insertion order, for deterministic candidate lists.
    institution_order: Vec<EntityKey>,
    collection_order: Vec<EntityKey>,
    person_order: Vec<EntityKey>,
    institutions_by_ref: HashMap<String, Vec<EntityKey>>,
    collections_by_ref: HashMap<String, Vec<EntityKey>>,
    collections_by_institution: HashMap<EntityKey, Vec<EntityKey>>,
    /// Institutions created during this run, by normalized code.
    created_institutions: HashMap<String, EntityKey>,
    /// Collections created during this run, with the record that created them.
    created_collections: HashMap<EntityKey, String>,
}

impl MatchIndex {
    /// Index a bulk load. Entities without a key are skipped.
    pub fn build(
        institutions: Vec<Institution>,
        collections: Vec<Collection>,
        persons: Vec<Person>,
    ) -> Self {
        let mut index = Self::default();
        for institution in institutions {
            index.upsert_institution(institution);
        }
        for collection in collections {
            index.upsert_collection(collection);
        }
        for person in persons {
            index.upsert_person(person);
        }
        tracing::debug!(
            institutions = index.institutions.len(),
            collections = index.collections.len(),
            persons = index.persons.len(),
            "match index built"
        );
        index
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn institution(&self, key: EntityKey) -> Option<&Institution> {
        self.institutions.get(&key)
    }

    pub fn collection(&self, key: EntityKey) -> Option<&Collection> {
        self.collections.get(&key)
    }

    pub fn person(&self, key: EntityKey) -> Option<&Person> {
        self.persons.get(&key)
    }

    pub fn institutions(&self) -> impl Iterator<Item = &Institution> {
        self.institution_order.iter().filter_map(|k| self.institutions.get(k))
    }

    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collection_order.iter().filter_map(|k| self.collections.get(k))
    }

    pub fn persons(&self) -> impl Iterator<Item = &Person> {
        self.person_order.iter().filter_map(|k| self.persons.get(k))
    }

    /// Institutions carrying any of `refs`, deduplicated, in index order.
    pub fn institutions_by_refs(&self, refs: &[ExternalRef]) -> Vec<EntityKey> {
        lookup_refs(&self.institutions_by_ref, refs)
    }

    pub fn collections_by_refs(&self, refs: &[ExternalRef]) -> Vec<EntityKey> {
        lookup_refs(&self.collections_by_ref, refs)
    }

    pub fn collections_of(&self, institution: EntityKey) -> impl Iterator<Item = &Collection> {
        self.collections_by_institution
            .get(&institution)
            .into_iter()
            .flatten()
            .filter_map(|k| self.collections.get(k))
    }

    pub fn created_institution_by_code(&self, code: &str) -> Option<EntityKey> {
        self.created_institutions.get(&normalize(code)).copied()
    }

    /// `true` when `collection` was created this run by a record other than
    /// `record_id`.
    pub fn created_by_other_record(&self, collection: EntityKey, record_id: &str) -> bool {
        self.created_collections
            .get(&collection)
            .is_some_and(|creator| creator != record_id)
    }

    /// Persons linked as contacts to any of `entities`, deduplicated.
    pub fn linked_persons(&self, entities: &[(EntityKind, EntityKey)]) -> Vec<&Person> {
        let mut seen = HashSet::new();
        entities
            .iter()
            .flat_map(|(kind, key)| self.contacts_of(*kind, *key).to_vec())
            .filter(|p| seen.insert(*p))
            .filter_map(|p| self.persons.get(&p))
            .collect()
    }

    pub fn contacts_of(&self, kind: EntityKind, key: EntityKey) -> &[EntityKey] {
        match kind {
            EntityKind::Institution => self
                .institutions
                .get(&key)
                .map_or(&[][..], |i| &i.contact_persons[..]),
            EntityKind::Collection => self
                .collections
                .get(&key)
                .map_or(&[][..], |c| &c.contact_persons[..]),
            EntityKind::Person => &[],
        }
    }

    // -----------------------------------------------------------------------
    // Updates after mutations
    // -----------------------------------------------------------------------

    pub fn upsert_institution(&mut self, institution: Institution) {
        let Some(key) = institution.key else { return };
        if let Some(old) = self.institutions.get(&key) {
            for rk in entity_ref_keys(&old.identifiers, &old.machine_tags) {
                remove_from(&mut self.institutions_by_ref, &rk, key);
            }
        } else {
            self.institution_order.push(key);
        }
        for rk in entity_ref_keys(&institution.identifiers, &institution.machine_tags) {
            push_unique(self.institutions_by_ref.entry(rk).or_default(), key);
        }
        self.institutions.insert(key, institution);
    }

    pub fn upsert_collection(&mut self, collection: Collection) {
        let Some(key) = collection.key else { return };
        if let Some(old) = self.collections.get(&key) {
            for rk in entity_ref_keys(&old.identifiers, &old.machine_tags) {
                remove_from(&mut self.collections_by_ref, &rk, key);
            }
            if let Some(parent) = old.institution_key {
                remove_from(&mut self.collections_by_institution, &parent, key);
            }
        } else {
            self.collection_order.push(key);
        }
        for rk in entity_ref_keys(&collection.identifiers, &collection.machine_tags) {
            push_unique(self.collections_by_ref.entry(rk).or_default(), key);
        }
        if let Some(parent) = collection.institution_key {
            push_unique(self.collections_by_institution.entry(parent).or_default(), key);
        }
        self.collections.insert(key, collection);
    }

    pub fn upsert_person(&mut self, person: Person) {
        let Some(key) = person.key else { return };
        if !self.persons.contains_key(&key) {
            self.person_order.push(key);
        }
        self.persons.insert(key, person);
    }

    pub fn record_created_institution(&mut self, key: EntityKey, code: &str) {
        self.created_institutions.insert(normalize(code), key);
    }

    pub fn record_created_collection(&mut self, key: EntityKey, record_id: &str) {
        self.created_collections.insert(key, record_id.to_string());
    }

    pub fn link(&mut self, kind: EntityKind, entity: EntityKey, person: EntityKey) {
        if let Some(contacts) = self.contacts_mut(kind, entity) {
            push_unique(contacts, person);
        }
    }

    pub fn unlink(&mut self, kind: EntityKind, entity: EntityKey, person: EntityKey) {
        if let Some(contacts) = self.contacts_mut(kind, entity) {
            contacts.retain(|k| *k != person);
        }
    }

    fn contacts_mut(&mut self, kind: EntityKind, key: EntityKey) -> Option<&mut Vec<EntityKey>> {
        match kind {
            EntityKind::Institution => self.institutions.get_mut(&key).map(|i| &mut i.contact_persons),
            EntityKind::Collection => self.collections.get_mut(&key).map(|c| &mut c.contact_persons),
            EntityKind::Person => None,
        }
    }
}

fn lookup_refs(map: &HashMap<String, Vec<EntityKey>>, refs: &[ExternalRef]) -> Vec<EntityKey> {
    let mut found = Vec::new();
    for r in refs {
        for key in map.get(&ref_key(r)).into_iter().flatten() {
            push_unique(&mut found, *key);
        }
    }
    found
}

fn push_unique(keys: &mut Vec<EntityKey>, key: EntityKey) {
    if !keys.contains(&key) {
        keys.push(key);
    }
}

fn remove_from<K: std::hash::Hash + Eq>(map: &mut HashMap<K, Vec<EntityKey>>, k: &K, key: EntityKey) {
    if let Some(keys) = map.get_mut(k) {
        keys.retain(|x| *x != key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collsync_core::types::IdentifierType;

    fn institution(code: &str, irn: u32) -> Institution {
        Institution {
            key: Some(EntityKey::random()),
            code: code.into(),
            name: format!("Herbarium {code}"),
            identifiers: vec![Identifier::irn(irn)],
            ..Default::default()
        }
    }

    fn irn_ref(irn: u32) -> ExternalRef {
        ExternalRef::Identifier {
            id_type: IdentifierType::Irn,
            value: Identifier::irn(irn).value,
        }
    }

    #[test]
    fn lookup_by_identifier_ignores_case() {
        let inst = institution("NY", 1);
        let key = inst.key.unwrap();
        let index = MatchIndex::build(vec![inst], vec![], vec![]);
        let r = ExternalRef::Identifier {
            id_type: IdentifierType::Irn,
            value: "GBIF:IH:IRN:1".into(),
        };
        assert_eq!(index.institutions_by_refs(&[r]), vec![key]);
        assert!(index.institutions_by_refs(&[irn_ref(2)]).is_empty());
    }

    #[test]
    fn upsert_reindexes_changed_identifiers() {
        let mut inst = institution("NY", 1);
        let mut index = MatchIndex::build(vec![inst.clone()], vec![], vec![]);
        inst.identifiers = vec![Identifier::irn(2)];
        index.upsert_institution(inst);
        assert!(index.institutions_by_refs(&[irn_ref(1)]).is_empty());
        assert_eq!(index.institutions_by_refs(&[irn_ref(2)]).len(), 1);
        assert_eq!(index.institutions().count(), 1);
    }

    #[test]
    fn collections_follow_parent_changes() {
        let a = institution("A", 1);
        let b = institution("B", 2);
        let mut coll = Collection {
            key: Some(EntityKey::random()),
            code: "C".into(),
            name: "C".into(),
            institution_key: a.key,
            ..Default::default()
        };
        let mut index = MatchIndex::build(vec![a.clone(), b.clone()], vec![coll.clone()], vec![]);
        assert_eq!(index.collections_of(a.key.unwrap()).count(), 1);
        coll.institution_key = b.key;
        index.upsert_collection(coll);
        assert_eq!(index.collections_of(a.key.unwrap()).count(), 0);
        assert_eq!(index.collections_of(b.key.unwrap()).count(), 1);
    }

    #[test]
    fn linked_persons_are_deduplicated_across_entities() {
        let person = Person {
            key: Some(EntityKey::random()),
            first_name: Some("Ana".into()),
            ..Default::default()
        };
        let pk = person.key.unwrap();
        let mut inst = institution("A", 1);
        inst.contact_persons = vec![pk];
        let coll = Collection {
            key: Some(EntityKey::random()),
            code: "C".into(),
            name: "C".into(),
            institution_key: inst.key,
            contact_persons: vec![pk],
            ..Default::default()
        };
        let targets = [
            (EntityKind::Institution, inst.key.unwrap()),
            (EntityKind::Collection, coll.key.unwrap()),
        ];
        let index = MatchIndex::build(vec![inst], vec![coll], vec![person]);
        assert_eq!(index.linked_persons(&targets).len(), 1);
    }

    #[test]
    fn created_collection_is_reserved_for_its_record() {
        let mut index = MatchIndex::default();
        let key = EntityKey::random();
        index.record_created_collection(key, "r-1");
        assert!(!index.created_by_other_record(key, "r-1"));
        assert!(index.created_by_other_record(key, "r-2"));
    }
}
