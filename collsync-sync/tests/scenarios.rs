//! End-to-end runs against an in-memory registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use collsync_core::{
    registry::{Page, PagingResponse},
    Collection, EntityKey, EntityKind, ExternalRef, ExternalSource, Identifier, IdentifierType,
    Institution, MachineTag, MasterSource, MasterSourceMetadata, Person, RegistryError,
    RegistrySnapshot, RegistrySource, SnapshotRegistry, SourceError, SourceKind, SourceRecord,
    SourceStaff, StaffThresholds,
};
use collsync_sync::{
    run, ConflictOutcome, FailedAction, Notifier, NotifyError, StaffConflict, SyncContext,
    SyncReport,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Snapshot registry that counts mutations and can refuse to create a given
/// institution or collection code.
struct Recording {
    inner: SnapshotRegistry,
    mutations: AtomicUsize,
    refuse_code: Option<String>,
    refuse_collection_code: Option<String>,
}

impl Recording {
    fn new(snapshot: RegistrySnapshot) -> Self {
        Self {
            inner: SnapshotRegistry::in_memory(snapshot),
            mutations: AtomicUsize::new(0),
            refuse_code: None,
            refuse_collection_code: None,
        }
    }

    fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> RegistrySnapshot {
        self.inner.snapshot()
    }

    fn bump(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

impl RegistrySource for Recording {
    fn list_institutions(&self, page: Page) -> Result<PagingResponse<Institution>, RegistryError> {
        self.inner.list_institutions(page)
    }

    fn list_collections(&self, page: Page) -> Result<PagingResponse<Collection>, RegistryError> {
        self.inner.list_collections(page)
    }

    fn list_persons(&self, page: Page) -> Result<PagingResponse<Person>, RegistryError> {
        self.inner.list_persons(page)
    }

    fn get_institution(&self, key: EntityKey) -> Result<Institution, RegistryError> {
        self.inner.get_institution(key)
    }

    fn get_collection(&self, key: EntityKey) -> Result<Collection, RegistryError> {
        self.inner.get_collection(key)
    }

    fn get_person(&self, key: EntityKey) -> Result<Person, RegistryError> {
        self.inner.get_person(key)
    }

    fn create_institution(&self, institution: &Institution) -> Result<EntityKey, RegistryError> {
        self.bump();
        if self.refuse_code.as_deref() == Some(institution.code.as_str()) {
            return Err(RegistryError::Rejected {
                action: "create institution".into(),
                message: "refused by test".into(),
            });
        }
        self.inner.create_institution(institution)
    }

    fn update_institution(&self, institution: &Institution) -> Result<(), RegistryError> {
        self.bump();
        self.inner.update_institution(institution)
    }

    fn create_collection(&self, collection: &Collection) -> Result<EntityKey, RegistryError> {
        self.bump();
        if self.refuse_collection_code.as_deref() == Some(collection.code.as_str()) {
            return Err(RegistryError::Rejected {
                action: "create collection".into(),
                message: "refused by test".into(),
            });
        }
        self.inner.create_collection(collection)
    }

    fn update_collection(&self, collection: &Collection) -> Result<(), RegistryError> {
        self.bump();
        self.inner.update_collection(collection)
    }

    fn create_person(&self, person: &Person) -> Result<EntityKey, RegistryError> {
        self.bump();
        self.inner.create_person(person)
    }

    fn update_person(&self, person: &Person) -> Result<(), RegistryError> {
        self.bump();
        self.inner.update_person(person)
    }

    fn add_identifier(
        &self,
        kind: EntityKind,
        key: EntityKey,
        identifier: &Identifier,
    ) -> Result<(), RegistryError> {
        self.bump();
        self.inner.add_identifier(kind, key, identifier)
    }

    fn add_machine_tag(
        &self,
        kind: EntityKind,
        key: EntityKey,
        tag: &MachineTag,
    ) -> Result<(), RegistryError> {
        self.bump();
        self.inner.add_machine_tag(kind, key, tag)
    }

    fn add_master_source(
        &self,
        kind: EntityKind,
        key: EntityKey,
        metadata: &MasterSourceMetadata,
    ) -> Result<(), RegistryError> {
        self.bump();
        self.inner.add_master_source(kind, key, metadata)
    }

    fn link_person(
        &self,
        kind: EntityKind,
        entity: EntityKey,
        person: EntityKey,
    ) -> Result<(), RegistryError> {
        self.bump();
        self.inner.link_person(kind, entity, person)
    }

    fn unlink_person(
        &self,
        kind: EntityKind,
        entity: EntityKey,
        person: EntityKey,
    ) -> Result<(), RegistryError> {
        self.bump();
        self.inner.unlink_person(kind, entity, person)
    }
}

struct Fixed(SourceKind, Vec<SourceRecord>);

impl ExternalSource for Fixed {
    fn kind(&self) -> SourceKind {
        self.0
    }

    fn list_records(&self) -> Result<Vec<SourceRecord>, SourceError> {
        Ok(self.1.clone())
    }
}

#[derive(Default)]
struct Collecting {
    sent: Mutex<Vec<String>>,
}

impl Collecting {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("lock").clone()
    }
}

impl Notifier for Collecting {
    fn send_conflict(&self, conflict: &ConflictOutcome) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("lock")
            .push(format!("conflict:{}", conflict.record.record_id));
        Ok(())
    }

    fn send_invalid_record(&self, record: &SourceRecord, _: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("lock")
            .push(format!("invalid:{}", record.record_id));
        Ok(())
    }

    fn send_staff_conflict(
        &self,
        record: &SourceRecord,
        _: &StaffConflict,
    ) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("lock")
            .push(format!("staff-conflict:{}", record.record_id));
        Ok(())
    }

    fn send_failure_digest(&self, failures: &[FailedAction]) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("lock")
            .push(format!("digest:{}", failures.len()));
        Ok(())
    }
}

fn irn_ref(irn: u32) -> ExternalRef {
    ExternalRef::Identifier {
        id_type: IdentifierType::Irn,
        value: Identifier::irn(irn).value,
    }
}

fn herbarium_record(irn: u32, code: &str, name: &str) -> SourceRecord {
    let mut r = SourceRecord::new(SourceKind::Herbarium, irn.to_string());
    r.institution_refs.push(irn_ref(irn));
    r.collection_refs.push(irn_ref(irn));
    r.institution_code = Some(code.into());
    r.institution_name = Some(name.into());
    r.active = Some(true);
    r
}

fn mastered(irn: u32) -> Option<MasterSourceMetadata> {
    Some(MasterSourceMetadata {
        source: MasterSource::Herbarium,
        source_id: irn.to_string(),
    })
}

/// Institution and child collection exactly as a run over
/// `herbarium_record(irn, code, name)` would have left them.
fn synced_pair(irn: u32, code: &str, name: &str) -> (Institution, Collection) {
    let institution = Institution {
        key: Some(EntityKey::random()),
        code: code.into(),
        name: name.into(),
        active: true,
        identifiers: vec![Identifier::irn(irn)],
        master_source: mastered(irn),
        ..Default::default()
    };
    let collection = Collection {
        key: Some(EntityKey::random()),
        code: code.into(),
        name: name.into(),
        institution_key: institution.key,
        active: true,
        identifiers: vec![Identifier::irn(irn)],
        master_source: mastered(irn),
        ..Default::default()
    };
    (institution, collection)
}

fn person(first: &str, last: &str, email: Option<&str>, irn: Option<u32>) -> Person {
    Person {
        key: Some(EntityKey::random()),
        first_name: Some(first.into()),
        last_name: Some(last.into()),
        email: email.map(str::to_string),
        identifiers: irn.map(Identifier::irn).into_iter().collect(),
        ..Default::default()
    }
}

fn staff_entry(first: &str, last: &str, email: Option<&str>, irn: Option<&str>) -> SourceStaff {
    SourceStaff {
        irn: irn.map(str::to_string),
        first_name: Some(first.into()),
        last_name: Some(last.into()),
        email: email.map(str::to_string),
        ..Default::default()
    }
}

fn context(
    registry: Arc<Recording>,
    records: Vec<SourceRecord>,
    notifier: Option<Arc<Collecting>>,
    dry_run: bool,
) -> SyncContext {
    SyncContext {
        registry,
        herbarium: Some(Arc::new(Fixed(SourceKind::Herbarium, records))),
        aggregator: None,
        notifier: notifier.map(|n| n as Arc<dyn Notifier>),
        thresholds: StaffThresholds::default(),
        page_size: 2,
        dry_run,
    }
}

async fn run_herbarium(ctx: &SyncContext) -> SyncReport {
    run(ctx, SourceKind::Herbarium).await.expect("run")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unmatched_record_creates_institution_and_child_collection() {
    let registry = Arc::new(Recording::new(RegistrySnapshot::default()));
    let mut record = SourceRecord::new(SourceKind::Herbarium, "r-1");
    record.institution_code = Some("C1".into());
    record.institution_name = Some("Org1".into());

    let report = run_herbarium(&context(registry.clone(), vec![record], None, false)).await;

    assert_eq!(report.no_match.len(), 1);
    assert!(report.failed_actions.is_empty());
    let snapshot = registry.snapshot();
    assert_eq!(snapshot.institutions.len(), 1);
    assert_eq!(snapshot.institutions[0].code, "C1");
    assert_eq!(snapshot.institutions[0].name, "Org1");
    assert_eq!(snapshot.collections.len(), 1);
    assert_eq!(snapshot.collections[0].institution_key, snapshot.institutions[0].key);
    assert!(snapshot.persons.is_empty());
}

#[tokio::test]
async fn identical_record_reports_no_update() {
    let (institution, collection) = synced_pair(1, "C1", "Org1");
    let registry = Arc::new(Recording::new(RegistrySnapshot {
        institutions: vec![institution],
        collections: vec![collection],
        ..Default::default()
    }));

    let ctx = context(registry.clone(), vec![herbarium_record(1, "C1", "Org1")], None, false);
    let report = run_herbarium(&ctx).await;

    assert_eq!(report.both.len(), 1);
    let both = &report.both[0];
    assert!(!both.institution.update);
    assert!(!both.collection.update);
    assert!(both.institution.merged.lenient_eq(&both.institution.matched));
    assert_eq!(registry.mutations(), 0);
}

#[tokio::test]
async fn changed_code_keeps_prior_code_as_alternative() {
    let (institution, collection) = synced_pair(1, "C1", "Org1");
    let registry = Arc::new(Recording::new(RegistrySnapshot {
        institutions: vec![institution],
        collections: vec![collection],
        ..Default::default()
    }));

    let ctx = context(registry.clone(), vec![herbarium_record(1, "C2", "Org1")], None, false);
    let report = run_herbarium(&ctx).await;

    assert_eq!(report.both.len(), 1);
    let merged = &report.both[0].institution;
    assert!(merged.update);
    assert_eq!(merged.merged.code, "C2");
    assert!(merged.merged.alternative_codes.iter().any(|a| a.code == "C1"));

    let stored = &registry.snapshot().institutions[0];
    assert_eq!(stored.code, "C2");
    assert!(stored.alternative_codes.iter().any(|a| a.code == "C1"));
}

#[tokio::test]
async fn equally_plausible_collections_conflict_without_mutation() {
    let institution = Institution {
        key: Some(EntityKey::random()),
        code: "NY".into(),
        name: "New York Botanical Garden".into(),
        active: true,
        identifiers: vec![Identifier::irn(1)],
        ..Default::default()
    };
    let twin = || Collection {
        key: Some(EntityKey::random()),
        code: "NY".into(),
        name: "Herbarium".into(),
        institution_key: institution.key,
        active: true,
        ..Default::default()
    };
    let snapshot = RegistrySnapshot {
        collections: vec![twin(), twin()],
        institutions: vec![institution.clone()],
        ..Default::default()
    };
    let registry = Arc::new(Recording::new(snapshot));
    let notifier = Arc::new(Collecting::default());

    let mut record = herbarium_record(1, "NY", "New York Botanical Garden");
    record.collection_refs.clear();
    record.collection_name = Some("Herbarium".into());
    let ctx = context(registry.clone(), vec![record], Some(notifier.clone()), false);
    let report = run_herbarium(&ctx).await;

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].collections.len(), 2);
    assert_eq!(report.summary.creates() + report.summary.updates(), 0);
    assert_eq!(registry.mutations(), 0);
    assert_eq!(notifier.sent(), vec!["conflict:1".to_string()]);
}

#[tokio::test]
async fn email_only_match_found_among_linked_persons() {
    let person = Person {
        key: Some(EntityKey::random()),
        first_name: Some("Maria".into()),
        last_name: Some("Gomez".into()),
        email: Some("herbarium@example.org".into()),
        ..Default::default()
    };
    let (mut institution, collection) = synced_pair(1, "C1", "Org1");
    institution.contact_persons.extend(person.key);
    let registry = Arc::new(Recording::new(RegistrySnapshot {
        institutions: vec![institution],
        collections: vec![collection],
        persons: vec![person.clone()],
    }));

    let mut record = herbarium_record(1, "C1", "Org1");
    record.staff.push(SourceStaff {
        first_name: Some("Curator".into()),
        last_name: Some("Office".into()),
        email: Some("herbarium@example.org".into()),
        ..Default::default()
    });
    let report = run_herbarium(&context(registry.clone(), vec![record], None, false)).await;

    let staff = &report.both[0].staff;
    assert!(staff.created.is_empty());
    assert_eq!(staff.updated.len(), 1);
    assert_eq!(staff.updated[0].matched.key, person.key);
    assert!(staff.removed.is_empty());
    assert_eq!(registry.snapshot().persons.len(), 1);
}

#[tokio::test]
async fn linked_person_without_staff_entry_is_unlinked() {
    let former = person("Old", "Curator", None, None);
    let (mut institution, mut collection) = synced_pair(1, "C1", "Org1");
    institution.contact_persons.extend(former.key);
    collection.contact_persons.extend(former.key);
    let registry = Arc::new(Recording::new(RegistrySnapshot {
        institutions: vec![institution],
        collections: vec![collection],
        persons: vec![former.clone()],
    }));

    let mut record = herbarium_record(1, "C1", "Org1");
    record.staff.push(staff_entry("Ana", "Lima", Some("ana@example.org"), None));
    let report = run_herbarium(&context(registry.clone(), vec![record], None, false)).await;

    let staff = &report.both[0].staff;
    assert_eq!(staff.created.len(), 1);
    assert_eq!(staff.removed.len(), 1);
    assert_eq!(staff.removed[0].key, former.key);
    assert_eq!(report.summary.persons_removed, 1);

    let snapshot = registry.snapshot();
    let created = staff.created[0].key.expect("created key");
    assert_eq!(snapshot.institutions[0].contact_persons, vec![created]);
    assert_eq!(snapshot.collections[0].contact_persons, vec![created]);
    // Unlinked, not deleted.
    assert_eq!(snapshot.persons.len(), 2);
}

#[tokio::test]
async fn institution_only_match_creates_collection_and_shares_its_person() {
    let curator = person("Ana", "Lima", None, Some(300));
    let (mut institution, _) = synced_pair(5, "RB", "Jardim Botanico");
    institution.contact_persons.extend(curator.key);
    let registry = Arc::new(Recording::new(RegistrySnapshot {
        institutions: vec![institution.clone()],
        collections: vec![],
        persons: vec![curator.clone()],
    }));

    let mut record = herbarium_record(5, "RB", "Jardim Botanico");
    record.staff.push(staff_entry("Ana", "Lima", None, Some("300")));
    let report = run_herbarium(&context(registry.clone(), vec![record], None, false)).await;

    assert_eq!(report.only_institution.len(), 1);
    let outcome = &report.only_institution[0];
    assert_eq!(outcome.new_collection.institution_key, institution.key);
    assert!(outcome.staff.created.is_empty());
    assert!(outcome.staff.removed.is_empty());
    assert_eq!(outcome.staff.updated.len(), 1);
    assert_eq!(outcome.staff.updated[0].matched.key, curator.key);

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.persons.len(), 1);
    assert_eq!(snapshot.collections.len(), 1);
    assert_eq!(snapshot.collections[0].contact_persons, vec![curator.key.expect("key")]);
    assert_eq!(snapshot.institutions[0].contact_persons, vec![curator.key.expect("key")]);
}

#[tokio::test]
async fn collection_only_match_updates_the_collection() {
    let (mut institution, collection) = synced_pair(6, "RB", "Herbario RB");
    institution.identifiers.clear();
    institution.master_source = None;
    let registry = Arc::new(Recording::new(RegistrySnapshot {
        institutions: vec![institution],
        collections: vec![collection.clone()],
        ..Default::default()
    }));

    let mut record = herbarium_record(6, "RB", "Herbario RB");
    record.collection_name = Some("Herbario Dimitri Sucre Benjamin".into());
    let report = run_herbarium(&context(registry.clone(), vec![record], None, false)).await;

    assert_eq!(report.only_collection.len(), 1);
    let outcome = &report.only_collection[0];
    assert!(outcome.collection.update);
    assert_eq!(outcome.collection.merged.key, collection.key);

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.institutions.len(), 1);
    assert_eq!(snapshot.collections.len(), 1);
    assert_eq!(snapshot.collections[0].name, "Herbario Dimitri Sucre Benjamin");
    assert!(snapshot.institutions[0].identifiers.is_empty());
}

#[tokio::test]
async fn institutions_sharing_an_identifier_conflict_without_mutation() {
    let twin = |code: &str| Institution {
        key: Some(EntityKey::random()),
        code: code.into(),
        name: format!("{code} Herbarium"),
        active: true,
        identifiers: vec![Identifier::irn(3)],
        ..Default::default()
    };
    let registry = Arc::new(Recording::new(RegistrySnapshot {
        institutions: vec![twin("A"), twin("B")],
        ..Default::default()
    }));
    let notifier = Arc::new(Collecting::default());

    let record = herbarium_record(3, "A", "A Herbarium");
    let ctx = context(registry.clone(), vec![record], Some(notifier.clone()), false);
    let report = run_herbarium(&ctx).await;

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].institutions.len(), 2);
    assert_eq!(report.conflicts[0].reason, "2 institution and 0 collection candidates");
    assert_eq!(registry.mutations(), 0);
    assert_eq!(notifier.sent(), vec!["conflict:3".to_string()]);
}

#[tokio::test]
async fn same_code_twice_reuses_the_institution_created_this_run() {
    let registry = Arc::new(Recording::new(RegistrySnapshot::default()));
    let record = |id: &str, collection: &str| {
        let mut r = SourceRecord::new(SourceKind::Herbarium, id);
        r.institution_code = Some("C9".into());
        r.institution_name = Some("Org9".into());
        r.collection_name = Some(collection.into());
        r
    };
    let records = vec![record("a", "Vascular Plants"), record("b", "Fungi")];

    let report = run_herbarium(&context(registry.clone(), records, None, false)).await;

    assert_eq!(report.no_match.len(), 1);
    assert_eq!(report.no_match[0].record_id, "a");
    assert_eq!(report.only_institution.len(), 1);
    assert_eq!(report.only_institution[0].record_id, "b");

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.institutions.len(), 1);
    assert_eq!(snapshot.collections.len(), 2);
    let parent = snapshot.institutions[0].key;
    assert!(snapshot.collections.iter().all(|c| c.institution_key == parent));
}

#[tokio::test]
async fn tied_staff_candidates_are_reported_and_notified() {
    let (institution, collection) = synced_pair(1, "C1", "Org1");
    let registry = Arc::new(Recording::new(RegistrySnapshot {
        institutions: vec![institution],
        collections: vec![collection],
        persons: vec![
            person("Ana", "Lima", Some("ana@example.org"), None),
            person("Ana", "Lima", Some("ana@example.org"), None),
        ],
    }));
    let notifier = Arc::new(Collecting::default());

    let mut record = herbarium_record(1, "C1", "Org1");
    record.staff.push(staff_entry("Ana", "Lima", Some("ana@example.org"), None));
    let ctx = context(registry.clone(), vec![record], Some(notifier.clone()), false);
    let report = run_herbarium(&ctx).await;

    let staff = &report.both[0].staff;
    assert_eq!(staff.conflicts.len(), 1);
    assert_eq!(staff.conflicts[0].candidates.len(), 2);
    assert!(staff.created.is_empty() && staff.updated.is_empty());
    assert_eq!(report.summary.staff_conflicts, 1);
    assert_eq!(registry.mutations(), 0);
    assert_eq!(notifier.sent(), vec!["staff-conflict:1".to_string()]);
}

#[tokio::test]
async fn staff_irn_finds_its_owner_outside_the_linked_persons() {
    let owner = person("Ana", "Lima", None, Some(200));
    let namesake = person("Ana", "Lima", None, Some(100));
    let (mut institution, collection) = synced_pair(1, "C1", "Org1");
    institution.contact_persons.extend(namesake.key);
    let registry = Arc::new(Recording::new(RegistrySnapshot {
        institutions: vec![institution],
        collections: vec![collection],
        persons: vec![owner.clone(), namesake.clone()],
    }));

    let mut record = herbarium_record(1, "C1", "Org1");
    record.staff.push(staff_entry("Ana", "Lima", None, Some("200")));
    let report = run_herbarium(&context(registry.clone(), vec![record], None, false)).await;

    let staff = &report.both[0].staff;
    assert_eq!(staff.updated.len(), 1);
    assert_eq!(staff.updated[0].matched.key, owner.key);
    assert_eq!(staff.removed.len(), 1);
    assert_eq!(staff.removed[0].key, namesake.key);

    let snapshot = registry.snapshot();
    let irn_200 = Identifier::irn(200);
    let holders = snapshot
        .persons
        .iter()
        .filter(|p| p.identifiers.contains(&irn_200))
        .count();
    assert_eq!(holders, 1);
    assert_eq!(snapshot.institutions[0].contact_persons, vec![owner.key.expect("key")]);
}

#[tokio::test]
async fn aggregator_run_creates_then_settles() {
    let tag = |name: &str, value: &str| ExternalRef::Tag {
        namespace: "idigbio.org".into(),
        name: name.into(),
        value: value.into(),
    };
    let mut record = SourceRecord::new(SourceKind::Aggregator, "c-1");
    record.institution_refs.push(tag("uniqueNameUUID", "u-1"));
    record.collection_refs.push(tag("CollectionUUID", "c-1"));
    record.institution_code = Some("MICH".into());
    record.institution_name = Some("University of Michigan".into());
    record.collection_code = Some("MICH-V".into());
    record.collection_name = Some("Vascular plants".into());

    let registry = Arc::new(Recording::new(RegistrySnapshot::default()));
    let mut ctx = context(registry.clone(), Vec::new(), None, false);
    ctx.herbarium = None;
    ctx.aggregator = Some(Arc::new(Fixed(SourceKind::Aggregator, vec![record])));

    let first = run(&ctx, SourceKind::Aggregator).await.expect("first run");
    assert_eq!(first.source, SourceKind::Aggregator);
    assert_eq!(first.no_match.len(), 1);
    let snapshot = registry.snapshot();
    assert_eq!(snapshot.institutions[0].code, "MICH");
    assert_eq!(snapshot.collections[0].code, "MICH-V");
    assert!(snapshot.collections[0]
        .machine_tags
        .contains(&MachineTag::new("idigbio.org", "CollectionUUID", "c-1")));
    let mutations = registry.mutations();

    let second = run(&ctx, SourceKind::Aggregator).await.expect("second run");
    assert_eq!(second.both.len(), 1);
    assert_eq!(second.summary.creates() + second.summary.updates(), 0);
    assert_eq!(registry.mutations(), mutations);
}

// ---------------------------------------------------------------------------
// Run-level properties
// ---------------------------------------------------------------------------

fn staffed_record() -> SourceRecord {
    let mut record = herbarium_record(42, "MICH", "University of Michigan Herbarium");
    record.staff.push(SourceStaff {
        irn: Some("9001".into()),
        first_name: Some("Richard".into()),
        middle_name: Some("K.".into()),
        last_name: Some("Rabeler".into()),
        email: Some("rabeler@example.edu".into()),
        ..Default::default()
    });
    record
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let registry = Arc::new(Recording::new(RegistrySnapshot::default()));
    let ctx = context(registry.clone(), vec![staffed_record()], None, false);

    let first = run_herbarium(&ctx).await;
    assert_eq!(first.summary.institutions_created, 1);
    assert_eq!(first.summary.persons_created, 1);
    let after_first = registry.snapshot();
    let mutations = registry.mutations();

    let second = run_herbarium(&ctx).await;
    assert_eq!(second.both.len(), 1);
    assert_eq!(second.summary.creates(), 0);
    assert_eq!(second.summary.updates(), 0);
    assert_eq!(second.summary.persons_removed, 0);
    assert_eq!(registry.mutations(), mutations);

    let after_second = registry.snapshot();
    assert_eq!(
        after_second.institutions[0].identifiers.len(),
        after_first.institutions[0].identifiers.len()
    );
    assert_eq!(after_second.persons.len(), 1);
    assert_eq!(after_second.persons[0].identifiers.len(), 1);
}

#[tokio::test]
async fn dry_run_issues_no_mutations() {
    let registry = Arc::new(Recording::new(RegistrySnapshot::default()));
    let notifier = Arc::new(Collecting::default());
    let mut invalid = SourceRecord::new(SourceKind::Herbarium, "7");
    invalid.institution_name = Some("Nameless Code Herbarium".into());
    let ctx = context(
        registry.clone(),
        vec![staffed_record(), invalid],
        Some(notifier.clone()),
        true,
    );

    let report = run_herbarium(&ctx).await;

    assert!(report.dry_run);
    assert_eq!(report.no_match.len(), 1);
    assert_eq!(report.summary.persons_created, 1);
    assert_eq!(report.invalid.len(), 1);
    assert_eq!(registry.mutations(), 0);
    assert!(registry.snapshot().institutions.is_empty());
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn invalid_record_is_reported_and_notified() {
    let registry = Arc::new(Recording::new(RegistrySnapshot::default()));
    let notifier = Arc::new(Collecting::default());
    let mut record = SourceRecord::new(SourceKind::Herbarium, "8");
    record.institution_code = Some("XX".into());
    let ctx = context(registry.clone(), vec![record], Some(notifier.clone()), false);

    let report = run_herbarium(&ctx).await;

    assert_eq!(report.invalid.len(), 1);
    assert_eq!(report.invalid[0].reason, "record has no name");
    assert_eq!(registry.mutations(), 0);
    assert_eq!(notifier.sent(), vec!["invalid:8".to_string()]);
}

#[tokio::test]
async fn failed_call_only_abandons_its_record() {
    let mut recording = Recording::new(RegistrySnapshot::default());
    recording.refuse_code = Some("BAD".into());
    let registry = Arc::new(recording);
    let notifier = Arc::new(Collecting::default());
    let records = vec![
        herbarium_record(1, "BAD", "Broken Herbarium"),
        herbarium_record(2, "GOOD", "Working Herbarium"),
    ];
    let ctx = context(registry.clone(), records, Some(notifier.clone()), false);

    let report = run_herbarium(&ctx).await;

    assert_eq!(report.summary.records, 2);
    assert_eq!(report.no_match.len(), 1);
    assert_eq!(report.no_match[0].record_id, "2");
    assert_eq!(report.failed_actions.len(), 1);
    assert_eq!(report.failed_actions[0].action, "create institution");
    assert_eq!(registry.snapshot().institutions.len(), 1);
    assert_eq!(notifier.sent(), vec!["digest:1".to_string()]);
}

#[tokio::test]
async fn failed_action_lists_what_the_record_already_changed() {
    let mut recording = Recording::new(RegistrySnapshot::default());
    recording.refuse_collection_code = Some("C1".into());
    let registry = Arc::new(recording);

    let ctx = context(registry.clone(), vec![herbarium_record(1, "C1", "Org1")], None, false);
    let report = run_herbarium(&ctx).await;

    assert_eq!(report.failed_actions.len(), 1);
    let failed = &report.failed_actions[0];
    assert_eq!(failed.action, "create collection");
    assert_eq!(failed.record_id.as_deref(), Some("1"));
    assert!(failed.applied[0].starts_with("create institution"));
    // The institution stays; nothing rolls it back.
    assert_eq!(registry.snapshot().institutions.len(), 1);
    assert!(registry.snapshot().collections.is_empty());
}

#[tokio::test]
async fn unconfigured_source_is_fatal() {
    let registry = Arc::new(Recording::new(RegistrySnapshot::default()));
    let ctx = context(registry, Vec::new(), None, false);
    let err = run(&ctx, SourceKind::Aggregator).await.expect_err("no aggregator");
    assert!(err.to_string().contains("aggregator"));
}
