//! Typed outcomes of reconciling records and the run report they fold into.

use collsync_core::{
    types::{Collection, Institution, Person},
    SourceKind, SourceRecord, SourceStaff,
};
use serde::Serialize;

use crate::executor::FailedAction;

/// Comparison used to decide whether a merge is a real change.
pub trait LenientEq {
    fn lenient_eq(&self, other: &Self) -> bool;
}

impl LenientEq for Institution {
    fn lenient_eq(&self, other: &Self) -> bool {
        Institution::lenient_eq(self, other)
    }
}

impl LenientEq for Collection {
    fn lenient_eq(&self, other: &Self) -> bool {
        Collection::lenient_eq(self, other)
    }
}

impl LenientEq for Person {
    fn lenient_eq(&self, other: &Self) -> bool {
        Person::lenient_eq(self, other)
    }
}

/// One existing entity reconciled against a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityMatch<T> {
    /// The entity as found in the registry.
    pub matched: T,
    /// The entity after merging the record.
    pub merged: T,
    /// `false` when the merge changed nothing that matters.
    pub update: bool,
}

impl<T: LenientEq> EntityMatch<T> {
    pub fn new(matched: T, merged: T) -> Self {
        let update = !matched.lenient_eq(&merged);
        Self {
            matched,
            merged,
            update,
        }
    }
}

/// A staff entry that tied between several persons.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaffConflict {
    pub staff: SourceStaff,
    pub candidates: Vec<Person>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StaffOutcome {
    pub created: Vec<Person>,
    pub updated: Vec<EntityMatch<Person>>,
    pub conflicts: Vec<StaffConflict>,
    /// Previously linked persons no staff entry matched; now unlinked.
    pub removed: Vec<Person>,
}

// ---------------------------------------------------------------------------
// Per-classification outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OnlyInstitutionOutcome {
    pub record_id: String,
    pub institution: EntityMatch<Institution>,
    pub new_collection: Collection,
    pub staff: StaffOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OnlyCollectionOutcome {
    pub record_id: String,
    pub collection: EntityMatch<Collection>,
    pub staff: StaffOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BothOutcome {
    pub record_id: String,
    pub institution: EntityMatch<Institution>,
    pub collection: EntityMatch<Collection>,
    pub staff: StaffOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoMatchOutcome {
    pub record_id: String,
    pub new_institution: Institution,
    pub new_collection: Collection,
    pub staff: StaffOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictOutcome {
    pub record: SourceRecord,
    pub reason: String,
    pub institutions: Vec<Institution>,
    pub collections: Vec<Collection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidRecord {
    pub record: SourceRecord,
    pub reason: String,
}

/// What reconciling one record produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    OnlyInstitution(OnlyInstitutionOutcome),
    OnlyCollection(OnlyCollectionOutcome),
    Both(BothOutcome),
    NoMatch(NoMatchOutcome),
    Conflict(ConflictOutcome),
    Invalid(InvalidRecord),
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub records: usize,
    pub institutions_created: usize,
    pub institutions_updated: usize,
    pub collections_created: usize,
    pub collections_updated: usize,
    pub persons_created: usize,
    pub persons_updated: usize,
    pub persons_removed: usize,
    pub staff_conflicts: usize,
    pub conflicts: usize,
    pub invalid: usize,
    pub failed_actions: usize,
}

impl Summary {
    pub fn creates(&self) -> usize {
        self.institutions_created + self.collections_created + self.persons_created
    }

    pub fn updates(&self) -> usize {
        self.institutions_updated + self.collections_updated + self.persons_updated
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub source: SourceKind,
    pub dry_run: bool,
    pub summary: Summary,
    pub only_institution: Vec<OnlyInstitutionOutcome>,
    pub only_collection: Vec<OnlyCollectionOutcome>,
    pub both: Vec<BothOutcome>,
    pub no_match: Vec<NoMatchOutcome>,
    pub conflicts: Vec<ConflictOutcome>,
    pub invalid: Vec<InvalidRecord>,
    pub failed_actions: Vec<FailedAction>,
}

/// Folds outcomes into a [`SyncReport`].
#[derive(Debug)]
pub struct ResultAccumulator {
    report: SyncReport,
}

impl ResultAccumulator {
    pub fn new(source: SourceKind, dry_run: bool) -> Self {
        Self {
            report: SyncReport {
                source,
                dry_run,
                summary: Summary::default(),
                only_institution: Vec::new(),
                only_collection: Vec::new(),
                both: Vec::new(),
                no_match: Vec::new(),
                conflicts: Vec::new(),
                invalid: Vec::new(),
                failed_actions: Vec::new(),
            },
        }
    }

    pub fn record_seen(&mut self) {
        self.report.summary.records += 1;
    }

    pub fn add(&mut self, outcome: Outcome) {
        let summary = &mut self.report.summary;
        match outcome {
            Outcome::OnlyInstitution(o) => {
                summary.institutions_updated += usize::from(o.institution.update);
                summary.collections_created += 1;
                count_staff(summary, &o.staff);
                self.report.only_institution.push(o);
            }
            Outcome::OnlyCollection(o) => {
                summary.collections_updated += usize::from(o.collection.update);
                count_staff(summary, &o.staff);
                self.report.only_collection.push(o);
            }
            Outcome::Both(o) => {
                summary.institutions_updated += usize::from(o.institution.update);
                summary.collections_updated += usize::from(o.collection.update);
                count_staff(summary, &o.staff);
                self.report.both.push(o);
            }
            Outcome::NoMatch(o) => {
                summary.institutions_created += 1;
                summary.collections_created += 1;
                count_staff(summary, &o.staff);
                self.report.no_match.push(o);
            }
            Outcome::Conflict(o) => {
                summary.conflicts += 1;
                self.report.conflicts.push(o);
            }
            Outcome::Invalid(o) => {
                summary.invalid += 1;
                self.report.invalid.push(o);
            }
        }
    }

    pub fn add_failures(&mut self, failures: impl IntoIterator<Item = FailedAction>) {
        self.report.failed_actions.extend(failures);
        self.report.summary.failed_actions = self.report.failed_actions.len();
    }

    pub fn finish(self) -> SyncReport {
        self.report
    }
}

fn count_staff(summary: &mut Summary, staff: &StaffOutcome) {
    summary.persons_created += staff.created.len();
    summary.persons_updated += staff.updated.iter().filter(|u| u.update).count();
    summary.persons_removed += staff.removed.len();
    summary.staff_conflicts += staff.conflicts.len();
}

#[cfg(test)]
mod tests {
    use super::*;
    use collsync_core::types::EntityKey;

    fn institution(code: &str) -> Institution {
        Institution {
            key: Some(EntityKey::random()),
            code: code.into(),
            name: code.into(),
            ..Default::default()
        }
    }

    #[test]
    fn entity_match_flags_real_changes_only() {
        let a = institution("A");
        let mut touched = a.clone();
        touched.modified = Some(chrono::Utc::now());
        assert!(!EntityMatch::new(a.clone(), touched).update);

        let mut renamed = a.clone();
        renamed.name = "B".into();
        assert!(EntityMatch::new(a, renamed).update);
    }

    #[test]
    fn accumulator_counts_per_list() {
        let mut acc = ResultAccumulator::new(SourceKind::Herbarium, true);
        acc.record_seen();
        acc.add(Outcome::NoMatch(NoMatchOutcome {
            record_id: "1".into(),
            new_institution: institution("A"),
            new_collection: Collection::default(),
            staff: StaffOutcome {
                created: vec![Person::default()],
                ..Default::default()
            },
        }));
        acc.record_seen();
        acc.add(Outcome::Invalid(InvalidRecord {
            record: SourceRecord::new(SourceKind::Herbarium, "2"),
            reason: "missing code".into(),
        }));
        let report = acc.finish();
        assert_eq!(report.summary.records, 2);
        assert_eq!(report.summary.creates(), 3);
        assert_eq!(report.summary.invalid, 1);
        assert_eq!(report.no_match.len(), 1);
        assert!(report.dry_run);
    }

    #[test]
    fn report_serializes_to_json() {
        let report = ResultAccumulator::new(SourceKind::Aggregator, false).finish();
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["source"], "aggregator");
        assert_eq!(json["summary"]["records"], 0);
    }
}
