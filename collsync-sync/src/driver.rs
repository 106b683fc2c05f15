//! Classify a match result and dispatch it to its strategy.

use collsync_core::{
    types::{Collection, Identifier, IdentifierType, Institution, MachineTag},
    ExternalRef, SourceRecord,
};

use crate::{
    error::StepFailed,
    matcher::{match_record, MatchResult},
    outcome::{ConflictOutcome, InvalidRecord, Outcome, ResultAccumulator},
    strategies::Reconciler,
};

/// Cardinality of a record's candidate sets.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchState {
    /// One institution, no collection.
    OnlyInstitution(Institution),
    /// One collection, no institution.
    OnlyCollection(Collection),
    /// One institution and one of its own collections.
    Both(Institution, Collection),
    NoMatch,
    /// Anything that must not be resolved automatically.
    Conflict {
        reason: String,
        institutions: Vec<Institution>,
        collections: Vec<Collection>,
    },
}

pub fn classify(record: &SourceRecord, result: MatchResult) -> MatchState {
    let MatchResult {
        mut institutions,
        mut collections,
    } = result;

    let conflict = |reason: String, institutions, collections| MatchState::Conflict {
        reason,
        institutions,
        collections,
    };

    match (institutions.len(), collections.len()) {
        (0, 0) => MatchState::NoMatch,
        (1, 0) => {
            if let Some(reason) = institution_clash(record, &institutions[0]) {
                return conflict(reason, institutions, collections);
            }
            MatchState::OnlyInstitution(institutions.remove(0))
        }
        (0, 1) => {
            if let Some(reason) = collection_clash(record, &collections[0]) {
                return conflict(reason, institutions, collections);
            }
            MatchState::OnlyCollection(collections.remove(0))
        }
        (1, 1) => {
            if collections[0].institution_key != institutions[0].key {
                let reason = format!(
                    "collection {} belongs to another institution than {}",
                    collections[0].code, institutions[0].code
                );
                return conflict(reason, institutions, collections);
            }
            let clash = institution_clash(record, &institutions[0])
                .or_else(|| collection_clash(record, &collections[0]));
            if let Some(reason) = clash {
                return conflict(reason, institutions, collections);
            }
            MatchState::Both(institutions.remove(0), collections.remove(0))
        }
        (i, c) => conflict(
            format!("{i} institution and {c} collection candidates"),
            institutions,
            collections,
        ),
    }
}

/// A record ref whose slot on the entity already holds a different value: the
/// entity would end up pointing at two source records.
fn clash(
    refs: &[ExternalRef],
    entity: &str,
    identifiers: &[Identifier],
    tags: &[MachineTag],
) -> Option<String> {
    refs.iter().find_map(|r| match r {
        ExternalRef::Identifier { id_type, value } => {
            let same_slot: Vec<_> = identifiers
                .iter()
                .filter(|i| i.id_type == *id_type)
                .collect();
            let holds_other = !same_slot.is_empty()
                && !same_slot.iter().any(|i| i.value.eq_ignore_ascii_case(value));
            (holds_other && *id_type != IdentifierType::Other)
                .then(|| format!("{entity} already carries a different {id_type} identifier"))
        }
        ExternalRef::Tag { namespace, name, value } => {
            let same_slot: Vec<_> = tags
                .iter()
                .filter(|t| {
                    t.namespace.eq_ignore_ascii_case(namespace) && t.name.eq_ignore_ascii_case(name)
                })
                .collect();
            let holds_other = !same_slot.is_empty()
                && !same_slot.iter().any(|t| t.value.eq_ignore_ascii_case(value));
            holds_other
                .then(|| format!("{entity} already carries a different {namespace}:{name} tag"))
        }
    })
}

fn institution_clash(record: &SourceRecord, institution: &Institution) -> Option<String> {
    clash(
        &record.institution_refs,
        &format!("institution {}", institution.code),
        &institution.identifiers,
        &institution.machine_tags,
    )
}

fn collection_clash(record: &SourceRecord, collection: &Collection) -> Option<String> {
    clash(
        &record.collection_refs,
        &format!("collection {}", collection.code),
        &collection.identifiers,
        &collection.machine_tags,
    )
}

/// Missing identifying fields, if any, for a record that would create
/// entities.
fn invalid_reason(record: &SourceRecord) -> Option<String> {
    match (
        record.effective_institution_code(),
        record.effective_institution_name(),
    ) {
        (Some(_), Some(_)) => None,
        (None, Some(_)) => Some("record has no code".into()),
        (Some(_), None) => Some("record has no name".into()),
        (None, None) => Some("record has neither code nor name".into()),
    }
}

/// Match, classify and reconcile one record.
pub fn reconcile_record(
    rec: &mut Reconciler<'_>,
    record: &SourceRecord,
) -> Result<Outcome, StepFailed> {
    rec.executor.begin_record(&record.record_id);
    let state = classify(record, match_record(record, &*rec.index));
    tracing::debug!(record = %record.record_id, state = state_name(&state), "classified");

    match state {
        MatchState::OnlyInstitution(institution) => rec
            .only_institution(record, institution)
            .map(Outcome::OnlyInstitution),
        MatchState::OnlyCollection(collection) => rec
            .only_collection(record, collection)
            .map(Outcome::OnlyCollection),
        MatchState::Both(institution, collection) => rec
            .both(record, institution, collection)
            .map(Outcome::Both),
        MatchState::NoMatch => match invalid_reason(record) {
            Some(reason) => {
                tracing::warn!(record = %record.record_id, reason = %reason, "invalid record");
                rec.executor.notify_invalid(record, &reason);
                Ok(Outcome::Invalid(InvalidRecord {
                    record: record.clone(),
                    reason,
                }))
            }
            None => rec.no_match(record).map(Outcome::NoMatch),
        },
        MatchState::Conflict {
            reason,
            institutions,
            collections,
        } => {
            tracing::warn!(
                record = %record.record_id,
                institutions = institutions.len(),
                collections = collections.len(),
                reason = %reason,
                "conflict"
            );
            let conflict = ConflictOutcome {
                record: record.clone(),
                reason,
                institutions,
                collections,
            };
            rec.executor.notify_conflict(&conflict);
            Ok(Outcome::Conflict(conflict))
        }
    }
}

fn state_name(state: &MatchState) -> &'static str {
    match state {
        MatchState::OnlyInstitution(_) => "only_institution",
        MatchState::OnlyCollection(_) => "only_collection",
        MatchState::Both(..) => "both",
        MatchState::NoMatch => "no_match",
        MatchState::Conflict { .. } => "conflict",
    }
}

/// The sequential reconcile loop. A record whose branch failed is left out of
/// the outcome lists; its failure is already recorded.
pub fn reconcile_all(
    rec: &mut Reconciler<'_>,
    records: &[SourceRecord],
    accumulator: &mut ResultAccumulator,
) {
    for record in records {
        accumulator.record_seen();
        match reconcile_record(rec, record) {
            Ok(outcome) => accumulator.add(outcome),
            Err(StepFailed) => {
                tracing::debug!(record = %record.record_id, "record abandoned after failed step");
            }
        }
    }
}
