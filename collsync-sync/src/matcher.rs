//! Candidate search for one source record.
//!
//! Institutions: exact lookup by the record's institution refs, falling back to
//! an institution created earlier this run under the same code.
//!
//! Collections: exact lookup by the record's collection refs. Without a ref hit
//! and with exactly one institution matched, the institution's collections are
//! searched by code equality plus light name similarity; collections created
//! this run by another record are skipped there.
//!
//! Nothing here picks a winner among several candidates, and nothing errors.

use collsync_core::{
    types::{Collection, Institution},
    SourceRecord,
};

use crate::{
    index::MatchIndex,
    normalize::{names_similar, same_code},
};

/// Candidate sets for one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    pub institutions: Vec<Institution>,
    pub collections: Vec<Collection>,
}

pub fn match_record(record: &SourceRecord, index: &MatchIndex) -> MatchResult {
    let institutions = match_institutions(record, index);
    let collections = match_collections(record, index, &institutions);
    tracing::debug!(
        record = %record.record_id,
        institutions = institutions.len(),
        collections = collections.len(),
        "match candidates"
    );
    MatchResult {
        institutions,
        collections,
    }
}

fn match_institutions(record: &SourceRecord, index: &MatchIndex) -> Vec<Institution> {
    let mut keys = index.institutions_by_refs(&record.institution_refs);
    if keys.is_empty() {
        if let Some(key) = record
            .effective_institution_code()
            .and_then(|code| index.created_institution_by_code(code))
        {
            keys.push(key);
        }
    }
    keys.into_iter()
        .filter_map(|k| index.institution(k).cloned())
        .collect()
}

fn match_collections(
    record: &SourceRecord,
    index: &MatchIndex,
    institutions: &[Institution],
) -> Vec<Collection> {
    let by_ref: Vec<Collection> = index
        .collections_by_refs(&record.collection_refs)
        .into_iter()
        .filter_map(|k| index.collection(k).cloned())
        .collect();
    if !by_ref.is_empty() {
        return by_ref;
    }

    let [institution] = institutions else {
        return Vec::new();
    };
    let Some(parent) = institution.key else {
        return Vec::new();
    };
    let (Some(code), Some(name)) = (
        record.effective_collection_code(),
        record.effective_collection_name(),
    ) else {
        return Vec::new();
    };

    index
        .collections_of(parent)
        .filter(|c| {
            c.key
                .is_some_and(|k| !index.created_by_other_record(k, &record.record_id))
        })
        .filter(|c| same_code(&c.code, code) && names_similar(&c.name, name))
        .cloned()
        .collect()
}
