//! Identifier, machine-tag and master-source helpers.
//!
//! Each function takes only the field it works on, so the same helper serves
//! institutions, collections and persons alike. Every `add_*` is idempotent:
//! an equal value already present is never duplicated.

use crate::types::{
    AlternativeCode, Identifier, IdentifierType, MachineTag, MasterSource, MasterSourceMetadata,
};

/// Machine-tag namespace used by the aggregator cross-reference tags.
pub const AGGREGATOR_NAMESPACE: &str = "idigbio.org";
/// Tag name holding the aggregator collection UUID.
pub const AGGREGATOR_COLLECTION_TAG: &str = "CollectionUUID";
/// Tag name holding the aggregator institution unique-name UUID.
pub const AGGREGATOR_INSTITUTION_TAG: &str = "uniqueNameUUID";

pub fn contains_identifier(identifiers: &[Identifier], id_type: IdentifierType, value: &str) -> bool {
    identifiers
        .iter()
        .any(|i| i.id_type == id_type && i.value.eq_ignore_ascii_case(value))
}

/// Appends `identifier` unless an identifier of the same type and value is
/// present. Returns `true` when it was added.
pub fn add_identifier(identifiers: &mut Vec<Identifier>, identifier: Identifier) -> bool {
    if contains_identifier(identifiers, identifier.id_type, &identifier.value) {
        return false;
    }
    identifiers.push(identifier);
    true
}

pub fn contains_tag(tags: &[MachineTag], namespace: &str, name: &str, value: &str) -> bool {
    tags.iter().any(|t| {
        t.namespace.eq_ignore_ascii_case(namespace)
            && t.name.eq_ignore_ascii_case(name)
            && t.value.eq_ignore_ascii_case(value)
    })
}

/// Appends `tag` unless an equal tag is present. Returns `true` when added.
pub fn add_tag(tags: &mut Vec<MachineTag>, tag: MachineTag) -> bool {
    if contains_tag(tags, &tag.namespace, &tag.name, &tag.value) {
        return false;
    }
    tags.push(tag);
    true
}

/// Records `code` as an alternative code unless it already is one or equals
/// `current_code`. Returns `true` when added.
pub fn add_alternative_code(
    alternatives: &mut Vec<AlternativeCode>,
    current_code: &str,
    code: &str,
    description: &str,
) -> bool {
    let code = code.trim();
    if code.is_empty()
        || code.eq_ignore_ascii_case(current_code.trim())
        || alternatives.iter().any(|a| a.code.eq_ignore_ascii_case(code))
    {
        return false;
    }
    alternatives.push(AlternativeCode {
        code: code.to_string(),
        description: Some(description.to_string()),
    });
    true
}

/// Sets the master-source marker if none is present.
///
/// An existing marker is never replaced, whether it names the same source or
/// a different one. Returns `true` when the marker was set.
pub fn link_master_source(
    marker: &mut Option<MasterSourceMetadata>,
    source: MasterSource,
    source_id: &str,
) -> bool {
    if marker.is_some() {
        return false;
    }
    *marker = Some(MasterSourceMetadata {
        source,
        source_id: source_id.to_string(),
    });
    true
}
