//! Merge a source record into a new or existing registry entity.
//!
//! The existing entity is the baseline; every field is then decided by its
//! [`FieldPolicy`]:
//!
//! | entity      | authoritative                                         | timestamp-gated                                   |
//! |-------------|-------------------------------------------------------|---------------------------------------------------|
//! | institution | code, name, homepage, email, phone, address, mailing address, active | description, specimen count, coordinates |
//! | collection  | code, name, homepage, email, phone, address, mailing address, active | description, specimen count, taxonomic coverage, geography, catalog URL |
//! | person      |                                                       | every field                                       |
//!
//! Identifiers and machine tags are additive: the record's refs are added
//! idempotently and nothing is removed. The master-source marker is only set
//! when absent. A missing or blank source value never erases a stored one.
//!
//! Every merge destructures the baseline exhaustively, so a new entity field
//! does not compile until it has been given a rule here.

use chrono::{DateTime, Utc};
use collsync_core::{
    ids,
    types::{
        Address, AlternativeCode, Collection, EntityKey, Identifier, Institution, MachineTag,
        MasterSourceMetadata, Person,
    },
    ExternalRef, SourceKind, SourceRecord, SourceStaff,
};

use crate::normalize::{normalize, same_code};

/// How a field reacts to an incoming source value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPolicy {
    /// The active source wins unless the entity's master source outranks it.
    Authoritative,
    /// Overwritten only by a record at least as recent as the entity.
    TimestampGated,
}

/// Per-merge answer to "may this policy overwrite?".
#[derive(Debug, Clone, Copy)]
struct Gate {
    authoritative: bool,
    timestamped: bool,
}

impl Gate {
    fn new(
        active: SourceKind,
        master: Option<&MasterSourceMetadata>,
        record_modified: Option<DateTime<Utc>>,
        entity_modified: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            authoritative: master.map_or(true, |m| m.source <= active.master_source()),
            timestamped: match (record_modified, entity_modified) {
                (Some(r), Some(e)) => r >= e,
                _ => true,
            },
        }
    }

    fn allows(self, policy: FieldPolicy) -> bool {
        match policy {
            FieldPolicy::Authoritative => self.authoritative,
            FieldPolicy::TimestampGated => self.timestamped,
        }
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn text(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn overwrite<T>(current: Option<T>, incoming: Option<T>, allowed: bool) -> Option<T> {
    if allowed {
        incoming.or(current)
    } else {
        current
    }
}

fn merge_required(current: String, incoming: Option<&str>, allowed: bool) -> String {
    match text(incoming) {
        Some(v) if allowed || current.trim().is_empty() => v,
        _ => current,
    }
}

/// The incoming name when it differs from the stored one but may not replace
/// it. Names have no alternatives list, so the caller logs it.
fn losing_name(current: &str, incoming: Option<&str>, allowed: bool) -> Option<String> {
    let incoming = text(incoming)?;
    let differs = !current.trim().is_empty() && normalize(current) != normalize(&incoming);
    (!allowed && differs).then_some(incoming)
}

fn log_losing_name(
    record: &SourceRecord,
    entity: &str,
    kept: &str,
    incoming: Option<&str>,
    allowed: bool,
) {
    if let Some(dropped) = losing_name(kept, incoming, allowed) {
        tracing::debug!(
            record = %record.record_id,
            source = %record.kind,
            kept = %kept,
            dropped = %dropped,
            "{entity} name from lower-precedence source not applied"
        );
    }
}

/// Resolve a code collision. The winner becomes the code; the loser is kept as
/// an alternative code.
fn merge_code(
    current: String,
    incoming: Option<&str>,
    allowed: bool,
    alternatives: &mut Vec<AlternativeCode>,
    source: SourceKind,
) -> String {
    let Some(incoming) = text(incoming) else {
        return current;
    };
    if current.trim().is_empty() {
        return incoming;
    }
    if same_code(&current, &incoming) {
        return current;
    }
    if allowed {
        alternatives.retain(|a| !same_code(&a.code, &incoming));
        ids::add_alternative_code(alternatives, &incoming, &current, "previous registry code");
        incoming
    } else {
        ids::add_alternative_code(
            alternatives,
            &current,
            &incoming,
            &format!("code used by {source}"),
        );
        current
    }
}

/// Field-by-field address merge: each present incoming part replaces the
/// stored one, absent parts are kept.
fn merge_address(current: Option<Address>, incoming: Option<&Address>, allowed: bool) -> Option<Address> {
    let Some(incoming) = incoming.filter(|a| !a.is_empty() && allowed) else {
        return current;
    };
    let Address {
        street,
        city,
        province,
        postal_code,
        country,
    } = current.unwrap_or_default();
    let merged = Address {
        street: text(incoming.street.as_deref()).or(street),
        city: text(incoming.city.as_deref()).or(city),
        province: text(incoming.province.as_deref()).or(province),
        postal_code: text(incoming.postal_code.as_deref()).or(postal_code),
        country: text(incoming.country.as_deref()).or(country),
    };
    (!merged.is_empty()).then_some(merged)
}

fn merge_active(current: bool, incoming: Option<bool>, allowed: bool, is_new: bool) -> bool {
    match incoming {
        Some(v) if allowed => v,
        _ if is_new => true,
        _ => current,
    }
}

/// Add the record's refs: identifiers to `identifiers`, tags to `tags`.
fn add_refs(refs: &[ExternalRef], identifiers: &mut Vec<Identifier>, tags: &mut Vec<MachineTag>) {
    for r in refs {
        match r {
            ExternalRef::Identifier { id_type, value } => {
                ids::add_identifier(identifiers, Identifier::new(*id_type, value.clone()));
            }
            ExternalRef::Tag { namespace, name, value } => {
                ids::add_tag(tags, MachineTag::new(namespace.clone(), name.clone(), value.clone()));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Entity merges
// ---------------------------------------------------------------------------

pub fn merge_institution(record: &SourceRecord, existing: Option<&Institution>) -> Institution {
    let is_new = existing.is_none();
    let Institution {
        key,
        code,
        name,
        mut alternative_codes,
        description,
        homepage,
        phone,
        email,
        active,
        address,
        mailing_address,
        latitude,
        longitude,
        number_specimens,
        mut identifiers,
        mut machine_tags,
        mut master_source,
        contact_persons,
        modified,
    } = existing.cloned().unwrap_or_default();

    let gate = Gate::new(record.kind, master_source.as_ref(), record.last_modified, modified);
    let auth = gate.allows(FieldPolicy::Authoritative);
    let ts = gate.allows(FieldPolicy::TimestampGated);

    let code = merge_code(
        code,
        record.effective_institution_code(),
        auth,
        &mut alternative_codes,
        record.kind,
    );
    log_losing_name(record, "institution", &name, record.effective_institution_name(), auth);
    add_refs(&record.institution_refs, &mut identifiers, &mut machine_tags);
    ids::link_master_source(&mut master_source, record.kind.master_source(), &record.record_id);

    // A herbarium row describes the institution itself; aggregator counts
    // belong to the collection only.
    let own_count = match record.kind {
        SourceKind::Herbarium => record.number_specimens,
        SourceKind::Aggregator => None,
    };

    Institution {
        key,
        code,
        name: merge_required(name, record.effective_institution_name(), auth),
        alternative_codes,
        description: overwrite(description, text(record.description.as_deref()), ts),
        homepage: overwrite(homepage, text(record.homepage.as_deref()), auth),
        phone: overwrite(phone, text(record.phone.as_deref()), auth),
        email: overwrite(email, text(record.email.as_deref()), auth),
        active: merge_active(active, record.active, auth, is_new),
        address: merge_address(address, record.address.as_ref(), auth),
        mailing_address: merge_address(mailing_address, record.mailing_address.as_ref(), auth),
        latitude: overwrite(latitude, record.latitude, ts),
        longitude: overwrite(longitude, record.longitude, ts),
        number_specimens: overwrite(number_specimens, own_count, ts),
        identifiers,
        machine_tags,
        master_source,
        contact_persons,
        modified,
    }
}

/// `parent` re-parents the collection when given; otherwise the stored parent
/// is kept.
pub fn merge_collection(
    record: &SourceRecord,
    existing: Option<&Collection>,
    parent: Option<EntityKey>,
) -> Collection {
    let is_new = existing.is_none();
    let Collection {
        key,
        code,
        name,
        mut alternative_codes,
        description,
        institution_key,
        homepage,
        catalog_url,
        phone,
        email,
        active,
        address,
        mailing_address,
        number_specimens,
        taxonomic_coverage,
        geography,
        mut identifiers,
        mut machine_tags,
        mut master_source,
        contact_persons,
        modified,
    } = existing.cloned().unwrap_or_default();

    let gate = Gate::new(record.kind, master_source.as_ref(), record.last_modified, modified);
    let auth = gate.allows(FieldPolicy::Authoritative);
    let ts = gate.allows(FieldPolicy::TimestampGated);

    let code = merge_code(
        code,
        record.effective_collection_code(),
        auth,
        &mut alternative_codes,
        record.kind,
    );
    log_losing_name(record, "collection", &name, record.effective_collection_name(), auth);
    add_refs(&record.collection_refs, &mut identifiers, &mut machine_tags);
    ids::link_master_source(&mut master_source, record.kind.master_source(), &record.record_id);

    Collection {
        key,
        code,
        name: merge_required(name, record.effective_collection_name(), auth),
        alternative_codes,
        description: overwrite(description, text(record.description.as_deref()), ts),
        institution_key: parent.or(institution_key),
        homepage: overwrite(homepage, text(record.homepage.as_deref()), auth),
        catalog_url: overwrite(catalog_url, text(record.catalog_url.as_deref()), ts),
        phone: overwrite(phone, text(record.phone.as_deref()), auth),
        email: overwrite(email, text(record.email.as_deref()), auth),
        active: merge_active(active, record.active, auth, is_new),
        address: merge_address(address, record.address.as_ref(), auth),
        mailing_address: merge_address(mailing_address, record.mailing_address.as_ref(), auth),
        number_specimens: overwrite(number_specimens, record.number_specimens, ts),
        taxonomic_coverage: overwrite(
            taxonomic_coverage,
            text(record.taxonomic_coverage.as_deref()),
            ts,
        ),
        geography: overwrite(geography, text(record.geography.as_deref()), ts),
        identifiers,
        machine_tags,
        master_source,
        contact_persons,
        modified,
    }
}

/// Merge one staff entry. Every person field is timestamp-gated on the staff
/// entry's own timestamp, falling back to the record's. The middle name is
/// carried in `first_name`.
pub fn merge_person(
    staff: &SourceStaff,
    record_modified: Option<DateTime<Utc>>,
    existing: Option<&Person>,
    primary_institution: Option<EntityKey>,
    primary_collection: Option<EntityKey>,
) -> Person {
    let Person {
        key,
        first_name,
        last_name,
        position,
        email,
        phone,
        fax,
        address,
        primary_institution_key,
        primary_collection_key,
        mut identifiers,
        modified,
    } = existing.cloned().unwrap_or_default();

    let gate = Gate {
        authoritative: true,
        timestamped: match (staff.last_modified.or(record_modified), modified) {
            (Some(r), Some(e)) => r >= e,
            _ => true,
        },
    };
    let ts = gate.allows(FieldPolicy::TimestampGated);

    if let Some(irn) = text(staff.irn.as_deref()) {
        ids::add_identifier(&mut identifiers, Identifier::irn(irn));
    }
    let given = text(
        Some(
            [staff.first_name.as_deref(), staff.middle_name.as_deref()]
                .into_iter()
                .flatten()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
                .as_str(),
        ),
    );

    Person {
        key,
        first_name: overwrite(first_name, given, ts),
        last_name: overwrite(last_name, text(staff.last_name.as_deref()), ts),
        position: overwrite(position, text(staff.position.as_deref()), ts),
        email: overwrite(email, text(staff.email.as_deref()), ts),
        phone: overwrite(phone, text(staff.phone.as_deref()), ts),
        fax: overwrite(fax, text(staff.fax.as_deref()), ts),
        address: merge_address(address, staff.address.as_ref(), ts),
        primary_institution_key: primary_institution_key.or(primary_institution),
        primary_collection_key: primary_collection_key.or(primary_collection),
        identifiers,
        modified,
    }
}
