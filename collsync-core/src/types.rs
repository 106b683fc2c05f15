//! Domain types for the collections registry.
//!
//! One concrete struct per entity type. Shared concerns (identifiers, machine
//! tags, master-source markers) are plain fields operated on by the free
//! functions in [`crate::ids`].

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Registry-assigned key of an institution, collection or person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey(pub Uuid);

impl EntityKey {
    /// A fresh random key. Used by the snapshot registry on create and as the
    /// placeholder key handed back by dry-run creates.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for EntityKey {
    fn from(u: Uuid) -> Self {
        Self(u)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of registry entity, used in failure records and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Institution,
    Collection,
    Person,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Institution => write!(f, "institution"),
            EntityKind::Collection => write!(f, "collection"),
            EntityKind::Person => write!(f, "person"),
        }
    }
}

/// Type of an external identifier attached to a registry entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierType {
    Irn,
    Lsid,
    Uuid,
    Doi,
    Url,
    Other,
}

impl fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierType::Irn => write!(f, "IRN"),
            IdentifierType::Lsid => write!(f, "LSID"),
            IdentifierType::Uuid => write!(f, "UUID"),
            IdentifierType::Doi => write!(f, "DOI"),
            IdentifierType::Url => write!(f, "URL"),
            IdentifierType::Other => write!(f, "OTHER"),
        }
    }
}

/// External system that owns authoritative updates of an entity.
///
/// Variants are declared in ascending precedence; the derived `Ord` is the
/// precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasterSource {
    Aggregator,
    Herbarium,
}

impl fmt::Display for MasterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterSource::Aggregator => write!(f, "aggregator"),
            MasterSource::Herbarium => write!(f, "herbarium"),
        }
    }
}

// ---------------------------------------------------------------------------
// Value structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub id_type: IdentifierType,
    pub value: String,
}

impl Identifier {
    pub fn new(id_type: IdentifierType, value: impl Into<String>) -> Self {
        Self { id_type, value: value.into() }
    }

    /// IRN identifier in the registry's canonical `gbif:ih:irn:<irn>` form.
    pub fn irn(irn: impl fmt::Display) -> Self {
        Self::new(IdentifierType::Irn, format!("gbif:ih:irn:{irn}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineTag {
    pub namespace: String,
    pub name: String,
    pub value: String,
}

impl MachineTag {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self { namespace: namespace.into(), name: name.into(), value: value.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterSourceMetadata {
    pub source: MasterSource,
    /// Record id of the entity in the master source (IRN, collection UUID).
    pub source_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlternativeCode {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Postal or physical address. `country` is an ISO 3166-1 alpha-2 code.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        self.street.is_none()
            && self.city.is_none()
            && self.province.is_none()
            && self.postal_code.is_none()
            && self.country.is_none()
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Institution {
    /// `None` until the registry has created the entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<EntityKey>,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub alternative_codes: Vec<AlternativeCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mailing_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_specimens: Option<u64>,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub machine_tags: Vec<MachineTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_source: Option<MasterSourceMetadata>,
    #[serde(default)]
    pub contact_persons: Vec<EntityKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Collection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<EntityKey>,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub alternative_codes: Vec<AlternativeCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_key: Option<EntityKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mailing_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_specimens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taxonomic_coverage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geography: Option<String>,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub machine_tags: Vec<MachineTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_source: Option<MasterSourceMetadata>,
    #[serde(default)]
    pub contact_persons: Vec<EntityKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Person {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<EntityKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fax: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_institution_key: Option<EntityKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_collection_key: Option<EntityKey>,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

impl Person {
    /// First and last name joined by a space; blank parts are skipped.
    pub fn full_name(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ---------------------------------------------------------------------------
// Lenient equality
// ---------------------------------------------------------------------------
//
// Exhaustive destructuring keeps these in step with the structs: adding a
// field without deciding whether it takes part in the comparison is a
// compile error.

fn same_set<T: Eq + std::hash::Hash>(a: &[T], b: &[T]) -> bool {
    let a: HashSet<&T> = a.iter().collect();
    let b: HashSet<&T> = b.iter().collect();
    a == b
}

impl Institution {
    /// Equality ignoring the registry key, `modified`, and list ordering.
    pub fn lenient_eq(&self, other: &Self) -> bool {
        let Institution {
            key: _,
            code,
            name,
            alternative_codes,
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
            identifiers,
            machine_tags,
            master_source,
            contact_persons,
            modified: _,
        } = self;
        *code == other.code
            && *name == other.name
            && same_set(alternative_codes, &other.alternative_codes)
            && *description == other.description
            && *homepage == other.homepage
            && *phone == other.phone
            && *email == other.email
            && *active == other.active
            && *address == other.address
            && *mailing_address == other.mailing_address
            && *latitude == other.latitude
            && *longitude == other.longitude
            && *number_specimens == other.number_specimens
            && same_set(identifiers, &other.identifiers)
            && same_set(machine_tags, &other.machine_tags)
            && *master_source == other.master_source
            && same_set(contact_persons, &other.contact_persons)
    }
}

impl Collection {
    /// Equality ignoring the registry key, `modified`, and list ordering.
    pub fn lenient_eq(&self, other: &Self) -> bool {
        let Collection {
            key: _,
            code,
            name,
            alternative_codes,
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
            identifiers,
            machine_tags,
            master_source,
            contact_persons,
            modified: _,
        } = self;
        *code == other.code
            && *name == other.name
            && same_set(alternative_codes, &other.alternative_codes)
            && *description == other.description
            && *institution_key == other.institution_key
            && *homepage == other.homepage
            && *catalog_url == other.catalog_url
            && *phone == other.phone
            && *email == other.email
            && *active == other.active
            && *address == other.address
            && *mailing_address == other.mailing_address
            && *number_specimens == other.number_specimens
            && *taxonomic_coverage == other.taxonomic_coverage
            && *geography == other.geography
            && same_set(identifiers, &other.identifiers)
            && same_set(machine_tags, &other.machine_tags)
            && *master_source == other.master_source
            && same_set(contact_persons, &other.contact_persons)
    }
}

impl Person {
    /// Equality ignoring the registry key, `modified`, and identifier order.
    pub fn lenient_eq(&self, other: &Self) -> bool {
        let Person {
            key: _,
            first_name,
            last_name,
            position,
            email,
            phone,
            fax,
            address,
            primary_institution_key,
            primary_collection_key,
            identifiers,
            modified: _,
        } = self;
        *first_name == other.first_name
            && *last_name == other.last_name
            && *position == other.position
            && *email == other.email
            && *phone == other.phone
            && *fax == other.fax
            && *address == other.address
            && *primary_institution_key == other.primary_institution_key
            && *primary_collection_key == other.primary_collection_key
            && same_set(identifiers, &other.identifiers)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
