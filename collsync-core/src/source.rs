//! Source records read from the external systems, and the
//! [`ExternalSource`] contract that produces them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Address, IdentifierType, MasterSource};

/// Which external system a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Herbarium directory: one institution row with embedded staff.
    Herbarium,
    /// Specimen aggregator export: one flat collection row.
    Aggregator,
}

impl SourceKind {
    /// The master-source marker this system writes on first link.
    pub fn master_source(self) -> MasterSource {
        match self {
            SourceKind::Herbarium => MasterSource::Herbarium,
            SourceKind::Aggregator => MasterSource::Aggregator,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Herbarium => write!(f, "herbarium"),
            SourceKind::Aggregator => write!(f, "aggregator"),
        }
    }
}

/// A reference from a source record to a registry entity: either a typed
/// identifier or a cross-reference machine tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExternalRef {
    Identifier {
        id_type: IdentifierType,
        value: String,
    },
    Tag {
        namespace: String,
        name: String,
        value: String,
    },
}

impl fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalRef::Identifier { id_type, value } => write!(f, "{id_type}:{value}"),
            ExternalRef::Tag { namespace, name, value } => write!(f, "{namespace}:{name}={value}"),
        }
    }
}

/// One staff entry of a source record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceStaff {
    /// Herbarium staff IRN; aggregator contacts have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
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
    pub last_modified: Option<DateTime<Utc>>,
}

impl SourceStaff {
    /// First, middle and last name joined by single spaces.
    pub fn full_name(&self) -> String {
        [
            self.first_name.as_deref(),
            self.middle_name.as_deref(),
            self.last_name.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }
}

/// One row from an external source, already mapped into the shared shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub kind: SourceKind,
    /// Stable id of the row in its source (IRN or collection UUID).
    pub record_id: String,
    #[serde(default)]
    pub institution_refs: Vec<ExternalRef>,
    #[serde(default)]
    pub collection_refs: Vec<ExternalRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taxonomic_coverage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geography: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub staff: Vec<SourceStaff>,
}

impl SourceRecord {
    /// An empty record of `kind` with the given id. Callers fill in the rest.
    pub fn new(kind: SourceKind, record_id: impl Into<String>) -> Self {
        Self {
            kind,
            record_id: record_id.into(),
            institution_refs: Vec::new(),
            collection_refs: Vec::new(),
            institution_code: None,
            institution_name: None,
            collection_code: None,
            collection_name: None,
            description: None,
            homepage: None,
            catalog_url: None,
            email: None,
            phone: None,
            address: None,
            mailing_address: None,
            latitude: None,
            longitude: None,
            number_specimens: None,
            taxonomic_coverage: None,
            geography: None,
            active: None,
            last_modified: None,
            staff: Vec::new(),
        }
    }

    /// Institution code, falling back to the collection code.
    pub fn effective_institution_code(&self) -> Option<&str> {
        non_blank(self.institution_code.as_deref())
            .or_else(|| non_blank(self.collection_code.as_deref()))
    }

    /// Collection code, falling back to the institution code.
    pub fn effective_collection_code(&self) -> Option<&str> {
        non_blank(self.collection_code.as_deref())
            .or_else(|| non_blank(self.institution_code.as_deref()))
    }

    /// Institution name, falling back to the collection name.
    pub fn effective_institution_name(&self) -> Option<&str> {
        non_blank(self.institution_name.as_deref())
            .or_else(|| non_blank(self.collection_name.as_deref()))
    }

    /// Collection name, falling back to the institution name.
    pub fn effective_collection_name(&self) -> Option<&str> {
        non_blank(self.collection_name.as_deref())
            .or_else(|| non_blank(self.institution_name.as_deref()))
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Producer of source records for one external system.
///
/// Implementations read the whole export; a malformed export is an error, never
/// a partial list.
pub trait ExternalSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn list_records(&self) -> Result<Vec<SourceRecord>, crate::SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_codes_fall_back_across_levels() {
        let mut r = SourceRecord::new(SourceKind::Aggregator, "u-1");
        r.collection_code = Some("  ".into());
        r.institution_code = Some("MICH".into());
        assert_eq!(r.effective_collection_code(), Some("MICH"));
        assert_eq!(r.effective_institution_code(), Some("MICH"));
    }

    #[test]
    fn staff_full_name_includes_middle_name() {
        let s = SourceStaff {
            first_name: Some("Barbara".into()),
            middle_name: Some("M.".into()),
            last_name: Some("Thiers".into()),
            ..Default::default()
        };
        assert_eq!(s.full_name(), "Barbara M. Thiers");
    }

    #[test]
    fn source_kind_maps_to_master_source() {
        assert_eq!(SourceKind::Herbarium.master_source(), MasterSource::Herbarium);
        assert_eq!(SourceKind::Aggregator.to_string(), "aggregator");
    }
}
