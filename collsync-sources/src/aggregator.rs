//! Specimen aggregator CSV export.
//!
//! Each row is one collection. The collection is referenced by its
//! `CollectionUUID` machine tag (plus the LSID when present); its institution by
//! the `uniqueNameUUID` tag. The row's single contact becomes one staff entry.

use std::path::{Path, PathBuf};

use collsync_core::{
    ids::{AGGREGATOR_COLLECTION_TAG, AGGREGATOR_INSTITUTION_TAG, AGGREGATOR_NAMESPACE},
    types::{Address, IdentifierType},
    ExternalRef, ExternalSource, SourceError, SourceKind, SourceRecord, SourceStaff,
};
use serde::Deserialize;

use crate::{first_email, first_url, non_blank, parse_timestamp};

/// One CSV row, columns named as in the export header.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregatorRow {
    pub collection_uuid: Option<String>,
    pub unique_name_uuid: Option<String>,
    pub institution: Option<String>,
    pub collection: Option<String>,
    pub institution_code: Option<String>,
    pub collection_code: Option<String>,
    pub lsid: Option<String>,
    pub description: Option<String>,
    pub physical_address: Option<String>,
    pub physical_city: Option<String>,
    pub physical_state: Option<String>,
    pub physical_zip: Option<String>,
    pub mailing_address: Option<String>,
    pub mailing_city: Option<String>,
    pub mailing_state: Option<String>,
    pub mailing_zip: Option<String>,
    pub contact: Option<String>,
    pub contact_email: Option<String>,
    pub contact_role: Option<String>,
    pub collection_url: Option<String>,
    pub collection_catalog_url: Option<String>,
    pub cataloged_specimens: Option<String>,
    pub taxonomic_coverage: Option<String>,
    pub geographic_range: Option<String>,
    pub update_date: Option<String>,
}

/// Parse a CSV export into source records. `origin` only labels errors.
pub fn parse_export(csv_text: &str, origin: &Path) -> Result<Vec<SourceRecord>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    let mut records = Vec::new();
    for (row, result) in reader.deserialize::<AggregatorRow>().enumerate() {
        let parsed = result.map_err(|e| SourceError::Malformed {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        let record = to_record(parsed).ok_or_else(|| SourceError::Malformed {
            path: origin.to_path_buf(),
            message: format!("row {} has no collection_uuid", row + 1),
        })?;
        records.push(record);
    }
    Ok(records)
}

fn to_record(row: AggregatorRow) -> Option<SourceRecord> {
    let uuid = non_blank(row.collection_uuid)?;
    let mut record = SourceRecord::new(SourceKind::Aggregator, uuid.clone());

    record.collection_refs.push(ExternalRef::Tag {
        namespace: AGGREGATOR_NAMESPACE.into(),
        name: AGGREGATOR_COLLECTION_TAG.into(),
        value: uuid,
    });
    if let Some(lsid) = non_blank(row.lsid) {
        record.collection_refs.push(ExternalRef::Identifier {
            id_type: IdentifierType::Lsid,
            value: lsid,
        });
    }
    if let Some(unique_name) = non_blank(row.unique_name_uuid) {
        record.institution_refs.push(ExternalRef::Tag {
            namespace: AGGREGATOR_NAMESPACE.into(),
            name: AGGREGATOR_INSTITUTION_TAG.into(),
            value: unique_name,
        });
    }

    record.institution_name = non_blank(row.institution);
    record.collection_name = non_blank(row.collection);
    record.institution_code = non_blank(row.institution_code);
    record.collection_code = non_blank(row.collection_code);
    record.description = non_blank(row.description);
    record.homepage = row.collection_url.as_deref().and_then(first_url);
    record.catalog_url = row.collection_catalog_url.as_deref().and_then(first_url);
    record.address = address(
        row.physical_address,
        row.physical_city,
        row.physical_state,
        row.physical_zip,
    );
    record.mailing_address = address(
        row.mailing_address,
        row.mailing_city,
        row.mailing_state,
        row.mailing_zip,
    );
    record.number_specimens = row.cataloged_specimens.as_deref().and_then(parse_count);
    record.taxonomic_coverage = non_blank(row.taxonomic_coverage);
    record.geography = non_blank(row.geographic_range);
    record.last_modified = row.update_date.as_deref().and_then(parse_timestamp);

    record.staff.extend(contact(row.contact, row.contact_email, row.contact_role));
    Some(record)
}

fn address(
    street: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip: Option<String>,
) -> Option<Address> {
    let address = Address {
        street: non_blank(street),
        city: non_blank(city),
        province: non_blank(state),
        postal_code: non_blank(zip),
        country: None,
    };
    (!address.is_empty()).then_some(address)
}

/// Split a free-text contact name: first token, optional middle tokens, last
/// token. An email alone still yields a contact.
fn contact(
    name: Option<String>,
    email: Option<String>,
    role: Option<String>,
) -> Option<SourceStaff> {
    let email = email.as_deref().and_then(first_email);
    let name = non_blank(name);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut staff = SourceStaff {
        email,
        position: non_blank(role),
        ..Default::default()
    };
    if let Some(name) = name {
        let tokens: Vec<&str> = name.split_whitespace().collect();
        match tokens.as_slice() {
            [] => {}
            [only] => staff.first_name = Some((*only).to_string()),
            [first, last] => {
                staff.first_name = Some((*first).to_string());
                staff.last_name = Some((*last).to_string());
            }
            [first, middle @ .., last] => {
                staff.first_name = Some((*first).to_string());
                staff.middle_name = Some(middle.join(" "));
                staff.last_name = Some((*last).to_string());
            }
        }
    }
    Some(staff)
}

/// `"12,500"` and `"12500"` both count; anything else is not expressed.
fn parse_count(raw: &str) -> Option<u64> {
    let digits: String = raw.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    if digits.is_empty() {
        return None;
    }
    match digits.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::debug!(value = raw, "ignoring unparseable specimen count");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// ExternalSource
// ---------------------------------------------------------------------------

/// Reads the aggregator export from a CSV file on every listing.
#[derive(Debug, Clone)]
pub struct AggregatorExport {
    path: PathBuf,
}

impl AggregatorExport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ExternalSource for AggregatorExport {
    fn kind(&self) -> SourceKind {
        SourceKind::Aggregator
    }

    fn list_records(&self) -> Result<Vec<SourceRecord>, SourceError> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| SourceError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        let records = parse_export(&text, &self.path)?;
        tracing::debug!(path = %self.path.display(), count = records.len(), "aggregator export read");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const HEADER: &str = "collection_uuid,unique_name_uuid,institution,collection,institution_code,collection_code,lsid,description,physical_address,physical_city,physical_state,physical_zip,mailing_address,mailing_city,mailing_state,mailing_zip,contact,contact_email,contact_role,collection_url,collection_catalog_url,cataloged_specimens,taxonomic_coverage,geographic_range,update_date";

    fn export(rows: &[&str]) -> String {
        let mut text = String::from(HEADER);
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        text
    }

    const ROW: &str = "c-1,u-1,University of Michigan,Herbarium,MICH,MICH-V,urn:lsid:idigbio.org:collections:1,Vascular plants,3600 Varsity Dr,Ann Arbor,MI,48108,,,,,Richard K. Rabeler,rabeler@umich.edu,Collection Manager,http://herbarium.lsa.umich.edu,,\"1,750,000\",Plantae,Worldwide,2021-06-14";

    #[test]
    fn row_maps_refs_and_fields() {
        let records = parse_export(&export(&[ROW]), Path::new("agg.csv")).expect("parse");
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.record_id, "c-1");
        assert_eq!(r.collection_refs.len(), 2);
        assert_eq!(
            r.collection_refs[0],
            ExternalRef::Tag {
                namespace: "idigbio.org".into(),
                name: "CollectionUUID".into(),
                value: "c-1".into()
            }
        );
        assert_eq!(r.institution_refs.len(), 1);
        assert_eq!(r.institution_code.as_deref(), Some("MICH"));
        assert_eq!(r.number_specimens, Some(1_750_000));
        assert_eq!(r.address.as_ref().and_then(|a| a.city.as_deref()), Some("Ann Arbor"));
        assert_eq!(r.mailing_address, None);
        assert!(r.last_modified.is_some());
    }

    #[test]
    fn contact_becomes_single_staff_entry() {
        let records = parse_export(&export(&[ROW]), Path::new("agg.csv")).expect("parse");
        let staff = &records[0].staff;
        assert_eq!(staff.len(), 1);
        assert_eq!(staff[0].first_name.as_deref(), Some("Richard"));
        assert_eq!(staff[0].middle_name.as_deref(), Some("K."));
        assert_eq!(staff[0].last_name.as_deref(), Some("Rabeler"));
        assert_eq!(staff[0].position.as_deref(), Some("Collection Manager"));
        assert_eq!(staff[0].irn, None);
    }

    #[test]
    fn row_without_uuid_is_malformed() {
        let row = ",u-1,Inst,Coll,I,C,,,,,,,,,,,,,,,,,,,";
        let err = parse_export(&export(&[row]), Path::new("agg.csv")).unwrap_err();
        assert!(matches!(err, SourceError::Malformed { .. }));
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn ragged_row_is_malformed() {
        let err = parse_export(&export(&["c-1,u-1"]), Path::new("agg.csv")).unwrap_err();
        assert!(matches!(err, SourceError::Malformed { .. }));
    }

    #[rstest]
    #[case("12500", Some(12_500))]
    #[case("12,500", Some(12_500))]
    #[case("", None)]
    #[case("about 10k", None)]
    fn specimen_counts(#[case] raw: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_count(raw), expected);
    }

    #[test]
    fn email_only_contact_is_kept() {
        let staff = contact(None, Some("a@b.org".into()), None).expect("contact");
        assert_eq!(staff.email.as_deref(), Some("a@b.org"));
        assert_eq!(staff.first_name, None);
        assert!(contact(Some("  ".into()), None, None).is_none());
    }
}
