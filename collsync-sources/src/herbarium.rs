//! Herbarium directory JSON export.
//!
//! One directory institution becomes one [`SourceRecord`] that targets BOTH a
//! registry institution and a registry collection; both are referenced by the
//! institution's IRN. Staff are embedded in the row.

use std::path::{Path, PathBuf};

use collsync_core::{
    types::{Address, Identifier, IdentifierType},
    ExternalRef, ExternalSource, SourceError, SourceKind, SourceRecord, SourceStaff,
};
use serde::Deserialize;

use crate::{countries::CountryResolver, first_email, first_value, first_url, non_blank, parse_timestamp};

// ---------------------------------------------------------------------------
// Export shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct HerbariumDirectory {
    #[serde(default)]
    pub countries: Vec<CountryEntry>,
    pub institutions: Vec<HerbariumInstitution>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountryEntry {
    pub name: String,
    pub code: String,
}

/// IRNs arrive as numbers or strings depending on the export vintage.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Irn {
    Number(u64),
    Text(String),
}

impl Irn {
    fn as_string(&self) -> String {
        match self {
            Irn::Number(n) => n.to_string(),
            Irn::Text(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HerbariumInstitution {
    pub irn: Option<Irn>,
    pub code: Option<String>,
    pub organization: Option<String>,
    pub division: Option<String>,
    pub department: Option<String>,
    pub date_modified: Option<String>,
    pub current_status: Option<String>,
    pub taxonomic_coverage: Option<String>,
    pub geography: Option<String>,
    #[serde(default)]
    pub address: InstitutionAddress,
    #[serde(default)]
    pub contact: InstitutionContact,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub collections_summary: CollectionsSummary,
    #[serde(default)]
    pub staff: Vec<HerbariumStaff>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstitutionAddress {
    pub physical_street: Option<String>,
    pub physical_city: Option<String>,
    pub physical_state: Option<String>,
    pub physical_zip_code: Option<String>,
    pub physical_country: Option<String>,
    pub postal_street: Option<String>,
    pub postal_city: Option<String>,
    pub postal_state: Option<String>,
    pub postal_zip_code: Option<String>,
    pub postal_country: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstitutionContact {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Location {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionsSummary {
    pub num_specimens: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HerbariumStaff {
    pub irn: Option<Irn>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub position: Option<String>,
    pub date_modified: Option<String>,
    #[serde(default)]
    pub contact: StaffContact,
    #[serde(default)]
    pub address: StaffAddress,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaffContact {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub fax: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffAddress {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
}

/// Parse a directory export. `origin` only labels errors.
pub fn parse_directory(json: &str, origin: &Path) -> Result<HerbariumDirectory, SourceError> {
    serde_json::from_str(json).map_err(|e| SourceError::Malformed {
        path: origin.to_path_buf(),
        message: e.to_string(),
    })
}

impl HerbariumDirectory {
    /// Resolver seeded with this directory's own country spellings.
    pub fn country_resolver(&self) -> CountryResolver {
        CountryResolver::builtin().with_names(
            self.countries
                .iter()
                .map(|c| (c.name.as_str(), c.code.as_str())),
        )
    }

    /// Map every institution to a source record. Rows without an IRN cannot
    /// be tracked across runs and make the export malformed.
    pub fn into_records(self, origin: &Path) -> Result<Vec<SourceRecord>, SourceError> {
        let countries = self.country_resolver();
        self.institutions
            .into_iter()
            .enumerate()
            .map(|(row, inst)| to_record(inst, &countries).ok_or_else(|| SourceError::Malformed {
                path: origin.to_path_buf(),
                message: format!("institution at index {row} has no irn"),
            }))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

fn to_record(inst: HerbariumInstitution, countries: &CountryResolver) -> Option<SourceRecord> {
    let irn = inst.irn.as_ref().map(Irn::as_string).filter(|s| !s.is_empty())?;
    let irn_ref = ExternalRef::Identifier {
        id_type: IdentifierType::Irn,
        value: Identifier::irn(&irn).value,
    };

    let mut record = SourceRecord::new(SourceKind::Herbarium, irn);
    record.institution_refs = vec![irn_ref.clone()];
    record.collection_refs = vec![irn_ref];

    let code = non_blank(inst.code);
    let organization = non_blank(inst.organization);
    record.institution_code = code.clone();
    record.collection_code = code;
    record.collection_name = non_blank(inst.division).or_else(|| organization.clone());
    record.institution_name = organization;
    record.description = non_blank(inst.department);

    record.homepage = inst.contact.web_url.as_deref().and_then(first_url);
    record.email = inst.contact.email.as_deref().and_then(first_email);
    record.phone = inst.contact.phone.as_deref().and_then(first_value);

    let a = inst.address;
    record.address = address(
        a.physical_street,
        a.physical_city,
        a.physical_state,
        a.physical_zip_code,
        a.physical_country,
        countries,
    );
    record.mailing_address = address(
        a.postal_street,
        a.postal_city,
        a.postal_state,
        a.postal_zip_code,
        a.postal_country,
        countries,
    );

    record.latitude = inst.location.lat;
    record.longitude = inst.location.lon;
    record.number_specimens = inst.collections_summary.num_specimens;
    record.taxonomic_coverage = non_blank(inst.taxonomic_coverage);
    record.geography = non_blank(inst.geography);
    record.active = inst
        .current_status
        .as_deref()
        .map(|s| s.trim().eq_ignore_ascii_case("active"));
    record.last_modified = inst.date_modified.as_deref().and_then(parse_timestamp);
    record.staff = inst
        .staff
        .into_iter()
        .map(|s| to_staff(s, countries))
        .collect();
    Some(record)
}

fn to_staff(s: HerbariumStaff, countries: &CountryResolver) -> SourceStaff {
    SourceStaff {
        irn: s.irn.as_ref().map(Irn::as_string).filter(|v| !v.is_empty()),
        first_name: non_blank(s.first_name),
        middle_name: non_blank(s.middle_name),
        last_name: non_blank(s.last_name),
        position: non_blank(s.position),
        email: s.contact.email.as_deref().and_then(first_email),
        phone: s.contact.phone.as_deref().and_then(first_value),
        fax: s.contact.fax.as_deref().and_then(first_value),
        address: address(
            s.address.street,
            s.address.city,
            s.address.state,
            s.address.zip_code,
            s.address.country,
            countries,
        ),
        last_modified: s.date_modified.as_deref().and_then(parse_timestamp),
    }
}

fn address(
    street: Option<String>,
    city: Option<String>,
    state: Option<String>,
    zip: Option<String>,
    country: Option<String>,
    countries: &CountryResolver,
) -> Option<Address> {
    let address = Address {
        street: non_blank(street),
        city: non_blank(city),
        province: non_blank(state),
        postal_code: non_blank(zip),
        country: country.as_deref().and_then(|c| countries.resolve(c)),
    };
    (!address.is_empty()).then_some(address)
}

// ---------------------------------------------------------------------------
// ExternalSource
// ---------------------------------------------------------------------------

/// Reads the herbarium directory export from a JSON file on every listing.
#[derive(Debug, Clone)]
pub struct HerbariumExport {
    path: PathBuf,
}

impl HerbariumExport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<HerbariumDirectory, SourceError> {
        let json = std::fs::read_to_string(&self.path).map_err(|e| SourceError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        parse_directory(&json, &self.path)
    }

    /// The directory's country-name list as `(name, iso_code)` pairs.
    pub fn countries(&self) -> Result<Vec<(String, String)>, SourceError> {
        Ok(self
            .read()?
            .countries
            .into_iter()
            .map(|c| (c.name, c.code))
            .collect())
    }
}

impl ExternalSource for HerbariumExport {
    fn kind(&self) -> SourceKind {
        SourceKind::Herbarium
    }

    fn list_records(&self) -> Result<Vec<SourceRecord>, SourceError> {
        let records = self.read()?.into_records(&self.path)?;
        tracing::debug!(path = %self.path.display(), count = records.len(), "herbarium export read");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = r#"{
      "countries": [{"name": "U.S.A.", "code": "US"}],
      "institutions": [{
        "irn": 124398,
        "code": "NY",
        "organization": "New York Botanical Garden",
        "division": "William & Lynda Steere Herbarium",
        "dateModified": "2023-04-01 10:00:00",
        "currentStatus": "Active",
        "address": {"physicalCity": "Bronx", "physicalCountry": "U.S.A.",
                    "postalStreet": "2900 Southern Blvd", "postalCountry": "Atlantis"},
        "contact": {"email": "herbarium@nybg.org\nother@nybg.org", "webUrl": "www.nybg.org"},
        "location": {"lat": 40.86, "lon": -73.88},
        "collectionsSummary": {"numSpecimens": 7800000},
        "staff": [{
          "irn": "9001",
          "firstName": "Barbara",
          "lastName": "Thiers",
          "position": "Director",
          "contact": {"email": "bthiers@nybg.org"},
          "address": {"country": "U.S.A."}
        }]
      }]
    }"#;

    fn records() -> Vec<SourceRecord> {
        let origin = Path::new("ih.json");
        parse_directory(EXPORT, origin)
            .expect("parse")
            .into_records(origin)
            .expect("records")
    }

    #[test]
    fn institution_maps_to_both_levels() {
        let records = records();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.record_id, "124398");
        assert_eq!(r.institution_name.as_deref(), Some("New York Botanical Garden"));
        assert_eq!(r.collection_name.as_deref(), Some("William & Lynda Steere Herbarium"));
        assert_eq!(r.institution_code.as_deref(), Some("NY"));
        assert_eq!(r.collection_code.as_deref(), Some("NY"));
        assert_eq!(r.institution_refs, r.collection_refs);
        assert_eq!(r.institution_refs[0].to_string(), "IRN:gbif:ih:irn:124398");
        assert_eq!(r.active, Some(true));
        assert_eq!(r.number_specimens, Some(7_800_000));
        assert!(r.last_modified.is_some());
    }

    #[test]
    fn contact_fields_take_first_value_and_normalize_country() {
        let r = &records()[0];
        assert_eq!(r.email.as_deref(), Some("herbarium@nybg.org"));
        assert_eq!(r.homepage.as_deref(), Some("http://www.nybg.org"));
        let physical = r.address.as_ref().expect("address");
        assert_eq!(physical.country.as_deref(), Some("US"));
        let mailing = r.mailing_address.as_ref().expect("mailing");
        assert_eq!(mailing.country, None, "unresolvable country is dropped");
        assert_eq!(mailing.street.as_deref(), Some("2900 Southern Blvd"));
    }

    #[test]
    fn staff_keep_their_irn() {
        let r = &records()[0];
        assert_eq!(r.staff.len(), 1);
        let s = &r.staff[0];
        assert_eq!(s.irn.as_deref(), Some("9001"));
        assert_eq!(s.full_name(), "Barbara Thiers");
        assert_eq!(
            s.address.as_ref().and_then(|a| a.country.as_deref()),
            Some("US")
        );
    }

    #[test]
    fn collection_name_falls_back_to_organization() {
        let json = r#"{"institutions": [{"irn": 1, "code": "MICH", "organization": "University of Michigan"}]}"#;
        let origin = Path::new("ih.json");
        let records = parse_directory(json, origin).unwrap().into_records(origin).unwrap();
        assert_eq!(records[0].collection_name.as_deref(), Some("University of Michigan"));
        assert_eq!(records[0].active, None);
    }

    #[test]
    fn missing_irn_is_malformed() {
        let json = r#"{"institutions": [{"code": "X"}]}"#;
        let origin = Path::new("ih.json");
        let err = parse_directory(json, origin).unwrap().into_records(origin).unwrap_err();
        assert!(matches!(err, SourceError::Malformed { .. }));
    }

    #[test]
    fn invalid_json_is_malformed_with_path() {
        let err = parse_directory("{not json", Path::new("ih.json")).unwrap_err();
        assert!(err.to_string().contains("ih.json"));
    }
}
