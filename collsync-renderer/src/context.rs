//! Template contexts: flat, serializable views of a run report and of the
//! notification payloads.
//!
//! Every optional value is resolved to a display string here so templates
//! never have to deal with nulls.

use chrono::{DateTime, Utc};
use serde::Serialize;

use collsync_core::{Collection, EntityKey, Institution, Person, SourceRecord};
use collsync_sync::{
    ConflictOutcome, EntityMatch, FailedAction, StaffConflict, StaffOutcome, Summary, SyncReport,
};

const NONE: &str = "(none)";

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ReportContext {
    pub source: String,
    pub dry_run: bool,
    pub generated_at: String,
    pub summary: Summary,
    pub sections: Vec<SectionCtx>,
}

/// One outcome list of the report.
#[derive(Debug, Clone, Serialize)]
pub struct SectionCtx {
    pub title: String,
    pub entries: Vec<EntryCtx>,
}

/// One record within a section.
#[derive(Debug, Clone, Serialize)]
pub struct EntryCtx {
    pub record_id: String,
    pub title: String,
    pub details: Vec<String>,
}

impl ReportContext {
    pub fn from_report(report: &SyncReport, generated_at: DateTime<Utc>) -> Self {
        let only_institution: Vec<EntryCtx> = report
            .only_institution
            .iter()
            .map(|o| {
                let mut details = vec![
                    institution_line(&o.institution),
                    format!("created collection {}", label_collection(&o.new_collection)),
                ];
                details.extend(staff_lines(&o.staff));
                entry(&o.record_id, label_institution(&o.institution.merged), details)
            })
            .collect();
        let only_collection: Vec<EntryCtx> = report
            .only_collection
            .iter()
            .map(|o| {
                let mut details = vec![collection_line(&o.collection)];
                details.extend(staff_lines(&o.staff));
                entry(&o.record_id, label_collection(&o.collection.merged), details)
            })
            .collect();
        let both: Vec<EntryCtx> = report
            .both
            .iter()
            .map(|o| {
                let mut details = vec![
                    institution_line(&o.institution),
                    collection_line(&o.collection),
                ];
                details.extend(staff_lines(&o.staff));
                entry(&o.record_id, label_institution(&o.institution.merged), details)
            })
            .collect();
        let no_match: Vec<EntryCtx> = report
            .no_match
            .iter()
            .map(|o| {
                let mut details = vec![
                    format!("created institution {}", label_institution(&o.new_institution)),
                    format!("created collection {}", label_collection(&o.new_collection)),
                ];
                details.extend(staff_lines(&o.staff));
                entry(&o.record_id, label_institution(&o.new_institution), details)
            })
            .collect();
        let conflicts: Vec<EntryCtx> = report
            .conflicts
            .iter()
            .map(|c| {
                let details = candidates(c).into_iter().map(|c| c.to_string()).collect();
                entry(&c.record.record_id, c.reason.clone(), details)
            })
            .collect();
        let invalid: Vec<EntryCtx> = report
            .invalid
            .iter()
            .map(|i| entry(&i.record.record_id, i.reason.clone(), vec![record_line(&i.record)]))
            .collect();
        let failed: Vec<EntryCtx> = report
            .failed_actions
            .iter()
            .map(|f| {
                let mut details = vec![f.message.clone()];
                if let Some(record_id) = &f.record_id {
                    details.push(format!("while reconciling record {record_id}"));
                }
                if !f.applied.is_empty() {
                    details.push(format!("already applied: {}", f.applied.join("; ")));
                }
                entry(&failure_target(f), f.action.clone(), details)
            })
            .collect();

        let section = |title: &str, entries| SectionCtx {
            title: title.to_string(),
            entries,
        };
        ReportContext {
            source: report.source.to_string(),
            dry_run: report.dry_run,
            generated_at: generated_at.to_rfc3339(),
            summary: report.summary.clone(),
            sections: vec![
                section("Matched institution only", only_institution),
                section("Matched collection only", only_collection),
                section("Matched institution and collection", both),
                section("Created", no_match),
                section("Conflicts", conflicts),
                section("Invalid records", invalid),
                section("Failed actions", failed),
            ],
        }
    }
}

fn entry(record_id: &str, title: String, details: Vec<String>) -> EntryCtx {
    EntryCtx {
        record_id: record_id.to_string(),
        title,
        details,
    }
}

fn label_institution(i: &Institution) -> String {
    format!("{} ({})", i.code, i.name)
}

fn label_collection(c: &Collection) -> String {
    format!("{} ({})", c.code, c.name)
}

fn institution_line(m: &EntityMatch<Institution>) -> String {
    if m.update {
        format!("updated institution {}", label_institution(&m.merged))
    } else {
        format!("institution {} unchanged", m.merged.code)
    }
}

fn collection_line(m: &EntityMatch<Collection>) -> String {
    if m.update {
        format!("updated collection {}", label_collection(&m.merged))
    } else {
        format!("collection {} unchanged", m.merged.code)
    }
}

fn person_label(p: &Person) -> String {
    let name = p.full_name();
    match p.email.as_deref() {
        Some(email) => format!("{name} <{email}>"),
        None => name,
    }
}

fn staff_lines(staff: &StaffOutcome) -> Vec<String> {
    let created = staff
        .created
        .iter()
        .map(|p| format!("created person {}", person_label(p)));
    let updated = staff
        .updated
        .iter()
        .filter(|u| u.update)
        .map(|u| format!("updated person {}", person_label(&u.merged)));
    let conflicts = staff.conflicts.iter().map(|c| {
        format!(
            "staff {} left unresolved, {} candidate persons",
            c.staff.full_name(),
            c.candidates.len()
        )
    });
    let removed = staff
        .removed
        .iter()
        .map(|p| format!("unlinked person {}", person_label(p)));
    created.chain(updated).chain(conflicts).chain(removed).collect()
}

fn failure_target(f: &FailedAction) -> String {
    f.entity
        .as_ref()
        .map_or_else(|| "notification".to_string(), |e| e.to_string())
}

fn record_line(record: &SourceRecord) -> String {
    format!(
        "code {} / name {}",
        record.effective_institution_code().unwrap_or(NONE),
        record.effective_institution_name().unwrap_or(NONE)
    )
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// The identifying fields of a source record.
#[derive(Debug, Clone, Serialize)]
pub struct RecordCtx {
    pub source: String,
    pub record_id: String,
    pub institution_code: String,
    pub institution_name: String,
    pub collection_code: String,
    pub collection_name: String,
    pub refs: Vec<String>,
}

impl RecordCtx {
    pub fn from_record(record: &SourceRecord) -> Self {
        let text = |s: Option<&str>| s.unwrap_or(NONE).to_string();
        RecordCtx {
            source: record.kind.to_string(),
            record_id: record.record_id.clone(),
            institution_code: text(record.effective_institution_code()),
            institution_name: text(record.effective_institution_name()),
            collection_code: text(record.effective_collection_code()),
            collection_name: text(record.effective_collection_name()),
            refs: record
                .institution_refs
                .iter()
                .chain(&record.collection_refs)
                .map(|r| r.to_string())
                .collect(),
        }
    }
}

/// A registry entity listed as a conflict candidate.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateCtx {
    pub kind: String,
    pub key: String,
    pub code: String,
    pub name: String,
}

impl std::fmt::Display for CandidateCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({}) key {}", self.kind, self.code, self.name, self.key)
    }
}

fn candidates(conflict: &ConflictOutcome) -> Vec<CandidateCtx> {
    let key = |k: Option<EntityKey>| k.map_or_else(|| "-".to_string(), |k| k.to_string());
    let institutions = conflict.institutions.iter().map(|i| CandidateCtx {
        kind: "institution".into(),
        key: key(i.key),
        code: i.code.clone(),
        name: i.name.clone(),
    });
    let collections = conflict.collections.iter().map(|c| CandidateCtx {
        kind: "collection".into(),
        key: key(c.key),
        code: c.code.clone(),
        name: c.name.clone(),
    });
    institutions.chain(collections).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ConflictContext {
    pub record: RecordCtx,
    pub reason: String,
    pub candidates: Vec<CandidateCtx>,
}

impl ConflictContext {
    pub fn from_conflict(conflict: &ConflictOutcome) -> Self {
        ConflictContext {
            record: RecordCtx::from_record(&conflict.record),
            reason: conflict.reason.clone(),
            candidates: candidates(conflict),
        }
    }
}

/// A registry person listed against an unresolved staff entry.
#[derive(Debug, Clone, Serialize)]
pub struct PersonCandidateCtx {
    pub key: String,
    pub name: String,
    pub email: String,
    pub identifiers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaffConflictContext {
    pub record: RecordCtx,
    pub staff: String,
    pub staff_irn: String,
    pub staff_email: String,
    pub candidates: Vec<PersonCandidateCtx>,
}

impl StaffConflictContext {
    pub fn from_conflict(record: &SourceRecord, conflict: &StaffConflict) -> Self {
        let staff = &conflict.staff;
        StaffConflictContext {
            record: RecordCtx::from_record(record),
            staff: staff.full_name(),
            staff_irn: staff.irn.clone().unwrap_or_else(|| NONE.to_string()),
            staff_email: staff.email.clone().unwrap_or_else(|| NONE.to_string()),
            candidates: conflict
                .candidates
                .iter()
                .map(|p| PersonCandidateCtx {
                    key: p.key.map_or_else(|| "-".to_string(), |k| k.to_string()),
                    name: p.full_name(),
                    email: p.email.clone().unwrap_or_else(|| NONE.to_string()),
                    identifiers: p
                        .identifiers
                        .iter()
                        .map(|i| format!("{} {}", i.id_type, i.value))
                        .collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvalidContext {
    pub record: RecordCtx,
    pub reason: String,
}

/// One line of the failure digest.
#[derive(Debug, Clone, Serialize)]
pub struct FailureCtx {
    pub target: String,
    pub action: String,
    pub message: String,
    pub record_id: String,
    /// Earlier calls for the same record, joined for a single table cell.
    pub applied: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DigestContext {
    pub count: usize,
    pub failures: Vec<FailureCtx>,
}

impl DigestContext {
    pub fn from_failures(failures: &[FailedAction]) -> Self {
        DigestContext {
            count: failures.len(),
            failures: failures
                .iter()
                .map(|f| FailureCtx {
                    target: failure_target(f),
                    action: f.action.clone(),
                    message: f.message.clone(),
                    record_id: f.record_id.clone().unwrap_or_else(|| "-".to_string()),
                    applied: if f.applied.is_empty() {
                        "-".to_string()
                    } else {
                        f.applied.join("; ")
                    },
                })
                .collect(),
        }
    }
}
