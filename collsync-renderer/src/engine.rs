//! Tera rendering engine: [`NotificationKind`], [`TemplateEngine`] and
//! [`Renderer`].
//!
//! # Templates
//!
//! | Template              | Renders                          | Outbox file name          |
//! |-----------------------|----------------------------------|---------------------------|
//! | `report.txt.tera`     | the whole run report, plain text | (stdout or `--report`)    |
//! | `conflict.md.tera`    | one conflict notification        | `conflict-<record>.md`    |
//! | `invalid.md.tera`     | one invalid-record notification  | `invalid-<record>.md`     |
//! | `staff_conflict.md.tera` | one unresolved staff entry    | `staff-conflict-<id>.md`  |
//! | `failures.md.tera`    | the end-of-run failure digest    | `failures-<date>.md`      |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tera::Tera;

use collsync_core::SourceRecord;
use collsync_sync::{ConflictOutcome, FailedAction, StaffConflict, SyncReport};

use crate::context::{
    ConflictContext, DigestContext, InvalidContext, RecordCtx, ReportContext, StaffConflictContext,
};
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates, baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const REPORT_TEMPLATE: &str = "report.txt.tera";

const TPLS: &[(&str, &str)] = &[
    (REPORT_TEMPLATE, include_str!("templates/report.txt.tera")),
    ("conflict.md.tera", include_str!("templates/conflict.md.tera")),
    ("invalid.md.tera", include_str!("templates/invalid.md.tera")),
    ("staff_conflict.md.tera", include_str!("templates/staff_conflict.md.tera")),
    ("failures.md.tera", include_str!("templates/failures.md.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn collect_template_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RenderError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if meta.is_dir() {
            collect_template_files(&path, out)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut files = Vec::new();
    collect_template_files(dir, &mut files)?;
    let mut templates = Vec::new();
    for path in files {
        if path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let name = normalize_template_name(rel);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((name, contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = HashMap::new();
    for (name, content) in TPLS {
        templates.insert(normalize_template_name(Path::new(name)), (*content).to_string());
    }
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.insert(name, content);
        }
    }

    let mut tera = Tera::default();
    let items: Vec<(String, String)> = templates.into_iter().collect();
    tera.add_raw_templates(items)?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// NotificationKind
// ---------------------------------------------------------------------------

/// The notification bodies the renderer produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Conflict,
    InvalidRecord,
    StaffConflict,
    FailureDigest,
}

impl NotificationKind {
    pub fn all() -> &'static [NotificationKind] {
        &[
            NotificationKind::Conflict,
            NotificationKind::InvalidRecord,
            NotificationKind::StaffConflict,
            NotificationKind::FailureDigest,
        ]
    }

    pub fn template_name(&self) -> &'static str {
        match self {
            NotificationKind::Conflict      => "conflict.md.tera",
            NotificationKind::InvalidRecord => "invalid.md.tera",
            NotificationKind::StaffConflict => "staff_conflict.md.tera",
            NotificationKind::FailureDigest => "failures.md.tera",
        }
    }

    /// File-name prefix used when a notification is written to an outbox.
    pub fn prefix(&self) -> &'static str {
        match self {
            NotificationKind::Conflict      => "conflict",
            NotificationKind::InvalidRecord => "invalid",
            NotificationKind::StaffConflict => "staff-conflict",
            NotificationKind::FailureDigest => "failures",
        }
    }

    /// `<prefix>-<id>.md`, with path-hostile characters in `id` replaced.
    pub fn file_name(&self, id: &str) -> String {
        let id: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{}-{id}.md", self.prefix())
    }
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera-based engine with embedded defaults and optional user overrides.
///
/// `user_template_dir` may contain `.tera` files that override embedded
/// defaults by name. Template names are normalised to lowercase relative
/// paths.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        let tera = build_tera(user_template_dir)?;
        Ok(TemplateEngine { tera })
    }

    /// Render `template` with any serializable context.
    pub fn render<C: Serialize>(&self, template: &str, ctx: &C) -> Result<String, RenderError> {
        let tera_ctx = tera::Context::from_serialize(ctx)?;
        Ok(self.tera.render(template, &tera_ctx)?)
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders run reports and notification bodies. Create once and reuse.
pub struct Renderer {
    engine: TemplateEngine,
}

impl Renderer {
    /// A renderer using the embedded templates only.
    pub fn new() -> Result<Self, RenderError> {
        Self::with_overrides(None)
    }

    /// A renderer whose embedded templates may be overridden from `dir`.
    pub fn with_overrides(dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(Renderer {
            engine: TemplateEngine::new(dir)?,
        })
    }

    pub fn render_report(
        &self,
        report: &SyncReport,
        generated_at: DateTime<Utc>,
    ) -> Result<String, RenderError> {
        let ctx = ReportContext::from_report(report, generated_at);
        self.engine.render(REPORT_TEMPLATE, &ctx)
    }

    pub fn render_conflict(&self, conflict: &ConflictOutcome) -> Result<String, RenderError> {
        let ctx = ConflictContext::from_conflict(conflict);
        self.engine
            .render(NotificationKind::Conflict.template_name(), &ctx)
    }

    pub fn render_invalid(&self, record: &SourceRecord, reason: &str) -> Result<String, RenderError> {
        let ctx = InvalidContext {
            record: RecordCtx::from_record(record),
            reason: reason.to_string(),
        };
        self.engine
            .render(NotificationKind::InvalidRecord.template_name(), &ctx)
    }

    pub fn render_staff_conflict(
        &self,
        record: &SourceRecord,
        conflict: &StaffConflict,
    ) -> Result<String, RenderError> {
        let ctx = StaffConflictContext::from_conflict(record, conflict);
        self.engine
            .render(NotificationKind::StaffConflict.template_name(), &ctx)
    }

    pub fn render_failure_digest(&self, failures: &[FailedAction]) -> Result<String, RenderError> {
        let ctx = DigestContext::from_failures(failures);
        self.engine
            .render(NotificationKind::FailureDigest.template_name(), &ctx)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
