//! File-based [`Notifier`]: every notification body is rendered and dropped
//! into an outbox directory for whoever picks them up.
//!
//! Write flow: render → `<name>.tmp` sibling → `rename`.

use std::path::{Path, PathBuf};

use chrono::Utc;

use collsync_core::SourceRecord;
use collsync_renderer::{NotificationKind, Renderer};
use collsync_sync::{ConflictOutcome, FailedAction, Notifier, NotifyError, StaffConflict};

pub struct OutboxNotifier {
    dir: PathBuf,
    renderer: Renderer,
}

impl OutboxNotifier {
    pub fn new(dir: impl Into<PathBuf>, renderer: Renderer) -> Self {
        Self {
            dir: dir.into(),
            renderer,
        }
    }

    fn deliver(&self, kind: NotificationKind, id: &str, body: String) -> Result<(), NotifyError> {
        let path = self.dir.join(kind.file_name(id));
        write_atomic(&path, &body)?;
        tracing::debug!(path = %path.display(), "notification written");
        Ok(())
    }
}

impl Notifier for OutboxNotifier {
    fn send_conflict(&self, conflict: &ConflictOutcome) -> Result<(), NotifyError> {
        let body = self
            .renderer
            .render_conflict(conflict)
            .map_err(|e| NotifyError::Render(e.to_string()))?;
        self.deliver(NotificationKind::Conflict, &conflict.record.record_id, body)
    }

    fn send_invalid_record(&self, record: &SourceRecord, reason: &str) -> Result<(), NotifyError> {
        let body = self
            .renderer
            .render_invalid(record, reason)
            .map_err(|e| NotifyError::Render(e.to_string()))?;
        self.deliver(NotificationKind::InvalidRecord, &record.record_id, body)
    }

    fn send_staff_conflict(
        &self,
        record: &SourceRecord,
        conflict: &StaffConflict,
    ) -> Result<(), NotifyError> {
        let body = self
            .renderer
            .render_staff_conflict(record, conflict)
            .map_err(|e| NotifyError::Render(e.to_string()))?;
        let staff = conflict
            .staff
            .irn
            .clone()
            .unwrap_or_else(|| conflict.staff.full_name());
        let id = format!("{}-{staff}", record.record_id);
        self.deliver(NotificationKind::StaffConflict, &id, body)
    }

    fn send_failure_digest(&self, failures: &[FailedAction]) -> Result<(), NotifyError> {
        let body = self
            .renderer
            .render_failure_digest(failures)
            .map_err(|e| NotifyError::Render(e.to_string()))?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S").to_string();
        self.deliver(NotificationKind::FailureDigest, &stamp, body)
    }
}

fn io_err(path: &Path, source: std::io::Error) -> NotifyError {
    NotifyError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), NotifyError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "notification.md".to_string());
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));
    std::fs::write(&tmp_path, contents).map_err(|e| io_err(&tmp_path, e))?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(io_err(path, e));
    }
    Ok(())
}
