//! Dry-run aware, failure-isolating wrapper around registry mutations, plus
//! fire-and-forget notification dispatch.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use collsync_core::{
    types::{EntityKey, EntityKind},
    RegistryError, SourceRecord,
};
use serde::Serialize;
use tokio::{runtime::Handle, task::JoinHandle};

use crate::error::{NotifyError, StepFailed};
use crate::outcome::{ConflictOutcome, StaffConflict};

/// The entity a failed action was aimed at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<EntityKey>,
    /// Human-readable label, usually the code or full name.
    pub label: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, key: Option<EntityKey>, label: impl Into<String>) -> Self {
        Self {
            kind,
            key,
            label: label.into(),
        }
    }

    pub(crate) fn with_key(&self, key: EntityKey) -> Self {
        Self {
            key: Some(key),
            ..self.clone()
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            Some(key) => write!(f, "{} {} ({key})", self.kind, self.label),
            None => write!(f, "{} {}", self.kind, self.label),
        }
    }
}

/// A registry call or notification that failed during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedAction {
    /// `None` for notification failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityRef>,
    pub action: String,
    pub message: String,
    /// The source record being reconciled when the call failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Calls that had already succeeded for that record. They stay applied.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub applied: Vec<String>,
}

/// Out-of-band delivery of conflicts, invalid records and failure digests.
pub trait Notifier: Send + Sync {
    fn send_conflict(&self, conflict: &ConflictOutcome) -> Result<(), NotifyError>;

    fn send_invalid_record(&self, record: &SourceRecord, reason: &str) -> Result<(), NotifyError>;

    fn send_staff_conflict(
        &self,
        record: &SourceRecord,
        conflict: &StaffConflict,
    ) -> Result<(), NotifyError>;

    fn send_failure_digest(&self, failures: &[FailedAction]) -> Result<(), NotifyError>;
}

pub struct CallExecutor {
    dry_run: bool,
    failures: Vec<FailedAction>,
    current_record: Option<String>,
    /// Successful calls for `current_record`.
    applied: Vec<String>,
    notifier: Option<Arc<dyn Notifier>>,
    runtime: Option<Handle>,
    notify_failures: Arc<Mutex<Vec<FailedAction>>>,
    pending: Vec<JoinHandle<()>>,
}

impl fmt::Debug for CallExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallExecutor")
            .field("dry_run", &self.dry_run)
            .field("failures", &self.failures.len())
            .field("notifier", &self.notifier.is_some())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl CallExecutor {
    /// Without a runtime handle, notifications are delivered inline.
    pub fn new(dry_run: bool, notifier: Option<Arc<dyn Notifier>>, runtime: Option<Handle>) -> Self {
        Self {
            dry_run,
            failures: Vec::new(),
            current_record: None,
            applied: Vec::new(),
            notifier,
            runtime,
            notify_failures: Arc::new(Mutex::new(Vec::new())),
            pending: Vec::new(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Start tracking calls for `record_id`; a later failure lists the calls
    /// that already went through.
    pub fn begin_record(&mut self, record_id: &str) {
        self.current_record = Some(record_id.to_string());
        self.applied.clear();
    }

    /// Run one registry mutation.
    ///
    /// Dry-run skips `call` and hands back `default`, so callers carry on with
    /// the proposed entity. A live failure is recorded and returned as
    /// [`StepFailed`]; the caller abandons the rest of the record.
    pub fn execute<T>(
        &mut self,
        entity: &EntityRef,
        action: &str,
        default: T,
        call: impl FnOnce() -> Result<T, RegistryError>,
    ) -> Result<T, StepFailed> {
        if self.dry_run {
            tracing::info!(entity = %entity, "[dry-run] would {action}");
            return Ok(default);
        }
        match call() {
            Ok(value) => {
                tracing::info!(entity = %entity, "{action}");
                self.applied.push(format!("{action} ({entity})"));
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(
                    entity = %entity,
                    error = %err,
                    already_applied = self.applied.len(),
                    "{action} failed"
                );
                self.failures.push(FailedAction {
                    entity: Some(entity.clone()),
                    action: action.to_string(),
                    message: err.to_string(),
                    record_id: self.current_record.clone(),
                    applied: self.applied.clone(),
                });
                Err(StepFailed)
            }
        }
    }

    /// Dispatch a notification without waiting for it. Skipped in dry-run and
    /// when no notifier is configured.
    pub fn notify<F>(&mut self, action: String, send: F)
    where
        F: FnOnce(&dyn Notifier) -> Result<(), NotifyError> + Send + 'static,
    {
        if self.dry_run {
            tracing::debug!("[dry-run] would {action}");
            return;
        }
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let failures = Arc::clone(&self.notify_failures);
        let job = move || {
            if let Err(err) = send(notifier.as_ref()) {
                tracing::warn!(error = %err, "{action} failed");
                lock(&failures).push(FailedAction {
                    entity: None,
                    action,
                    message: err.to_string(),
                    record_id: None,
                    applied: Vec::new(),
                });
            }
        };
        match &self.runtime {
            Some(handle) => self.pending.push(handle.spawn_blocking(job)),
            None => job(),
        }
    }

    pub fn notify_conflict(&mut self, conflict: &ConflictOutcome) {
        let conflict = conflict.clone();
        let action = format!("notify conflict for record {}", conflict.record.record_id);
        self.notify(action, move |n| n.send_conflict(&conflict));
    }

    pub fn notify_invalid(&mut self, record: &SourceRecord, reason: &str) {
        let record = record.clone();
        let reason = reason.to_string();
        let action = format!("notify invalid record {}", record.record_id);
        self.notify(action, move |n| n.send_invalid_record(&record, &reason));
    }

    pub fn notify_staff_conflict(&mut self, record: &SourceRecord, conflict: &StaffConflict) {
        let record = record.clone();
        let conflict = conflict.clone();
        let action = format!(
            "notify staff conflict for {} in record {}",
            conflict.staff.full_name(),
            record.record_id
        );
        self.notify(action, move |n| n.send_staff_conflict(&record, &conflict));
    }

    /// Wait for every dispatched notification. Called once the reconcile loop
    /// is over.
    pub async fn join_notifications(&mut self) {
        for handle in self.pending.drain(..) {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "notification task join error");
            }
        }
    }

    /// Registry failures so far, then notification failures.
    pub fn failures(&self) -> Vec<FailedAction> {
        let mut all = self.failures.clone();
        all.extend(lock(&self.notify_failures).iter().cloned());
        all
    }

    /// Send the digest of every failure recorded so far. Live runs only.
    pub fn notify_failure_digest(&mut self) {
        let failures = self.failures();
        if failures.is_empty() {
            return;
        }
        let action = format!("send failure digest ({} failures)", failures.len());
        self.notify(action, move |n| n.send_failure_digest(&failures));
    }
}

fn lock(failures: &Mutex<Vec<FailedAction>>) -> MutexGuard<'_, Vec<FailedAction>> {
    failures.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
