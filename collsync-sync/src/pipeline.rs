//! One sync run: load, index, reconcile every record, report.
//!
//! ```text
//! run(ctx, kind)
//!   load_all            registry listings + export, concurrently
//!   MatchIndex::build
//!   reconcile_all       sequential, on the blocking pool
//!   join notifications
//!   failure digest      live runs with failures only
//! ```

use std::sync::Arc;

use collsync_core::{
    config::StaffThresholds, ExternalSource, RegistrySource, SourceError, SourceKind, SyncConfig,
};
use tokio::runtime::Handle;

use crate::{
    driver::reconcile_all,
    error::SyncError,
    executor::{CallExecutor, Notifier},
    index::MatchIndex,
    load::load_all,
    outcome::{ResultAccumulator, SyncReport},
    strategies::Reconciler,
};

/// Collaborators and knobs of a run.
#[derive(Clone)]
pub struct SyncContext {
    pub registry: Arc<dyn RegistrySource>,
    pub herbarium: Option<Arc<dyn ExternalSource>>,
    pub aggregator: Option<Arc<dyn ExternalSource>>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub thresholds: StaffThresholds,
    pub page_size: u64,
    pub dry_run: bool,
}

impl SyncContext {
    /// A context with no sources and no notifier, using the config's knobs.
    pub fn new(registry: Arc<dyn RegistrySource>, config: &SyncConfig) -> Self {
        Self {
            registry,
            herbarium: None,
            aggregator: None,
            notifier: None,
            thresholds: config.staff,
            page_size: config.registry.page_size,
            dry_run: config.dry_run,
        }
    }

    fn source(&self, kind: SourceKind) -> Option<Arc<dyn ExternalSource>> {
        match kind {
            SourceKind::Herbarium => self.herbarium.clone(),
            SourceKind::Aggregator => self.aggregator.clone(),
        }
    }
}

/// Reconcile every record of `kind` against the registry.
///
/// Only load failures are fatal. Failed registry calls are recorded in the
/// report and the run moves on to the next record.
pub async fn run(ctx: &SyncContext, kind: SourceKind) -> Result<SyncReport, SyncError> {
    let source = ctx
        .source(kind)
        .ok_or_else(|| SourceError::NotConfigured(kind.to_string()))?;
    tracing::info!(source = %kind, dry_run = ctx.dry_run, "sync started");

    let loaded = load_all(Arc::clone(&ctx.registry), source, ctx.page_size).await?;
    let mut index = MatchIndex::build(loaded.institutions, loaded.collections, loaded.persons);
    let records = loaded.records;

    let executor = CallExecutor::new(ctx.dry_run, ctx.notifier.clone(), Some(Handle::current()));
    let registry = Arc::clone(&ctx.registry);
    let thresholds = ctx.thresholds;
    let dry_run = ctx.dry_run;

    let (mut executor, mut accumulator) = tokio::task::spawn_blocking(move || {
        let mut executor = executor;
        let mut accumulator = ResultAccumulator::new(kind, dry_run);
        let mut reconciler = Reconciler {
            registry: registry.as_ref(),
            index: &mut index,
            executor: &mut executor,
            thresholds,
        };
        reconcile_all(&mut reconciler, &records, &mut accumulator);
        (executor, accumulator)
    })
    .await
    .map_err(|err| SyncError::Task {
        task: "reconcile",
        message: err.to_string(),
    })?;

    executor.join_notifications().await;
    if !executor.is_dry_run() {
        executor.notify_failure_digest();
        executor.join_notifications().await;
    }

    accumulator.add_failures(executor.failures());
    let report = accumulator.finish();
    tracing::info!(
        source = %kind,
        records = report.summary.records,
        creates = report.summary.creates(),
        updates = report.summary.updates(),
        conflicts = report.summary.conflicts,
        invalid = report.summary.invalid,
        failed = report.summary.failed_actions,
        "sync finished"
    );
    Ok(report)
}
