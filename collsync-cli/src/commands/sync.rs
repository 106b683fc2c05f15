//! `collsync sync` — reconcile one source export against the registry.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;

use collsync_core::{registry::save_snapshot_at, SourceKind};
use collsync_renderer::Renderer;
use collsync_sync::{pipeline, Notifier, Summary, SyncContext, SyncReport};

use super::{aggregator_source, herbarium_source, load_config, open_registry};
use crate::outbox::OutboxNotifier;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum SourceArg {
    Herbarium,
    Aggregator,
}

impl From<SourceArg> for SourceKind {
    fn from(s: SourceArg) -> Self {
        match s {
            SourceArg::Herbarium => SourceKind::Herbarium,
            SourceArg::Aggregator => SourceKind::Aggregator,
        }
    }
}

/// Arguments for `collsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Which export to reconcile.
    #[arg(value_enum)]
    pub source: SourceArg,

    /// Config file (defaults to the user config directory).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Match and report without changing the registry or sending notifications.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the report as JSON instead of text.
    #[arg(long)]
    pub json: bool,

    /// Also write the text report to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let kind = SourceKind::from(self.source);
        let config = load_config(self.config.as_deref())?;
        let dry_run = self.dry_run || config.dry_run;

        let registry = Arc::new(open_registry(&config.registry.snapshot)?);
        let renderer = Renderer::with_overrides(config.notifications.templates.as_deref())
            .context("failed to load report templates")?;

        let mut ctx = SyncContext::new(registry.clone(), &config);
        ctx.dry_run = dry_run;
        ctx.herbarium = herbarium_source(&config);
        ctx.aggregator = aggregator_source(&config);
        if let (true, Some(dir)) = (config.notifications.enabled, &config.notifications.outbox) {
            let notifier_renderer =
                Renderer::with_overrides(config.notifications.templates.as_deref())
                    .context("failed to load notification templates")?;
            let notifier: Arc<dyn Notifier> = Arc::new(OutboxNotifier::new(dir, notifier_renderer));
            ctx.notifier = Some(notifier);
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start tokio runtime")?;
        let report = runtime
            .block_on(pipeline::run(&ctx, kind))
            .with_context(|| format!("{kind} sync failed"))?;

        if !dry_run {
            save_snapshot_at(&config.registry.snapshot, &registry.snapshot()).with_context(|| {
                format!(
                    "failed to save registry snapshot {}",
                    config.registry.snapshot.display()
                )
            })?;
        }

        let text = renderer
            .render_report(&report, chrono::Utc::now())
            .context("failed to render report")?;
        if let Some(path) = &self.report {
            std::fs::write(path, &text)
                .with_context(|| format!("failed to write report {}", path.display()))?;
        }

        if self.json {
            let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
            println!("{json}");
        } else {
            println!("{text}");
            print_status_line(&report);
        }
        Ok(())
    }
}

fn print_status_line(report: &SyncReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    let Summary {
        records,
        conflicts,
        invalid,
        failed_actions,
        ..
    } = report.summary;
    let counts = format!(
        "{records} records, {} creates, {} updates",
        report.summary.creates(),
        report.summary.updates()
    );
    let mark = if failed_actions > 0 {
        "✗".red().bold()
    } else if conflicts + invalid > 0 {
        "!".yellow().bold()
    } else {
        "✓".green().bold()
    };
    println!(
        "{prefix}{mark} {} sync: {counts}, {conflicts} conflicts, {invalid} invalid, {failed_actions} failed",
        report.source
    );
}
