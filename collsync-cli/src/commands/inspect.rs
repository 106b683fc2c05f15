//! `collsync inspect` — registry and export record counts.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use super::{aggregator_source, herbarium_source, load_config, open_registry};

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Config file (defaults to the user config directory).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Entries")]
    what: &'static str,
    #[tabled(rename = "Count")]
    count: String,
}

impl InspectArgs {
    pub fn run(self) -> Result<()> {
        let config = load_config(self.config.as_deref())?;
        let snapshot = open_registry(&config.registry.snapshot)?.snapshot();

        let mut rows = vec![
            CountRow {
                source: "registry".into(),
                what: "institutions",
                count: snapshot.institutions.len().to_string(),
            },
            CountRow {
                source: "registry".into(),
                what: "collections",
                count: snapshot.collections.len().to_string(),
            },
            CountRow {
                source: "registry".into(),
                what: "persons",
                count: snapshot.persons.len().to_string(),
            },
        ];

        for source in [herbarium_source(&config), aggregator_source(&config)]
            .into_iter()
            .flatten()
        {
            let kind = source.kind();
            let records = source
                .list_records()
                .with_context(|| format!("failed to read {kind} export"))?;
            rows.push(CountRow {
                source: kind.to_string(),
                what: "records",
                count: records.len().to_string(),
            });
        }

        println!("{}", "collsync registry".bold());
        println!("  snapshot: {}", config.registry.snapshot.display());
        println!();
        println!("{}", Table::new(rows).with(Style::rounded()));
        Ok(())
    }
}
