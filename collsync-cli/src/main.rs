//! collsync: reconcile herbarium-directory and aggregator exports against the
//! collections registry.
//!
//! # Usage
//!
//! ```text
//! collsync sync herbarium|aggregator [--config <file>] [--dry-run] [--json] [--report <file>]
//! collsync inspect [--config <file>]
//! ```
//!
//! `--verbose` raises logging to `debug`; `RUST_LOG` overrides both.

mod commands;
mod outbox;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{inspect::InspectArgs, sync::SyncArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "collsync",
    version,
    about = "Reconcile external collection sources with the collections registry",
    long_about = None,
)]
struct Cli {
    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile one source export against the registry.
    Sync(SyncArgs),

    /// Show registry and source record counts without reconciling.
    Inspect(InspectArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Inspect(args) => args.run(),
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
