//! Binary entry point for palimpsest.
//!
//! Exercises the exposed surface over plain files and prints structured
//! JSON results.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow printing in the main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use palimpsest::cli::{DetectArgs, ReprocessArgs, cmd_detect, cmd_reprocess};
use palimpsest::observability::{InitOptions, init_logging};
use std::path::PathBuf;
use std::process::ExitCode;

/// Palimpsest - anchor recovery and relationship detection for mutable
/// documents.
#[derive(Parser)]
#[command(name = "palimpsest")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to a TOML configuration file.
    #[arg(short, long, global = true, env = "PALIMPSEST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Reprocess a document against revised text and report anchor
    /// recovery.
    Reprocess {
        /// Path to the baseline text.
        baseline: PathBuf,

        /// Path to the revised text.
        revised: PathBuf,

        /// Path to a JSON file of anchors into the baseline.
        #[arg(short, long)]
        anchors: Option<PathBuf>,

        /// Recovery floor override.
        #[arg(short, long)]
        floor: Option<f32>,

        /// Exit non-zero when the attempt aborts below the floor.
        #[arg(long)]
        strict: bool,
    },

    /// Detect relationships within a document, optionally across a second
    /// one.
    Detect {
        /// Path to the document text.
        document: PathBuf,

        /// Path to a second document for cross-document detection.
        #[arg(long)]
        cross: Option<PathBuf>,

        /// Domain label for the first document.
        #[arg(long)]
        domain: Option<String>,

        /// Domain label for the second document.
        #[arg(long)]
        cross_domain: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(InitOptions {
        verbose: cli.verbose,
        json: cli.log_json,
    });

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Reprocess {
            baseline,
            revised,
            anchors,
            floor,
            strict,
        } => {
            let report = cmd_reprocess(&ReprocessArgs {
                baseline,
                revised,
                anchors,
                floor,
                strict,
                config: cli.config,
            })
            .context("reprocessing failed")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("serializing report")?
            );
        },
        Commands::Detect {
            document,
            cross,
            domain,
            cross_domain,
        } => {
            let edges = cmd_detect(&DetectArgs {
                document,
                cross,
                domain,
                cross_domain,
                config: cli.config,
            })
            .context("detection failed")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&edges).context("serializing edges")?
            );
        },
    }
    Ok(())
}
