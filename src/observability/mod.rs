//! Observability and telemetry.
//!
//! Structured logging via `tracing`. Metrics are recorded against the
//! `metrics` facade throughout the crate; an embedding application wires
//! the exporter of its choice.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Options for logging initialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Whether verbose output was requested via CLI.
    pub verbose: bool,
    /// Whether to emit JSON lines instead of human-readable output.
    pub json: bool,
}

/// Initializes the global tracing subscriber.
///
/// The filter comes from `PALIMPSEST_LOG` when set, otherwise from the
/// verbosity flag. Safe to call more than once; only the first call takes
/// effect.
pub fn init_logging(options: InitOptions) {
    LOGGING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_env("PALIMPSEST_LOG").unwrap_or_else(|_| {
            EnvFilter::new(if options.verbose { "debug" } else { "info" })
        });

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false);

        let result = if options.json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        if result.is_err() {
            // A subscriber was installed by the embedding application;
            // theirs wins.
            tracing::debug!("tracing subscriber already installed");
        }
    });
}
