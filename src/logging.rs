//! Structured logging initialisation.
//!
//! Every component logs through `tracing`; this module only wires the
//! process-wide subscriber. Zones, the triage thread, reader threads,
//! and the chapter writer each emit their own spans following a shared
//! per-component naming convention.

use crate::config::LoggingConfig;

/// Install a `tracing_subscriber::fmt` subscriber configured from
/// `RUST_LOG` (falling back to `logging.level`) and the requested format.
///
/// Idempotent best-effort: a second call (e.g. in tests that each build
/// their own index) is ignored rather than panicking.
pub fn init(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.level.clone()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = if config.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed; skipping re-init");
    }
}
