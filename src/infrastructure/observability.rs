//! Log output setup.

use crate::config::ObservabilityEnvConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Install the global subscriber: an `EnvFilter` built from the configured
/// directives and one fmt layer on stderr.
///
/// Returns `false` when a subscriber was already installed (tests, or an
/// embedding application that set up its own).
pub fn init_tracing(config: &ObservabilityEnvConfig) -> bool {
    let filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .with_target(config.with_target);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
