//! Diagnostic logging via `tracing`.
//!
//! Console output for the operator goes through [`crate::output`]; this is for
//! diagnostics only, written to stderr and filtered by `RUST_LOG`.

use crate::config::Verbosity;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. `RUST_LOG` wins; otherwise `warn`, or
/// `debug` in verbose mode.
///
/// # Errors
/// Fails if a subscriber is already installed.
pub fn init(verbosity: Verbosity) -> anyhow::Result<()> {
    let default_level = if verbosity == Verbosity::Verbose {
        "debug"
    } else {
        "warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    Ok(())
}
