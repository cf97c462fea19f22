//! Tracing subscriber setup for the binary.
//!
//! Logs go to stderr so stdout stays clean for `--json` output.

use crate::config::LoggingConfig;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over `config.level`; `verbose` forces debug output.
/// Calling this more than once is harmless.
pub fn init(config: &LoggingConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
    if installed.is_err() {
        tracing::debug!(target: "logging", "subscriber already installed");
    }
}
