//! Log initialisation for binaries.

use crate::cli::Verbosity;
use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the verbosity picks the level.
/// Calling this twice is harmless (the second install is ignored).
pub fn init(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}
