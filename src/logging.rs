//! Tracing subscriber setup for the CLI.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a stderr subscriber filtered by `RUST_LOG` (default `warn`).
///
/// `verbose` raises the default to `debug` for this crate when `RUST_LOG`
/// is unset.
pub fn init(verbose: bool) {
    let fallback = if verbose { "wrapchain=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
