//! tracing subscriber setup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a stderr `fmt` subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Calling this when a global
/// subscriber is already set is a no-op, so tests and embedders can call it
/// freely.
pub fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init();
}
