//! Opt-in log output for tests.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber honoring `RUST_LOG` (default `lyra=debug`).
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lyra_stream=debug,lyra_net=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
