//! Tracing subscriber setup for the binary.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Builds the filter: `RUST_LOG` when set and valid, otherwise `default_level`.
pub fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber: env filter plus the fmt layer on stderr.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(default_level: &str) -> bool {
    tracing_subscriber::registry()
        .with(filter(default_level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .is_ok()
}
