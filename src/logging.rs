//! Optional tracing setup for binaries and tests that embed the library.
//!
//! The library itself only emits `tracing` events; nothing is installed
//! unless the caller asks for it here.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter override, e.g. `HVREMOTE_LOG=hvremote=trace`.
pub const LOG_ENV: &str = "HVREMOTE_LOG";

/// Default filter: `hvremote=info`, or `hvremote=debug` when verbose.
pub fn default_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    EnvFilter::new(format!("hvremote={level}"))
}

/// Install a stderr fmt subscriber. Returns false if one was already set.
pub fn init(verbose: bool) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| default_filter(verbose));
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_ok()
}
