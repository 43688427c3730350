//! Global `tracing` logger setup for the `starlight` binary. Grounded on
//! the source workspace's standalone `logger` crate; `Targets` there is
//! swapped for `EnvFilter` since that's the feature this workspace actually
//! enables on `tracing-subscriber`.

use tracing_subscriber::EnvFilter;

/// Initializes a global logger that prints to stdout. Defaults to `info`
/// level; override with `RUST_LOG`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(true)
        .try_init()
        .expect("failed to set up logger");
}
