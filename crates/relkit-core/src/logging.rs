//! Opt-in `tracing` subscriber setup.
//!
//! The library only emits events; an embedding application (or the Python
//! extension via `init_logging`) decides whether anything is printed.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns `false` when a global subscriber was already installed.
pub fn init() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .try_init()
        .is_ok()
}

/// Verbose subscriber that writes through the test harness.
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
