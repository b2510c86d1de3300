//! Tracing setup for embedding services and tests.
//!
//! The engine itself only emits `tracing` events; hosts that don't install
//! their own subscriber can call [`init`] to get a stderr logger honoring
//! `RUST_LOG`.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a stderr subscriber.
///
/// `verbosity` raises the default level (0 = warn, 1 = info, 2 = debug,
/// 3+ = trace); an explicit `RUST_LOG` wins. Safe to call more than once:
/// later calls are no-ops.
pub fn init(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hangar={default}")));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
