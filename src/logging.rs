//! C10: logging setup.
//!
//! The crate itself only ever emits `tracing` events; it never installs a
//! subscriber on your behalf (a library initializing global logging state
//! out from under its caller is a common source of double-init panics).
//! [`init_default_subscriber`] is an opt-in convenience for binaries —
//! the demo worker calls it the same way a real server would wire up
//! `tracing_subscriber::fmt()` before forking.

use tracing_subscriber::EnvFilter;

/// Install a process-wide `tracing_subscriber::fmt` layer filtered by
/// `RUST_LOG`, falling back to `info` for this crate and `warn` elsewhere.
/// Safe to call once per process; call it before [`crate::init`] so the
/// master's pre-fork log lines are captured too.
pub fn init_default_subscriber() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,clustermaster=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
