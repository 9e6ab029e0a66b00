//! C5: the signal dispatcher.
//!
//! Handlers installed here touch only atomic flags — no allocation,
//! logging, or locking — so they stay async-signal-safe. The supervisor
//! loop (C6) consumes the flags; callbacks and everything else that needs
//! real capability run from there, never from signal context.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::platform::{install_handler, reset_handler};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static RESTART_REQUESTED: AtomicBool = AtomicBool::new(false);
static REAP_PENDING: AtomicBool = AtomicBool::new(false);

/// The restart trigger is fixed at SIGUSR2 (spec.md §9 resolves its own
/// documented ambiguity this way); SIGUSR1 is deliberately left alone for
/// user-defined forwarding.
pub const RESTART_SIGNAL: i32 = libc::SIGUSR2;

extern "C" fn on_shutdown_signal(_sig: i32) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn on_restart_signal(_sig: i32) {
    RESTART_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn on_sigchld(_sig: i32) {
    REAP_PENDING.store(true, Ordering::SeqCst);
}

/// Install the master's handlers: SIGTERM/SIGINT -> shutdown,
/// SIGUSR2 -> restart, SIGCHLD -> reap. Every other signal is left at
/// default disposition.
pub fn install_master_handlers() -> Result<()> {
    install_handler(libc::SIGTERM, on_shutdown_signal)?;
    install_handler(libc::SIGINT, on_shutdown_signal)?;
    install_handler(RESTART_SIGNAL, on_restart_signal)?;
    install_handler(libc::SIGCHLD, on_sigchld)?;
    Ok(())
}

/// Reset the master's handlers back to default disposition. Called once
/// in each freshly-forked worker so the user's own handlers take effect,
/// and again at the end of [`crate::wait_workers`] as master teardown.
pub fn reset_handlers() -> Result<()> {
    reset_handler(libc::SIGTERM)?;
    reset_handler(libc::SIGINT)?;
    reset_handler(RESTART_SIGNAL)?;
    reset_handler(libc::SIGCHLD)?;
    Ok(())
}

/// Consume (clear) the shutdown flag, returning whether it was set. N
/// deliveries coalesce into a single `true` here — the flag can only ever
/// be read as "requested" once per actual transition.
pub fn take_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

pub fn take_restart_requested() -> bool {
    // Restart is cleared by the supervisor loop itself once it has
    // actually started a rolling cycle, not just on read, so that a
    // restart requested mid-shutdown-check isn't silently dropped.
    RESTART_REQUESTED.load(Ordering::SeqCst)
}

pub fn clear_restart_requested() {
    RESTART_REQUESTED.store(false, Ordering::SeqCst);
}

/// Programmatic equivalent of receiving `RESTART_SIGNAL` — used by
/// [`crate::graceful_restart`] so callers don't have to `kill` their own
/// process to trigger a rolling restart.
pub fn request_restart() {
    RESTART_REQUESTED.store(true, Ordering::SeqCst);
}

pub fn take_reap_pending() -> bool {
    REAP_PENDING.swap(false, Ordering::SeqCst)
}

#[cfg(test)]
pub fn set_shutdown_requested_for_test() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

#[cfg(test)]
pub fn reset_flags_for_test() {
    SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
    RESTART_REQUESTED.store(false, Ordering::SeqCst);
    REAP_PENDING.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // The flags are process-global statics (a fork-safety requirement, not
    // a testing convenience), so these tests run serially to avoid
    // observing each other's stores.

    #[test]
    #[serial]
    fn flags_start_clear() {
        reset_flags_for_test();
        assert!(!take_shutdown_requested());
        assert!(!take_restart_requested());
        assert!(!take_reap_pending());
    }

    #[test]
    #[serial]
    fn multiple_deliveries_coalesce_into_one_observation() {
        reset_flags_for_test();
        on_shutdown_signal(libc::SIGTERM);
        on_shutdown_signal(libc::SIGTERM);
        on_shutdown_signal(libc::SIGINT);
        assert!(take_shutdown_requested());
        // Reading again still reports true until whoever owns the
        // transition explicitly clears it (shutdown never un-requests).
        assert!(take_shutdown_requested());
    }

    #[test]
    #[serial]
    fn reap_pending_is_cleared_on_take() {
        reset_flags_for_test();
        on_sigchld(libc::SIGCHLD);
        assert!(take_reap_pending());
        assert!(!take_reap_pending());
    }

    #[test]
    #[serial]
    fn restart_requested_survives_until_explicitly_cleared() {
        reset_flags_for_test();
        on_restart_signal(RESTART_SIGNAL);
        assert!(take_restart_requested());
        assert!(take_restart_requested());
        clear_restart_requested();
        assert!(!take_restart_requested());
    }
}
