//! C1: platform primitives — CPU topology, fork, signal send/mask, sleep,
//! the monotonic clock, and async-signal-safe handler installation.
//!
//! Everything here is a thin, `unsafe`-isolated wrapper around `libc`; no
//! policy lives in this module, only POSIX plumbing, the same split the
//! teacher keeps between its socket setup (`socket2`/raw `libc::setsockopt`
//! calls) and the policy that uses it.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Clamp a CPU count (or any worker count) into the `[1, 254]` range the
/// data model requires for worker ids.
pub fn clamp_cpus(n: usize) -> u8 {
    n.clamp(1, 254) as u8
}

/// Logical CPU count, clamped to `[1, 254]`.
pub fn logical_cpus() -> u8 {
    let n = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    clamp_cpus(n)
}

/// Physical CPU count. Linux exposes this via `/sys/devices/system/cpu/*`
/// core siblings; when that information isn't available we fall back to
/// the logical count, same as `logical_cpus`.
pub fn physical_cpus() -> u8 {
    physical_cpus_impl().unwrap_or_else(logical_cpus)
}

#[cfg(target_os = "linux")]
fn physical_cpus_impl() -> Option<u8> {
    use std::collections::HashSet;
    use std::fs;

    let mut seen = HashSet::new();
    let mut n = 0usize;
    loop {
        let path = format!(
            "/sys/devices/system/cpu/cpu{n}/topology/core_id"
        );
        let Ok(contents) = fs::read_to_string(&path) else {
            break;
        };
        if let Ok(core_id) = contents.trim().parse::<u32>() {
            let phys_path = format!(
                "/sys/devices/system/cpu/cpu{n}/topology/physical_package_id"
            );
            let pkg_id = fs::read_to_string(&phys_path)
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(0);
            seen.insert((pkg_id, core_id));
        }
        n += 1;
    }
    if seen.is_empty() {
        None
    } else {
        Some(clamp_cpus(seen.len()))
    }
}

#[cfg(not(target_os = "linux"))]
fn physical_cpus_impl() -> Option<u8> {
    None
}

/// Monotonic clock reading, suitable for computing deadlines and window
/// comparisons. Not affected by wall-clock adjustments.
pub fn monotonic_now() -> Instant {
    Instant::now()
}

/// Sleep, interruptibly or not as the caller's use site requires; the
/// supervisor loop relies on this being a best-effort sleep it can skip
/// past once a signal flag is set, not a hard guarantee.
pub fn sleep(duration: Duration) {
    std::thread::sleep(duration);
}

/// Result of a single `fork()` call.
pub enum ForkResult {
    Parent { child_pid: libc::pid_t },
    Child,
}

/// `fork()` the current process.
///
/// # Safety
/// Safe to call, but everything that happens in the child branch before an
/// `exec`/return-to-caller must itself stick to async-signal-safe and
/// fork-safe operations (no unguarded allocation-heavy Rust runtime state
/// shared with the parent's threads) — there are none here because the
/// master never spawns OS threads.
pub fn fork() -> Result<ForkResult> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(Error::Platform(std::io::Error::last_os_error()));
    }
    if pid == 0 {
        Ok(ForkResult::Child)
    } else {
        Ok(ForkResult::Parent { child_pid: pid })
    }
}

/// Send `sig` to `pid`. Unrecognized signal numbers are passed through to
/// the OS unchanged rather than rejected.
pub fn send_signal(pid: libc::pid_t, sig: i32) -> Result<()> {
    let rc = unsafe { libc::kill(pid, sig) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: the process is already gone, which is the expected
        // outcome of a racing reap — not an error worth surfacing.
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(Error::Platform(err));
    }
    Ok(())
}

/// Outcome of a single nonblocking reap attempt.
pub enum ReapOutcome {
    /// No child has changed state since the last reap.
    NoneReady,
    /// `pid` exited; `exit_status` is the raw OS status, `by_signal` is
    /// `Some(signal)` when termination was by signal rather than a normal
    /// exit.
    Exited {
        pid: libc::pid_t,
        exit_status: i32,
        by_signal: Option<i32>,
    },
}

/// Reap at most one terminated child without blocking. Call in a loop
/// until `NoneReady` to drain everything SIGCHLD told us about.
pub fn reap_nonblocking() -> Result<ReapOutcome> {
    let mut status: libc::c_int = 0;
    let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
    if pid == 0 {
        return Ok(ReapOutcome::NoneReady);
    }
    if pid < 0 {
        let err = std::io::Error::last_os_error();
        // ECHILD: no children left to wait for, equivalent to "none ready".
        if err.raw_os_error() == Some(libc::ECHILD) {
            return Ok(ReapOutcome::NoneReady);
        }
        return Err(Error::Reap(err));
    }

    let exited_normally = unsafe { libc::WIFEXITED(status) };
    let (exit_status, by_signal) = if exited_normally {
        (unsafe { libc::WEXITSTATUS(status) }, None)
    } else if unsafe { libc::WIFSIGNALED(status) } {
        let sig = unsafe { libc::WTERMSIG(status) };
        (128 + sig, Some(sig))
    } else {
        (status, None)
    };

    Ok(ReapOutcome::Exited {
        pid,
        exit_status,
        by_signal,
    })
}

/// Block (or unblock) a fixed set of signals for the duration of a
/// critical section — used by C8 to take a consistent registry snapshot
/// without a lock, and by workers to mask signals they don't want
/// delivered while bootstrapping.
pub fn block_signals(signals: &[i32]) -> Result<SignalMaskGuard> {
    let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::sigemptyset(&mut set);
        for &sig in signals {
            libc::sigaddset(&mut set, sig);
        }
    }
    let mut old: libc::sigset_t = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::sigprocmask(libc::SIG_BLOCK, &set, &mut old) };
    if rc != 0 {
        return Err(Error::Platform(std::io::Error::last_os_error()));
    }
    Ok(SignalMaskGuard { old })
}

/// Restores the previous signal mask when dropped.
pub struct SignalMaskGuard {
    old: libc::sigset_t,
}

impl Drop for SignalMaskGuard {
    fn drop(&mut self) {
        unsafe {
            libc::sigprocmask(libc::SIG_SETMASK, &self.old, std::ptr::null_mut());
        }
    }
}

/// Install `handler` (an `extern "C" fn(i32)`, touching only atomics) for
/// `sig`, using `sigaction` rather than `signal()` so the handler is not
/// reset after first delivery and `SA_RESTART` covers slow syscalls.
pub fn install_handler(sig: i32, handler: extern "C" fn(i32)) -> Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = libc::SA_RESTART;
        if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
            return Err(Error::Platform(std::io::Error::last_os_error()));
        }
    }
    Ok(())
}

/// Reset `sig` to its default disposition — used by the worker immediately
/// after fork so the user's own handlers (if any) take effect.
pub fn reset_handler(sig: i32) -> Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = libc::SIG_DFL;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
            return Err(Error::Platform(std::io::Error::last_os_error()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_cpus_stays_in_range() {
        assert_eq!(clamp_cpus(0), 1);
        assert_eq!(clamp_cpus(1), 1);
        assert_eq!(clamp_cpus(9000), 254);
        assert_eq!(clamp_cpus(100), 100);
    }

    #[test]
    fn logical_cpus_is_at_least_one() {
        assert!(logical_cpus() >= 1);
    }

    #[test]
    fn fork_and_reap_roundtrip() {
        match fork().unwrap() {
            ForkResult::Child => {
                std::process::exit(7);
            }
            ForkResult::Parent { child_pid } => {
                // Nonblocking reap may need a moment; give the child a
                // beat to actually exit before polling.
                let mut outcome = reap_nonblocking().unwrap();
                let mut spins = 0;
                while matches!(outcome, ReapOutcome::NoneReady) && spins < 1000 {
                    std::thread::sleep(Duration::from_millis(1));
                    outcome = reap_nonblocking().unwrap();
                    spins += 1;
                }
                match outcome {
                    ReapOutcome::Exited {
                        pid, exit_status, ..
                    } => {
                        assert_eq!(pid, child_pid);
                        assert_eq!(exit_status, 7);
                    }
                    ReapOutcome::NoneReady => panic!("child never reaped"),
                }
            }
        }
    }

    #[test]
    fn send_signal_to_already_reaped_pid_is_not_an_error() {
        let child_pid = match fork().unwrap() {
            ForkResult::Child => std::process::exit(0),
            ForkResult::Parent { child_pid } => child_pid,
        };
        let mut outcome = reap_nonblocking().unwrap();
        let mut spins = 0;
        while matches!(outcome, ReapOutcome::NoneReady) && spins < 1000 {
            std::thread::sleep(Duration::from_millis(1));
            outcome = reap_nonblocking().unwrap();
            spins += 1;
        }
        assert!(matches!(outcome, ReapOutcome::Exited { .. }));
        // The pid is gone now; ESRCH must be swallowed, not surfaced.
        assert!(send_signal(child_pid, libc::SIGTERM).is_ok());
    }
}
