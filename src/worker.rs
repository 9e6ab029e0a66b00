//! C7: worker bootstrap.
//!
//! A worker incarnation, whether it's one of the initial N or a respawn
//! replacing a crashed slot, is always brought up the same way: `fork()`
//! followed immediately by `execve()` of the current binary with its
//! original `argv`, carrying the assigned slot id across the exec in an
//! environment variable. The new process starts over at its own `main`,
//! calls [`crate::init`] again, and this module's [`worker_id_from_env`]
//! makes that second call return `IsMaster::Worker` without forking
//! anything — see `SPEC_FULL.md` §6 for why a plain `fork()` without
//! re-exec cannot support respawn.

use std::ffi::CString;

use crate::error::{Error, Result};
use crate::platform::{self, ForkResult};
use crate::registry::WorkerId;
use crate::signals;

/// Name of the environment variable a spawned worker process inherits to
/// learn its slot id. Absent in the original (master) invocation.
pub const WORKER_ID_ENV: &str = "CLUSTERMASTER_WORKER_ID";

/// If this process was launched as a worker re-exec, return its assigned
/// id. `None` means this is the original invocation (the prospective
/// master).
pub fn worker_id_from_env() -> Option<WorkerId> {
    std::env::var(WORKER_ID_ENV)
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .filter(|&v| (1..=254).contains(&v))
        .map(|v| v as WorkerId)
}

/// `argv[0]` plus every original argument, captured once before any fork
/// so every re-exec launches with exactly what the user originally ran.
pub fn capture_argv() -> Result<Vec<CString>> {
    std::env::args_os()
        .map(|arg| {
            CString::new(arg.into_encoded_bytes())
                .map_err(|_| Error::Platform(std::io::Error::other("argv contains NUL byte")))
        })
        .collect()
}

/// Fork and re-exec the current binary as worker `id`. Returns the child
/// pid in the parent; never returns in the child (it either becomes the
/// worker via `execve` or exits on an unrecoverable exec failure).
pub fn spawn(id: WorkerId, argv: &[CString]) -> Result<libc::pid_t> {
    let fork_result = platform::fork().map_err(|err| match err {
        Error::Platform(source) => Error::Spawn {
            worker_id: id,
            source,
        },
        other => other,
    })?;
    match fork_result {
        ForkResult::Parent { child_pid } => Ok(child_pid),
        ForkResult::Child => {
            // Best-effort: an exec failure below is fatal for this
            // process either way, so a reset error here isn't worth
            // aborting over before we've even tried to exec.
            let _ = signals::reset_handlers();
            std::env::set_var(WORKER_ID_ENV, id.to_string());
            exec_self(argv);
            // execve only returns on failure.
            tracing::error!(
                worker_id = id,
                error = %std::io::Error::last_os_error(),
                "execve failed in freshly forked worker, exiting"
            );
            std::process::exit(127);
        }
    }
}

fn exec_self(argv: &[CString]) -> ! {
    let exe = match std::env::current_exe() {
        Ok(path) => path,
        Err(_) => {
            std::process::exit(127);
        }
    };
    let Ok(exe_c) = CString::new(exe.into_os_string().into_encoded_bytes()) else {
        std::process::exit(127);
    };

    let mut argv_ptrs: Vec<*const libc::c_char> =
        argv.iter().map(|a| a.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    unsafe {
        libc::execv(exe_c.as_ptr(), argv_ptrs.as_ptr());
    }
    // Only reached if execv failed; caller logs and exits.
    std::process::exit(127);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn worker_id_from_env_parses_valid_range() {
        std::env::remove_var(WORKER_ID_ENV);
        assert_eq!(worker_id_from_env(), None);

        std::env::set_var(WORKER_ID_ENV, "3");
        assert_eq!(worker_id_from_env(), Some(3));

        std::env::set_var(WORKER_ID_ENV, "0");
        assert_eq!(worker_id_from_env(), None);

        std::env::set_var(WORKER_ID_ENV, "999");
        assert_eq!(worker_id_from_env(), None);

        std::env::set_var(WORKER_ID_ENV, "not-a-number");
        assert_eq!(worker_id_from_env(), None);

        std::env::remove_var(WORKER_ID_ENV);
    }

    #[test]
    fn capture_argv_round_trips_current_process_args() {
        let argv = capture_argv().unwrap();
        assert!(!argv.is_empty());
    }
}
