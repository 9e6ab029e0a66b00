//! C11: the public facade and the process-wide global state it guards.
//!
//! Global mutable state is unavoidable here (§9 of the design): signal
//! handlers can only communicate through process-global atomics, and the
//! registry they drive has to live somewhere every free function in this
//! crate's public API can reach. It is encapsulated behind a single
//! [`MasterState`], owned by a process-wide [`OnceLock`], exactly as the
//! teacher keeps its tokio runtime and connection pools behind
//! `OnceLock` statics in its global module.

use std::ffi::CString;
use std::sync::OnceLock;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::{ClusterConfig, OnExit, OnStart};
use crate::error::{Error, Result};
use crate::registry::{Registry, WorkerId};
use crate::signals;
use crate::stats::{self, ClusterStats};
use crate::supervisor;
use crate::worker;

/// Returned by [`crate::init`]: which role this process ended up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsMaster {
    Master,
    Worker,
}

impl IsMaster {
    pub fn is_master(self) -> bool {
        matches!(self, IsMaster::Master)
    }

    pub fn is_worker(self) -> bool {
        matches!(self, IsMaster::Worker)
    }
}

/// Process-wide master state: the registry, frozen config, restart
/// cursor, and shutdown bookkeeping. Exists only in the master process;
/// torn down at the end of [`crate::wait_workers`].
pub(crate) struct MasterState {
    pub(crate) config: ClusterConfig,
    pub(crate) registry: Registry,
    pub(crate) argv: Vec<CString>,
    pub(crate) shutdown_deadline: Option<Instant>,
    pub(crate) shutdown_sent: bool,
    pub(crate) restart_active: bool,
    /// Slot currently being restarted, awaiting its replacement's ACTIVE.
    pub(crate) restart_cursor: Option<WorkerId>,
    pub(crate) total_restarts: u64,
    /// `on_start`/`on_exit` calls the loop has decided to make this
    /// iteration, queued up instead of invoked in place. The supervisor
    /// loop runs with `MASTER`'s lock held for the whole iteration
    /// (`parking_lot::Mutex` is not reentrant), so calling a user callback
    /// from inside it would self-deadlock the moment that callback tried
    /// to call back into any master-only facade function
    /// (`get_stats`/`signal_workers`/`graceful_restart`/...) on the same
    /// thread. Draining this after the lock is released keeps callbacks
    /// genuinely unrestricted, per spec.md §9.
    pub(crate) pending_callbacks: Vec<PendingCallback>,
}

/// One queued callback invocation, drained and run by
/// [`crate::wait_workers`] after each iteration's lock is released.
pub(crate) enum PendingCallback {
    OnStart { cb: OnStart, id: WorkerId },
    OnExit {
        cb: OnExit,
        id: WorkerId,
        exit_status: i32,
        is_crash: bool,
    },
}

impl PendingCallback {
    fn invoke(self) {
        match self {
            PendingCallback::OnStart { cb, id } => cb(id),
            PendingCallback::OnExit {
                cb,
                id,
                exit_status,
                is_crash,
            } => cb(id, exit_status, is_crash),
        }
    }
}

static MASTER: OnceLock<Mutex<MasterState>> = OnceLock::new();

/// Worker-local identity, set once at fork time. Immutable thereafter.
struct WorkerLocal {
    id: WorkerId,
    port: u16,
}
static WORKER_LOCAL: OnceLock<WorkerLocal> = OnceLock::new();

fn with_master<T>(f: impl FnOnce(&mut MasterState) -> Result<T>) -> Result<T> {
    let lock = MASTER.get().ok_or(Error::NotMaster)?;
    let mut guard = lock.lock();
    f(&mut guard)
}

/// Initialize the cluster. Every process — master and every worker,
/// initial or respawned — calls this once. See `SPEC_FULL.md` §6 for why
/// respawned workers arrive here via a fresh `execve` rather than a
/// surviving `fork()`.
pub fn init(config: ClusterConfig) -> Result<IsMaster> {
    if MASTER.get().is_some() || WORKER_LOCAL.get().is_some() {
        return Err(Error::AlreadyInitialized);
    }

    if let Some(id) = worker::worker_id_from_env() {
        WORKER_LOCAL
            .set(WorkerLocal {
                id,
                port: config.port,
            })
            .map_err(|_| Error::AlreadyInitialized)?;
        tracing::info!(worker_id = id, port = config.port, "worker started");
        return Ok(IsMaster::Worker);
    }

    let worker_count = config.worker_count();
    let mut registry = Registry::new(worker_count, config.port, config.respawn_max_crashes);
    let argv = worker::capture_argv()?;

    for id in 1..=worker_count as WorkerId {
        // A fork() failure here must not abort bring-up of the rest of the
        // cluster (spec.md §7: SpawnError "does not abort the master") or
        // leak whatever workers already forked in earlier loop iterations
        // — it's handled the same way any other crash is: fed through the
        // crash-rate limiter, which schedules a respawn (picked up once
        // `wait_workers`'s loop starts) or disables the slot.
        match worker::spawn(id, &argv) {
            Ok(pid) => {
                let record = registry.lookup_mut(id)?;
                record.pid = Some(pid);
                record.status = crate::registry::WorkerStatus::Starting;
                record.start_time = Some(Instant::now());
                tracing::info!(worker_id = id, pid, "spawned worker");
            }
            Err(err) => {
                tracing::error!(
                    worker_id = id,
                    error = %err,
                    "initial spawn failed, entering crash-rate logic"
                );
                if let Ok(record) = registry.lookup_mut(id) {
                    supervisor::record_crash_and_decide(record, &config, Instant::now());
                }
            }
        }
        if worker_count > 1 {
            crate::platform::sleep(std::time::Duration::from_millis(
                config.worker_startup_delay_ms,
            ));
        }
    }

    signals::install_master_handlers()?;

    let state = MasterState {
        config,
        registry,
        argv,
        shutdown_deadline: None,
        shutdown_sent: false,
        restart_active: false,
        restart_cursor: None,
        total_restarts: 0,
        pending_callbacks: Vec::new(),
    };
    MASTER
        .set(Mutex::new(state))
        .map_err(|_| Error::AlreadyInitialized)?;

    Ok(IsMaster::Master)
}

/// Master-only: run the supervisor loop until every worker is terminal
/// and any shutdown/restart in progress has completed. Returns
/// immediately if there are zero configured workers.
pub fn wait_workers() -> Result<()> {
    let lock = MASTER.get().ok_or(Error::NotMaster)?;
    {
        let guard = lock.lock();
        if guard.registry.is_empty() {
            return Ok(());
        }
    }
    loop {
        // Run the iteration and pull its queued callbacks out while still
        // holding the lock, then drop the guard before invoking any of
        // them — callbacks must never run with `MASTER`'s lock held, or a
        // callback that calls back into the facade (`get_stats`,
        // `signal_workers`, ...) on this same thread would self-deadlock
        // on the non-reentrant `parking_lot::Mutex`.
        let (done, callbacks) = with_master(|state| {
            let done = supervisor::run_iteration(state);
            let callbacks = std::mem::take(&mut state.pending_callbacks);
            Ok((done, callbacks))
        })?;
        for callback in callbacks {
            callback.invoke();
        }
        if done {
            break;
        }
    }
    signals::reset_handlers()?;
    tracing::info!("all workers terminal, wait_workers returning");
    Ok(())
}

/// Master-only: send `sig` to every live worker.
pub fn signal_workers(sig: i32) -> Result<()> {
    with_master(|state| {
        for worker in state.registry.iter_live() {
            if let Some(pid) = worker.pid {
                crate::platform::send_signal(pid, sig)?;
            }
        }
        Ok(())
    })
}

/// Master-only: begin a graceful rolling restart. Idempotent while one is
/// already in progress.
pub fn graceful_restart() -> Result<()> {
    with_master(|_state| {
        signals::request_restart();
        Ok(())
    })
}

pub fn get_port() -> u16 {
    WORKER_LOCAL.get().map(|w| w.port).unwrap_or(0)
}

pub fn is_master() -> bool {
    MASTER.get().is_some()
}

pub fn is_worker() -> bool {
    WORKER_LOCAL.get().is_some()
}

pub fn worker_id() -> WorkerId {
    WORKER_LOCAL.get().map(|w| w.id).unwrap_or(0)
}

pub fn worker_count() -> usize {
    MASTER.get().map(|m| m.lock().registry.len()).unwrap_or(0)
}

pub fn cpus() -> u8 {
    crate::platform::logical_cpus()
}

pub fn cpus_physical() -> u8 {
    crate::platform::physical_cpus()
}

pub fn get_stats() -> Result<ClusterStats> {
    with_master(|state| {
        let _guard = crate::platform::block_signals(&[libc::SIGCHLD])?;
        Ok(ClusterStats::from_registry(
            &state.registry,
            signals::take_shutdown_requested(),
            signals::take_restart_requested(),
            state.restart_active,
            state.total_restarts,
        ))
    })
}

pub fn get_worker_stats(id: WorkerId) -> Result<crate::registry::WorkerSnapshot> {
    with_master(|state| {
        let _guard = crate::platform::block_signals(&[libc::SIGCHLD])?;
        Ok(state.registry.lookup(id)?.snapshot())
    })
}

pub fn get_all_workers() -> Result<Vec<crate::registry::WorkerSnapshot>> {
    with_master(|state| {
        let _guard = crate::platform::block_signals(&[libc::SIGCHLD])?;
        Ok(stats::snapshot_all(&state.registry))
    })
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    // Tests that exercise `supervisor::run_iteration` build their own
    // `MasterState` directly rather than going through the process-wide
    // `OnceLock`, since that global can only ever be set once per process.
}
