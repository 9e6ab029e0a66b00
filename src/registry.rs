//! C2: the worker registry — a fixed-size table of [`WorkerRecord`]s keyed
//! by stable slot id. Slots are reused across respawns; `worker_id` never
//! changes for the lifetime of the supervisor.

use std::time::Instant;

use crate::error::{Error, Result};
use crate::limiter::CrashLimiter;

/// A worker slot identity. `0` is reserved to mean "not a worker" (master
/// or an uninitialized process); live workers are in `[1, 254]`.
pub type WorkerId = u8;

/// Maximum number of worker slots a single cluster may configure.
pub const MAX_WORKERS: usize = 254;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Active,
    Stopping,
    Crashed,
    Respawning,
    Disabled,
}

impl WorkerStatus {
    /// A live incarnation has an OS process backing it right now.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            WorkerStatus::Starting
                | WorkerStatus::Active
                | WorkerStatus::Stopping
                | WorkerStatus::Respawning
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerStatus::Disabled | WorkerStatus::Crashed)
    }
}

/// One worker slot; lifetime is the supervisor's lifetime, incarnations
/// (OS processes) come and go underneath it.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    pub pid: Option<libc::pid_t>,
    pub port: u16,
    pub status: WorkerStatus,
    pub start_time: Option<Instant>,
    pub exit_status: Option<i32>,
    pub crash_count: u32,
    pub respawn_disabled: bool,
    limiter: CrashLimiter,
    /// Deadline (monotonic) for a deferred respawn scheduled after this
    /// slot crashed; `None` when no respawn is pending.
    pub respawn_at: Option<Instant>,
}

impl WorkerRecord {
    fn empty(worker_id: WorkerId, port: u16, respawn_max_crashes: u32) -> Self {
        Self {
            worker_id,
            pid: None,
            port,
            status: WorkerStatus::Crashed,
            start_time: None,
            exit_status: None,
            crash_count: 0,
            respawn_disabled: false,
            limiter: CrashLimiter::new(respawn_max_crashes),
            respawn_at: None,
        }
    }

    pub fn limiter(&self) -> &CrashLimiter {
        &self.limiter
    }

    pub fn limiter_mut(&mut self) -> &mut CrashLimiter {
        &mut self.limiter
    }

    /// Read-only projection handed out by C8; never exposes `&mut`.
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            worker_id: self.worker_id,
            pid: self.pid,
            port: self.port,
            status: self.status,
            start_time: self.start_time,
            exit_status: self.exit_status,
            crash_count: self.crash_count,
            respawn_disabled: self.respawn_disabled,
        }
    }
}

/// Lock-free-to-read copy of a [`WorkerRecord`], handed back by
/// [`crate::get_worker_stats`] / [`crate::get_all_workers`].
#[derive(Debug, Clone, Copy)]
pub struct WorkerSnapshot {
    pub worker_id: WorkerId,
    pub pid: Option<libc::pid_t>,
    pub port: u16,
    pub status: WorkerStatus,
    pub start_time: Option<Instant>,
    pub exit_status: Option<i32>,
    pub crash_count: u32,
    pub respawn_disabled: bool,
}

/// Fixed-size table of worker slots. Never resized after construction.
pub struct Registry {
    slots: Vec<WorkerRecord>,
}

impl Registry {
    pub fn new(worker_count: usize, port: u16, respawn_max_crashes: u32) -> Self {
        let slots = (1..=worker_count as WorkerId)
            .map(|id| WorkerRecord::empty(id, port, respawn_max_crashes))
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn lookup(&self, id: WorkerId) -> Result<&WorkerRecord> {
        self.slots
            .get(id.wrapping_sub(1) as usize)
            .filter(|_| id != 0)
            .ok_or(Error::UnknownWorker(id))
    }

    pub fn lookup_mut(&mut self, id: WorkerId) -> Result<&mut WorkerRecord> {
        self.slots
            .get_mut(id.wrapping_sub(1) as usize)
            .filter(|_| id != 0)
            .ok_or(Error::UnknownWorker(id))
    }

    /// Find the slot currently holding `pid`, if any live slot does.
    pub fn find_by_pid(&mut self, pid: libc::pid_t) -> Option<&mut WorkerRecord> {
        self.slots.iter_mut().find(|w| w.pid == Some(pid))
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerRecord> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WorkerRecord> {
        self.slots.iter_mut()
    }

    pub fn iter_live(&self) -> impl Iterator<Item = &WorkerRecord> {
        self.slots.iter().filter(|w| w.status.is_live())
    }

    pub fn count_by_status(&self, status: WorkerStatus) -> usize {
        self.slots.iter().filter(|w| w.status == status).count()
    }

    /// True once every slot is terminal: `Disabled`, or `Crashed` with no
    /// pending respawn (the empty/never-started representation).
    pub fn all_terminal(&self) -> bool {
        self.slots.iter().all(|w| {
            w.status == WorkerStatus::Disabled
                || (w.status == WorkerStatus::Crashed && w.respawn_at.is_none())
        })
    }
}
