//! Crate-wide error type.
//!
//! Every failure mode from the supervisor design is represented here as a
//! distinct variant so callers (and log lines) can tell a bad config apart
//! from a worker that simply crashed too often.

use thiserror::Error;

use crate::registry::WorkerId;

/// Convenient result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid `ClusterConfig` supplied to [`crate::init`]. No global state
    /// is modified when this is returned.
    #[error("invalid cluster config: {0}")]
    Config(String),

    /// `fork()` failed while bringing up a worker slot, either during
    /// initial bring-up or a respawn.
    #[error("failed to spawn worker {worker_id}: {source}")]
    Spawn {
        worker_id: WorkerId,
        #[source]
        source: std::io::Error,
    },

    /// A nonblocking reap returned an OS error other than "no child ready".
    #[error("reap failed: {0}")]
    Reap(std::io::Error),

    /// Worker exited with non-zero status or a signal other than a
    /// graceful SIGTERM delivered during STOPPING.
    #[error("worker {worker_id} crashed (exit_status={exit_status:?})")]
    WorkerCrash {
        worker_id: WorkerId,
        exit_status: i32,
    },

    /// The crash-rate limiter tripped for this slot; it is now DISABLED
    /// for the remainder of the supervisor's lifetime.
    #[error("worker {worker_id} disabled after {crash_count} crashes within the respawn window")]
    RespawnDisabled {
        worker_id: WorkerId,
        crash_count: u32,
    },

    /// A worker did not exit before `shutdown_timeout_ms` elapsed and was
    /// escalated to SIGKILL.
    #[error("worker {worker_id} did not exit before shutdown timeout, sent SIGKILL")]
    ShutdownTimeout { worker_id: WorkerId },

    /// Installing a signal handler, or otherwise touching the platform
    /// signal/process APIs, failed in a way the supervisor cannot recover
    /// from (e.g. `sigaction` refused).
    #[error("platform error: {0}")]
    Platform(std::io::Error),

    /// Any of the `get_stats`/`get_worker_stats`/`get_all_workers`
    /// introspection calls, or `signal_workers`/`graceful_restart`,
    /// invoked from a worker process rather than the master.
    #[error("this operation is only available in the master process")]
    NotMaster,

    /// `get_worker_stats`/`lookup` referenced a slot outside `[1, worker_count]`.
    #[error("no such worker id: {0}")]
    UnknownWorker(WorkerId),

    /// `cluster_init` (or any facade call) was invoked a second time in the
    /// same process.
    #[error("cluster is already initialized in this process")]
    AlreadyInitialized,
}
