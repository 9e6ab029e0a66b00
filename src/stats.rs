//! C8: read-only introspection snapshots.

use crate::registry::{Registry, WorkerSnapshot, WorkerStatus};

/// Point-in-time snapshot of registry counts and supervisor flags. May lag
/// the live supervisor state by up to one loop iteration.
#[derive(Debug, Clone, Copy)]
pub struct ClusterStats {
    pub worker_count: usize,
    pub starting: usize,
    pub active: usize,
    pub stopping: usize,
    pub crashed: usize,
    pub respawning: usize,
    pub disabled: usize,
    pub shutdown_requested: bool,
    pub restart_requested: bool,
    pub restart_in_progress: bool,
    pub total_restarts: u64,
}

impl ClusterStats {
    pub fn from_registry(
        registry: &Registry,
        shutdown_requested: bool,
        restart_requested: bool,
        restart_in_progress: bool,
        total_restarts: u64,
    ) -> Self {
        Self {
            worker_count: registry.len(),
            starting: registry.count_by_status(WorkerStatus::Starting),
            active: registry.count_by_status(WorkerStatus::Active),
            stopping: registry.count_by_status(WorkerStatus::Stopping),
            crashed: registry.count_by_status(WorkerStatus::Crashed),
            respawning: registry.count_by_status(WorkerStatus::Respawning),
            disabled: registry.count_by_status(WorkerStatus::Disabled),
            shutdown_requested,
            restart_requested,
            restart_in_progress,
            total_restarts,
        }
    }

    /// `sum(status counts) == total_workers` should always hold.
    pub fn status_counts_sum_to_total(&self) -> bool {
        self.starting
            + self.active
            + self.stopping
            + self.crashed
            + self.respawning
            + self.disabled
            == self.worker_count
    }
}

/// Copy every live record out of the registry. Lock-free to the caller;
/// the supervisor blocks signals for the duration of the copy so a
/// SIGCHLD handler can't mutate `registry` mid-iteration (see
/// [`crate::platform::block_signals`]).
pub fn snapshot_all(registry: &Registry) -> Vec<WorkerSnapshot> {
    registry.iter().map(WorkerSnapshot::from).collect()
}

impl From<&crate::registry::WorkerRecord> for WorkerSnapshot {
    fn from(record: &crate::registry::WorkerRecord) -> Self {
        record.snapshot()
    }
}
