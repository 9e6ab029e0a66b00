//! C4 + C6: the lifecycle state machine and the master's supervisor loop.
//!
//! Everything here runs synchronously on the master's single thread; the
//! only inputs from outside this module are the atomic flags in
//! [`crate::signals`] and the exit statuses reaped through
//! [`crate::platform`]. Nothing here ever touches a `Mutex` for its own
//! sake — the global lock in `cluster.rs` exists only so the public
//! facade can reach this state from arbitrary call sites, not because the
//! loop itself needs synchronization.

use std::time::{Duration, Instant};

use crate::cluster::{MasterState, PendingCallback};
use crate::config::ClusterConfig;
use crate::limiter::CrashDecision;
use crate::platform;
use crate::registry::{WorkerId, WorkerRecord, WorkerStatus};
use crate::signals;

/// How often the loop wakes up to poll flags and deadlines when nothing
/// else is driving it. Not a correctness requirement, just a bound on
/// reaction latency; SIGCHLD/SIGTERM/SIGUSR2 delivery doesn't depend on it.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Run one pass of the supervisor loop. Returns `true` once every worker
/// slot is terminal and there is no pending shutdown/restart work left —
/// the signal for [`crate::wait_workers`] to return.
pub(crate) fn run_iteration(state: &mut MasterState) -> bool {
    drain_reaps(state);
    mark_starting_workers_active(state);
    handle_shutdown(state);
    handle_restart_request(state);
    execute_due_respawns(state);

    if state.registry.all_terminal() {
        return true;
    }

    platform::sleep(POLL_INTERVAL);
    false
}

/// C6 step: drain every terminated child SIGCHLD told us about (or that
/// slipped in between polls) and run each one through the exit
/// transition. Loops until a nonblocking reap reports nothing left.
fn drain_reaps(state: &mut MasterState) {
    signals::take_reap_pending();
    loop {
        match platform::reap_nonblocking() {
            Ok(platform::ReapOutcome::NoneReady) => break,
            Ok(platform::ReapOutcome::Exited {
                pid,
                exit_status,
                by_signal,
            }) => handle_worker_exit(state, pid, exit_status, by_signal),
            Err(err) => {
                tracing::error!(error = %err, "reap failed, stopping drain for this iteration");
                break;
            }
        }
    }
}

/// C4: a worker process exited. Classify it as a crash or an intentional
/// stop, run the crash-rate limiter if it was a crash, and either
/// schedule a respawn, disable the slot, or leave it terminal.
fn handle_worker_exit(
    state: &mut MasterState,
    pid: libc::pid_t,
    exit_status: i32,
    by_signal: Option<i32>,
) {
    let Some(id) = state.registry.find_by_pid(pid).map(|w| w.worker_id) else {
        return;
    };
    let Ok(record) = state.registry.lookup_mut(id) else {
        return;
    };

    let was_stopping = record.status == WorkerStatus::Stopping;
    record.status = WorkerStatus::Crashed;
    record.pid = None;
    record.exit_status = Some(exit_status);

    // A slot stopped intentionally (shutdown or rolling restart) counts
    // as a crash unless it exited cleanly or died to the very SIGTERM we
    // sent it; anything else — a different signal, or dying while not
    // STOPPING at all — is a crash regardless of exit code.
    let is_crash = if was_stopping {
        match by_signal {
            Some(libc::SIGTERM) => false,
            Some(_) => true,
            None => exit_status != 0,
        }
    } else {
        true
    };

    tracing::info!(worker_id = id, exit_status, is_crash, "worker exited");

    if let Some(cb) = state.config.on_exit.clone() {
        state.pending_callbacks.push(PendingCallback::OnExit {
            cb,
            id,
            exit_status,
            is_crash,
        });
    }

    if state.restart_active && state.restart_cursor == Some(id) {
        // This exit is the rolling restart's own doing: replace it right
        // away, independent of the crash-respawn policy.
        let now = Instant::now();
        if let Ok(record) = state.registry.lookup_mut(id) {
            record.status = WorkerStatus::Respawning;
            record.respawn_at = Some(now + Duration::from_millis(state.config.worker_respawn_delay_ms));
        }
        return;
    }

    if !is_crash || state.shutdown_sent {
        return;
    }

    let Ok(record) = state.registry.lookup_mut(id) else {
        return;
    };
    if record.respawn_disabled || !state.config.respawn {
        return;
    }

    record_crash_and_decide(record, &state.config, Instant::now());
}

/// C3 entry point shared by every crash-like event — a worker exiting
/// unexpectedly, a respawn's `fork()` failing, or the very first spawn of a
/// slot failing during initial bring-up (spec.md §4.4's "a worker whose
/// initial spawn fails transitions directly to CRASHED and enters the
/// crash-rate logic", and §7's "SpawnError ... feeds the crash-rate
/// limiter"). Always increments `crash_count` and runs the ring-buffer
/// decision; never bypasses it for a disable.
pub(crate) fn record_crash_and_decide(record: &mut WorkerRecord, config: &ClusterConfig, now: Instant) {
    record.crash_count += 1;
    let window = Duration::from_secs(config.respawn_window_sec);
    match record.limiter_mut().record_crash(now, window) {
        CrashDecision::Allow => {
            record.status = WorkerStatus::Respawning;
            record.respawn_at = Some(now + Duration::from_millis(config.worker_respawn_delay_ms));
        }
        CrashDecision::Disable => {
            record.respawn_at = None;
            record.respawn_disabled = true;
            record.status = WorkerStatus::Disabled;
            tracing::error!(
                worker_id = record.worker_id,
                crash_count = record.crash_count,
                "worker disabled after repeated crashes"
            );
        }
    }
}

/// C4: STARTING -> ACTIVE once `worker_startup_delay_ms` has elapsed since
/// spawn. Also the trigger point for advancing an in-progress rolling
/// restart past the slot that just came back up.
fn mark_starting_workers_active(state: &mut MasterState) {
    let delay = Duration::from_millis(state.config.worker_startup_delay_ms);
    let now = Instant::now();

    let mut newly_active = Vec::new();
    for record in state.registry.iter_mut() {
        if record.status == WorkerStatus::Starting {
            if let Some(start) = record.start_time {
                if now.saturating_duration_since(start) >= delay {
                    record.status = WorkerStatus::Active;
                    newly_active.push(record.worker_id);
                }
            }
        }
    }

    for id in newly_active {
        tracing::info!(worker_id = id, "worker active");
        if let Some(cb) = state.config.on_start.clone() {
            state.pending_callbacks.push(PendingCallback::OnStart { cb, id });
        }
        if state.restart_active && state.restart_cursor == Some(id) {
            advance_restart(state, id);
        }
    }
}

/// C6: SIGTERM/SIGINT handling — send SIGTERM to every live worker once,
/// then escalate to SIGKILL for anything still alive once the shutdown
/// deadline passes.
fn handle_shutdown(state: &mut MasterState) {
    if signals::take_shutdown_requested() && !state.shutdown_sent {
        tracing::info!("shutdown requested, sending SIGTERM to all live workers");
        state.shutdown_sent = true;
        state.shutdown_deadline =
            Some(Instant::now() + Duration::from_millis(state.config.shutdown_timeout_ms));

        // A shutdown in progress takes priority over a rolling restart:
        // abandon the cursor, the in-flight SIGTERM will be subsumed by
        // the one below.
        state.restart_active = false;
        state.restart_cursor = None;
        signals::clear_restart_requested();

        for record in state.registry.iter_mut() {
            if record.status == WorkerStatus::Respawning {
                // No process exists yet for this slot; there is nothing
                // to SIGTERM and nothing that will ever be reaped, so
                // cancel the pending respawn outright rather than
                // mislabeling it STOPPING.
                record.status = WorkerStatus::Crashed;
                record.respawn_at = None;
                continue;
            }
            if record.status.is_live() {
                if let Some(pid) = record.pid {
                    let _ = platform::send_signal(pid, libc::SIGTERM);
                }
                record.status = WorkerStatus::Stopping;
            }
            // A crash-respawn already scheduled but not yet executed is
            // moot once we're shutting down.
            record.respawn_at = None;
        }
    }

    if state.shutdown_sent {
        if let Some(deadline) = state.shutdown_deadline {
            if Instant::now() >= deadline {
                for record in state.registry.iter_mut() {
                    if record.status.is_live() {
                        if let Some(pid) = record.pid {
                            tracing::warn!(
                                worker_id = record.worker_id,
                                "shutdown timeout elapsed, sending SIGKILL"
                            );
                            let _ = platform::send_signal(pid, libc::SIGKILL);
                        }
                    }
                }
                // Already escalated; don't re-send SIGKILL every
                // subsequent iteration while we wait for the reap.
                state.shutdown_deadline = None;
            }
        }
    }
}

/// C6: SIGUSR2 handling — start a rolling restart cycle if one isn't
/// already running. Idempotent: a restart requested while one is active
/// just keeps the current cycle going rather than starting a second.
fn handle_restart_request(state: &mut MasterState) {
    if !signals::take_restart_requested() || state.restart_active || state.shutdown_sent {
        return;
    }
    start_restart(state);
}

fn start_restart(state: &mut MasterState) {
    match next_restart_target(state, 0) {
        Some(id) => {
            tracing::info!(worker_id = id, "starting rolling restart");
            state.restart_active = true;
            state.restart_cursor = Some(id);
            stop_for_restart(state, id);
        }
        None => {
            // Every slot disabled: nothing to restart.
            signals::clear_restart_requested();
        }
    }
}

fn advance_restart(state: &mut MasterState, just_activated: WorkerId) {
    match next_restart_target(state, just_activated) {
        Some(next) => {
            state.restart_cursor = Some(next);
            stop_for_restart(state, next);
        }
        None => {
            state.restart_active = false;
            state.restart_cursor = None;
            state.total_restarts += 1;
            signals::clear_restart_requested();
            tracing::info!(total_restarts = state.total_restarts, "rolling restart complete");
        }
    }
}

fn stop_for_restart(state: &mut MasterState, id: WorkerId) {
    if let Ok(record) = state.registry.lookup_mut(id) {
        if let Some(pid) = record.pid {
            let _ = platform::send_signal(pid, libc::SIGTERM);
        }
        record.status = WorkerStatus::Stopping;
    }
}

/// First live, non-disabled slot after `after` in id order, wrapping the
/// restart cursor forward but never back past the end.
fn next_restart_target(state: &MasterState, after: WorkerId) -> Option<WorkerId> {
    let n = state.registry.len() as WorkerId;
    let mut id = after + 1;
    while id <= n {
        if let Ok(record) = state.registry.lookup(id) {
            if record.status != WorkerStatus::Disabled {
                return Some(id);
            }
        }
        id += 1;
    }
    None
}

/// C6 step: spawn a replacement for every slot whose deferred respawn
/// deadline has passed. Shared by crash-respawn and rolling-restart
/// replacement, which both just set `respawn_at` and let this run them.
fn execute_due_respawns(state: &mut MasterState) {
    if state.shutdown_sent {
        return;
    }
    let now = Instant::now();
    let due: Vec<WorkerId> = state
        .registry
        .iter()
        .filter(|w| w.status == WorkerStatus::Respawning && w.respawn_at.map(|at| now >= at).unwrap_or(false))
        .map(|w| w.worker_id)
        .collect();

    for id in due {
        match crate::worker::spawn(id, &state.argv) {
            Ok(pid) => {
                if let Ok(record) = state.registry.lookup_mut(id) {
                    record.pid = Some(pid);
                    record.status = WorkerStatus::Starting;
                    record.start_time = Some(now);
                    record.respawn_at = None;
                }
                tracing::info!(worker_id = id, pid, "respawned worker");
            }
            Err(err) => {
                tracing::warn!(worker_id = id, error = %err, "respawn attempt failed");
                if let Ok(record) = state.registry.lookup_mut(id) {
                    record.respawn_at = None;
                    record.status = WorkerStatus::Crashed;
                    record_crash_and_decide(record, &state.config, now);
                }
            }
        }
    }
}
