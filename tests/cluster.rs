//! End-to-end exercise of a real multi-process cluster (scenarios 1 and 2
//! from the testable-properties list: clean shutdown, and crash +
//! respawn).
//!
//! This binary opts out of the default libtest harness (`harness = false`
//! in `Cargo.toml`) and writes its own `main`, because a process that
//! calls `clustermaster::init` can only do so once — the crate's
//! master/worker global state is a process-wide `OnceLock`. Each scenario
//! therefore runs in its own freshly spawned copy of this binary, picked
//! by an environment variable; within that copy, the master and every
//! worker incarnation (including respawns, which arrive via the crate's
//! own `execve` re-exec) all run the same `main` and branch on whatever
//! `clustermaster::init` tells them they are.

use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clustermaster::{ClusterConfig, IsMaster, WorkerId};

const SCENARIO_ENV: &str = "CLUSTERMASTER_TEST_SCENARIO";
const MARKER_ENV: &str = "CLUSTERMASTER_TEST_MARKER_DIR";

fn main() {
    match std::env::var(SCENARIO_ENV).ok().as_deref() {
        Some("clean_shutdown") => clean_shutdown_scenario(),
        Some("crash_and_respawn") => crash_and_respawn_scenario(),
        Some(other) => panic!("unknown scenario: {other}"),
        None => run_all_scenarios_as_subprocesses(),
    }
}

fn run_all_scenarios_as_subprocesses() {
    run_scenario("clean_shutdown", None);

    let marker_dir = tempfile::tempdir().expect("create marker tempdir");
    run_scenario("crash_and_respawn", Some(marker_dir.path()));

    println!("cluster integration scenarios: PASS");
}

fn run_scenario(name: &str, marker_dir: Option<&std::path::Path>) {
    let exe = std::env::current_exe().expect("current_exe");
    let mut cmd = Command::new(exe);
    cmd.env(SCENARIO_ENV, name);
    if let Some(dir) = marker_dir {
        cmd.env(MARKER_ENV, dir);
    }
    let status = cmd.status().expect("spawn scenario subprocess");
    assert!(status.success(), "scenario {name} failed: {status:?}");
}

/// Two workers come up, the master sends itself SIGTERM shortly after,
/// and every worker should be observed exiting gracefully (`is_crash ==
/// false`) once `wait_workers` returns.
fn clean_shutdown_scenario() {
    let exits: Arc<Mutex<Vec<(WorkerId, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let exits_cb = exits.clone();

    let config = ClusterConfig::builder()
        .port(3900)
        .cpus(2)
        .worker_startup_delay_ms(10)
        .shutdown_timeout_ms(3000)
        .on_exit(move |id, _status, is_crash| {
            exits_cb.lock().unwrap().push((id, is_crash));
        })
        .build()
        .expect("valid config");

    match clustermaster::init(config).expect("init") {
        IsMaster::Master => {
            let pid = std::process::id() as libc::pid_t;
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(300));
                unsafe {
                    libc::kill(pid, libc::SIGTERM);
                }
            });
            clustermaster::wait_workers().expect("wait_workers");

            let exits = exits.lock().unwrap();
            assert_eq!(exits.len(), 2, "expected both workers to exit exactly once");
            assert!(
                exits.iter().all(|(_, is_crash)| !is_crash),
                "every exit during a clean shutdown must be graceful: {exits:?}"
            );
        }
        IsMaster::Worker => idle_worker_body(),
    }
}

/// A single worker crashes on its first incarnation (simulated via a
/// marker file: absent -> exit non-zero once; present -> idle normally),
/// and the master should observe one crash exit followed by a successful
/// respawn before the master shuts the cluster down.
fn crash_and_respawn_scenario() {
    let marker_dir = std::env::var(MARKER_ENV).expect("marker dir set by dispatcher");
    let marker = std::path::Path::new(&marker_dir).join("crashed_once");

    let exits: Arc<Mutex<Vec<(WorkerId, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let exits_cb = exits.clone();

    let config = ClusterConfig::builder()
        .port(3901)
        .cpus(1)
        .worker_startup_delay_ms(10)
        .worker_respawn_delay_ms(20)
        .respawn_window_sec(30)
        .respawn_max_crashes(3)
        .shutdown_timeout_ms(3000)
        .on_exit(move |id, _status, is_crash| {
            exits_cb.lock().unwrap().push((id, is_crash));
        })
        .build()
        .expect("valid config");

    match clustermaster::init(config).expect("init") {
        IsMaster::Master => {
            let pid = std::process::id() as libc::pid_t;
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(600));
                unsafe {
                    libc::kill(pid, libc::SIGTERM);
                }
            });
            clustermaster::wait_workers().expect("wait_workers");

            let exits = exits.lock().unwrap();
            assert!(
                exits.len() >= 2,
                "expected at least a crash and a later graceful exit: {exits:?}"
            );
            assert!(
                exits[0].1,
                "the first exit should be the simulated crash: {exits:?}"
            );
            assert!(
                exits.iter().skip(1).any(|(_, is_crash)| !is_crash),
                "expected a later graceful exit after respawn: {exits:?}"
            );
        }
        IsMaster::Worker => {
            if marker.exists() {
                idle_worker_body();
            } else {
                let _ = std::fs::write(&marker, b"crashed");
                std::process::exit(7);
            }
        }
    }
}

fn idle_worker_body() -> ! {
    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}
