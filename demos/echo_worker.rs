//! Minimal end-to-end demonstration of the intended call shape: bring up
//! a small cluster, let each worker print its assigned identity and port,
//! and let the master wait on them. There is no real listener here — a
//! worker in this demo just announces itself and idles — but every call
//! a real integration makes (`init`, `wait_workers`, `graceful_restart`,
//! `get_stats`) is exercised the same way a caller binding an actual
//! socket would use them.

use std::time::Duration;

use clustermaster::{ClusterConfig, IsMaster};

fn main() -> clustermaster::Result<()> {
    clustermaster::init_default_subscriber();

    let config = ClusterConfig::builder()
        .port(3000)
        .cpus(2)
        .on_start(|id| tracing::info!(worker_id = id, "worker reported active"))
        .on_exit(|id, status, is_crash| {
            tracing::info!(worker_id = id, status, is_crash, "worker reported exit")
        })
        .build()?;

    match clustermaster::init(config)? {
        IsMaster::Master => {
            tracing::info!(
                worker_count = clustermaster::worker_count(),
                "master bringing up cluster"
            );
            clustermaster::wait_workers()?;
            tracing::info!("cluster wound down, exiting");
            Ok(())
        }
        IsMaster::Worker => {
            tracing::info!(
                worker_id = clustermaster::worker_id(),
                port = clustermaster::get_port(),
                "worker up, idling in place of a real listener"
            );
            loop {
                std::thread::sleep(Duration::from_secs(60));
            }
        }
    }
}
