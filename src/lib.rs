//! A multi-process supervisor for a single-threaded network server.
//!
//! `init` forks `cpus` worker processes that each bind and serve the same
//! listening port, watches over them, respawns crashed workers subject to
//! a crash-rate limit, and drives a zero-downtime rolling restart on
//! `SIGUSR2` plus an orderly `SIGTERM`/`SIGINT` shutdown with a
//! `SIGKILL` escalation.
//!
//! ```no_run
//! use clustermaster::{ClusterConfig, IsMaster};
//!
//! let config = ClusterConfig::builder().port(3000).build()?;
//! match clustermaster::init(config)? {
//!     IsMaster::Master => clustermaster::wait_workers()?,
//!     IsMaster::Worker => {
//!         // bind clustermaster::get_port() and serve.
//!     }
//! }
//! # Ok::<(), clustermaster::Error>(())
//! ```

mod cluster;
mod config;
mod error;
mod limiter;
mod logging;
mod platform;
mod registry;
mod signals;
mod stats;
mod supervisor;
mod worker;

pub use cluster::{
    get_all_workers, get_port, get_stats, get_worker_stats, graceful_restart, init, is_master,
    is_worker, signal_workers, wait_workers, worker_count, worker_id, cpus, cpus_physical,
    IsMaster,
};
pub use config::{ClusterConfig, ClusterConfigBuilder, OnExit, OnStart};
pub use error::{Error, Result};
pub use logging::init_default_subscriber;
pub use registry::{WorkerId, WorkerStatus, MAX_WORKERS};
pub use stats::ClusterStats;
pub use registry::WorkerSnapshot;
pub use signals::RESTART_SIGNAL;
