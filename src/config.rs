//! Frozen cluster configuration and its validating builder.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::platform::logical_cpus;
use crate::registry::{WorkerId, MAX_WORKERS};

/// Callback invoked (from the supervisor loop only, never from signal
/// context) after a worker reaches `ACTIVE`.
pub type OnStart = Arc<dyn Fn(WorkerId) + Send + Sync>;

/// Callback invoked (from the supervisor loop only) after a worker exits.
/// `is_crash` is `false` only for a normal exit observed while the slot
/// was `STOPPING` (i.e. an intentional shutdown/restart).
pub type OnExit = Arc<dyn Fn(WorkerId, i32, bool) + Send + Sync>;

/// Frozen configuration for a cluster, produced by [`ClusterConfigBuilder::build`].
#[derive(Clone)]
pub struct ClusterConfig {
    pub cpus: u8,
    pub port: u16,
    pub respawn: bool,
    pub shutdown_timeout_ms: u64,
    pub worker_startup_delay_ms: u64,
    pub worker_respawn_delay_ms: u64,
    pub respawn_window_sec: u64,
    pub respawn_max_crashes: u32,
    pub on_start: Option<OnStart>,
    pub on_exit: Option<OnExit>,
}

impl ClusterConfig {
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Number of worker slots this config will bring up: `cpus` already
    /// resolved from "0 means auto-detect" by the builder.
    pub fn worker_count(&self) -> usize {
        self.cpus as usize
    }
}

pub struct ClusterConfigBuilder {
    cpus: usize,
    port: u16,
    respawn: bool,
    shutdown_timeout_ms: u64,
    worker_startup_delay_ms: u64,
    worker_respawn_delay_ms: u64,
    respawn_window_sec: u64,
    respawn_max_crashes: u32,
    on_start: Option<OnStart>,
    on_exit: Option<OnExit>,
}

impl Default for ClusterConfigBuilder {
    fn default() -> Self {
        Self {
            cpus: 0,
            port: 0,
            respawn: true,
            shutdown_timeout_ms: 15_000,
            worker_startup_delay_ms: 100,
            worker_respawn_delay_ms: 100,
            respawn_window_sec: 5,
            respawn_max_crashes: 3,
            on_start: None,
            on_exit: None,
        }
    }
}

impl ClusterConfigBuilder {
    /// `0` means "auto-detect logical CPUs, capped at 254".
    pub fn cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn respawn(mut self, respawn: bool) -> Self {
        self.respawn = respawn;
        self
    }

    pub fn shutdown_timeout_ms(mut self, ms: u64) -> Self {
        self.shutdown_timeout_ms = ms;
        self
    }

    pub fn worker_startup_delay_ms(mut self, ms: u64) -> Self {
        self.worker_startup_delay_ms = ms;
        self
    }

    pub fn worker_respawn_delay_ms(mut self, ms: u64) -> Self {
        self.worker_respawn_delay_ms = ms;
        self
    }

    pub fn respawn_window_sec(mut self, secs: u64) -> Self {
        self.respawn_window_sec = secs;
        self
    }

    pub fn respawn_max_crashes(mut self, n: u32) -> Self {
        self.respawn_max_crashes = n;
        self
    }

    pub fn on_start<F: Fn(WorkerId) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_start = Some(Arc::new(f));
        self
    }

    pub fn on_exit<F: Fn(WorkerId, i32, bool) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.on_exit = Some(Arc::new(f));
        self
    }

    /// Validate and freeze. `cpus == 0` resolves to the auto-detected
    /// logical CPU count (itself clamped to `[1, 254]`); any other value
    /// outside `[1, 254]` is a `ConfigError`. `port == 0` is always a
    /// `ConfigError`.
    pub fn build(self) -> Result<ClusterConfig> {
        if self.port == 0 {
            return Err(Error::Config("port must be nonzero".into()));
        }
        if self.cpus > MAX_WORKERS {
            return Err(Error::Config(format!(
                "cpus must be in [0, {MAX_WORKERS}], got {}",
                self.cpus
            )));
        }
        if self.respawn_max_crashes == 0 {
            return Err(Error::Config("respawn_max_crashes must be >= 1".into()));
        }

        let cpus = if self.cpus == 0 {
            logical_cpus()
        } else {
            self.cpus as u8
        };

        Ok(ClusterConfig {
            cpus,
            port: self.port,
            respawn: self.respawn,
            shutdown_timeout_ms: self.shutdown_timeout_ms,
            worker_startup_delay_ms: self.worker_startup_delay_ms,
            worker_respawn_delay_ms: self.worker_respawn_delay_ms,
            respawn_window_sec: self.respawn_window_sec,
            respawn_max_crashes: self.respawn_max_crashes,
            on_start: self.on_start,
            on_exit: self.on_exit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_port() {
        let err = ClusterConfig::builder().port(0).cpus(2).build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_too_many_cpus() {
        let err = ClusterConfig::builder()
            .port(3000)
            .cpus(255)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_cpus_auto_detects() {
        let cfg = ClusterConfig::builder().port(3000).cpus(0).build().unwrap();
        assert!(cfg.cpus >= 1);
    }

    #[test]
    fn defaults_match_spec() {
        let cfg = ClusterConfig::builder().port(3000).cpus(2).build().unwrap();
        assert_eq!(cfg.shutdown_timeout_ms, 15_000);
        assert_eq!(cfg.worker_startup_delay_ms, 100);
        assert_eq!(cfg.worker_respawn_delay_ms, 100);
        assert_eq!(cfg.respawn_window_sec, 5);
        assert_eq!(cfg.respawn_max_crashes, 3);
        assert!(cfg.respawn);
    }

    #[test]
    fn rejects_zero_max_crashes() {
        let err = ClusterConfig::builder()
            .port(3000)
            .cpus(1)
            .respawn_max_crashes(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
