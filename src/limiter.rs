//! C3: sliding-window crash-rate limiter.
//!
//! Each worker slot owns a ring buffer of the last `respawn_max_crashes`
//! crash timestamps. A worker that crashes that many times within
//! `respawn_window_sec` is presumed to have a deterministic defect;
//! continued respawning would burn CPU and mask the error, so the slot is
//! disabled instead.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashDecision {
    Allow,
    Disable,
}

#[derive(Debug, Clone)]
pub struct CrashLimiter {
    capacity: usize,
    /// Ring buffer of recent crash timestamps; oldest-first once full.
    timestamps: Vec<Instant>,
    next_write: usize,
}

impl CrashLimiter {
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity.max(1) as usize;
        Self {
            capacity,
            timestamps: Vec::with_capacity(capacity),
            next_write: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Record a crash at `now` and decide whether respawn is still
    /// permitted. Overwrites the oldest timestamp once the ring is full.
    pub fn record_crash(&mut self, now: Instant, window: Duration) -> CrashDecision {
        if self.timestamps.len() < self.capacity {
            self.timestamps.push(now);
        } else {
            self.timestamps[self.next_write] = now;
            self.next_write = (self.next_write + 1) % self.capacity;
        }

        if self.timestamps.len() == self.capacity {
            let oldest = self.oldest().expect("ring is full, oldest must exist");
            let newest = now;
            if newest.saturating_duration_since(oldest) <= window {
                return CrashDecision::Disable;
            }
        }
        CrashDecision::Allow
    }

    /// Oldest timestamp currently held, accounting for ring wraparound.
    fn oldest(&self) -> Option<Instant> {
        if self.timestamps.len() < self.capacity {
            self.timestamps.first().copied()
        } else {
            self.timestamps.get(self.next_write).copied()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_crashes_spread_out_over_time() {
        let mut limiter = CrashLimiter::new(3);
        let t0 = Instant::now();
        let window = Duration::from_secs(5);

        assert_eq!(limiter.record_crash(t0, window), CrashDecision::Allow);
        assert_eq!(
            limiter.record_crash(t0 + Duration::from_secs(10), window),
            CrashDecision::Allow
        );
        assert_eq!(
            limiter.record_crash(t0 + Duration::from_secs(20), window),
            CrashDecision::Allow
        );
    }

    #[test]
    fn disables_after_max_crashes_within_window() {
        let mut limiter = CrashLimiter::new(3);
        let t0 = Instant::now();
        let window = Duration::from_secs(5);

        assert_eq!(limiter.record_crash(t0, window), CrashDecision::Allow);
        assert_eq!(
            limiter.record_crash(t0 + Duration::from_millis(500), window),
            CrashDecision::Allow
        );
        assert_eq!(
            limiter.record_crash(t0 + Duration::from_millis(900), window),
            CrashDecision::Disable
        );
    }

    #[test]
    fn ring_buffer_never_exceeds_capacity() {
        let mut limiter = CrashLimiter::new(3);
        let t0 = Instant::now();
        let window = Duration::from_secs(1);

        for i in 0..10u64 {
            limiter.record_crash(t0 + Duration::from_secs(i * 10), window);
            assert!(limiter.len() <= 3);
        }
    }

    #[test]
    fn ring_wraparound_keeps_comparing_against_true_oldest() {
        // Crashes 1-3 are spread out (no disable), then 4-6 land inside
        // the window with 4 having overwritten crash 1 in the ring.
        let mut limiter = CrashLimiter::new(3);
        let t0 = Instant::now();
        let window = Duration::from_secs(5);

        assert_eq!(limiter.record_crash(t0, window), CrashDecision::Allow);
        assert_eq!(
            limiter.record_crash(t0 + Duration::from_secs(100), window),
            CrashDecision::Allow
        );
        assert_eq!(
            limiter.record_crash(t0 + Duration::from_secs(200), window),
            CrashDecision::Allow
        );
        // Overwrites slot 0 (t0); ring is now [300, 100, 200] physically
        // but logically oldest is 100.
        assert_eq!(
            limiter.record_crash(t0 + Duration::from_secs(300), window),
            CrashDecision::Allow
        );
        assert_eq!(
            limiter.record_crash(t0 + Duration::from_millis(300_500), window),
            CrashDecision::Allow
        );
        // Now ring is [300, 300.5, 200] logically oldest=200; next crash at
        // 304 is within 5s of 300.5 but we must compare vs the true oldest
        // after this insertion (301 overwrites 200 -> oldest becomes 300).
        assert_eq!(
            limiter.record_crash(t0 + Duration::from_millis(301_000), window),
            CrashDecision::Disable
        );
    }
}
