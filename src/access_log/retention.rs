//! Age-based retention.
//!
//! Requests trigger the sweep opportunistically; `CleanupSchedule` makes sure
//! at most one request per interval actually schedules it.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::config::AccessLogConfig;

#[derive(Debug, Default)]
pub struct CleanupSchedule {
    last_run: AtomicI64,
}

impl CleanupSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for exactly one caller once `interval_secs` have passed since
    /// the previous claim. The first call always claims.
    pub fn try_claim(&self, now: i64, interval_secs: u64) -> bool {
        let last = self.last_run.load(Ordering::Acquire);
        if last != 0 && now - last < interval_secs as i64 {
            return false;
        }
        self.last_run
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn last_run(&self) -> i64 {
        self.last_run.load(Ordering::Acquire)
    }
}

/// Oldest timestamp still inside the retention window.
pub fn retention_cutoff(now: i64, config: &AccessLogConfig) -> i64 {
    now - config.retention_secs()
}
