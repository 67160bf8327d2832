//! Lock-free statistics using atomic operations
//!
//! Every bot task carries one of these; the panel reads snapshots while the
//! task thread updates counters without contention.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-task statistics
#[derive(Debug, Default)]
pub struct TaskStats {
    /// Page refreshes / poll cycles
    pub refreshes: AtomicU64,
    /// Verified successful clicks
    pub clicks: AtomicU64,
    /// Errors caught and retried
    pub errors: AtomicU64,
    /// Purchase-funnel attempts (category/checkout passes)
    pub funnel_attempts: AtomicU64,
    pub start_time: AtomicU64,
}

impl TaskStats {
    /// Create new stats anchored at now
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            refreshes: AtomicU64::new(0),
            clicks: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            funnel_attempts: AtomicU64::new(0),
            start_time: AtomicU64::new(now),
        }
    }

    /// Record a poll cycle / refresh
    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a verified click
    pub fn record_click(&self) {
        self.clicks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a caught error
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a purchase-funnel attempt
    pub fn record_funnel_attempt(&self) {
        self.funnel_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub fn click_count(&self) -> u64 {
        self.clicks.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Refreshes per minute since start
    pub fn refreshes_per_minute(&self) -> f64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let start = self.start_time.load(Ordering::Relaxed);
        let elapsed_minutes = now.saturating_sub(start) as f64 / 60.0;

        if elapsed_minutes < 0.001 {
            return 0.0;
        }

        self.refreshes.load(Ordering::Relaxed) as f64 / elapsed_minutes
    }

    /// Get snapshot for serialization
    pub fn snapshot(&self) -> TaskStatsSnapshot {
        TaskStatsSnapshot {
            refreshes: self.refreshes.load(Ordering::Relaxed),
            clicks: self.clicks.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            funnel_attempts: self.funnel_attempts.load(Ordering::Relaxed),
            refreshes_per_minute: self.refreshes_per_minute(),
        }
    }
}

/// Serializable snapshot of task stats
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatsSnapshot {
    pub refreshes: u64,
    pub clicks: u64,
    pub errors: u64,
    pub funnel_attempts: u64,
    pub refreshes_per_minute: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = TaskStats::new();
        stats.record_refresh();
        stats.record_refresh();
        stats.record_click();
        stats.record_error();
        stats.record_funnel_attempt();

        let snap = stats.snapshot();
        assert_eq!(snap.refreshes, 2);
        assert_eq!(snap.clicks, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.funnel_attempts, 1);
    }

    #[test]
    fn fresh_stats_report_zero_rate() {
        let stats = TaskStats::new();
        assert_eq!(stats.snapshot().refreshes_per_minute, 0.0);
    }
}
