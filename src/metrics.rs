use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Counters for refresh, rebuild, recompile and cache activity.
///
/// Shared by every session of a database; all updates are relaxed atomics.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Refresh rules fired
    rules_fired: AtomicU64,
    /// Rows appended to backing stores by rules
    rows_appended: AtomicU64,
    /// Backing rows updated in place by rules
    rows_updated: AtomicU64,
    /// Rule executions that failed
    refresh_failures: AtomicU64,
    /// Full backing store rebuilds
    rebuilds: AtomicU64,
    /// Single-view recompiles, cascades included
    recompiles: AtomicU64,
    /// Time spent dispatching row changes (nanoseconds)
    dispatch_timing_ns: AtomicU64,
    plan_cache_hits: AtomicU64,
    plan_cache_misses: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_rule_fired(&self) {
        bump(&self.rules_fired, 1);
    }

    pub fn record_rows_appended(&self, rows: usize) {
        bump(&self.rows_appended, rows as u64);
    }

    pub fn record_rows_updated(&self, rows: usize) {
        bump(&self.rows_updated, rows as u64);
    }

    pub fn record_refresh_failure(&self) {
        bump(&self.refresh_failures, 1);
    }

    pub fn record_rebuild(&self) {
        bump(&self.rebuilds, 1);
    }

    pub fn record_recompile(&self) {
        bump(&self.recompiles, 1);
    }

    pub fn record_plan_cache_hit(&self) {
        bump(&self.plan_cache_hits, 1);
    }

    pub fn record_plan_cache_miss(&self) {
        bump(&self.plan_cache_misses, 1);
    }

    pub fn start_timer(&self) -> DispatchTimer {
        DispatchTimer { start: Instant::now() }
    }

    pub fn record_dispatch(&self, timer: DispatchTimer) {
        let elapsed = u64::try_from(timer.start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        bump(&self.dispatch_timing_ns, elapsed);
    }

    /// Current counters; staleness figures are summed over views by the caller
    pub fn snapshot(&self, staleness_hits: u64, staleness_misses: u64) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            rules_fired: load(&self.rules_fired),
            rows_appended: load(&self.rows_appended),
            rows_updated: load(&self.rows_updated),
            refresh_failures: load(&self.refresh_failures),
            rebuilds: load(&self.rebuilds),
            recompiles: load(&self.recompiles),
            dispatch_timing_ns: load(&self.dispatch_timing_ns),
            staleness_hits,
            staleness_misses,
            plan_cache_hits: load(&self.plan_cache_hits),
            plan_cache_misses: load(&self.plan_cache_misses),
        }
    }
}

/// Timer for one row-change dispatch
pub struct DispatchTimer {
    start: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub rules_fired: u64,
    pub rows_appended: u64,
    pub rows_updated: u64,
    pub refresh_failures: u64,
    pub rebuilds: u64,
    pub recompiles: u64,
    pub dispatch_timing_ns: u64,
    pub staleness_hits: u64,
    pub staleness_misses: u64,
    pub plan_cache_hits: u64,
    pub plan_cache_misses: u64,
}

fn rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

impl MetricsSnapshot {
    pub fn dispatch_timing_ms(&self) -> f64 {
        self.dispatch_timing_ns as f64 / 1_000_000.0
    }

    pub fn staleness_hit_rate(&self) -> f64 {
        rate(self.staleness_hits, self.staleness_misses)
    }

    pub fn plan_cache_hit_rate(&self) -> f64 {
        rate(self.plan_cache_hits, self.plan_cache_misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_rates() {
        let metrics = Metrics::new();
        metrics.record_rule_fired();
        metrics.record_rows_appended(3);
        metrics.record_plan_cache_hit();
        metrics.record_plan_cache_hit();
        metrics.record_plan_cache_hit();
        metrics.record_plan_cache_miss();

        let snapshot = metrics.snapshot(1, 1);
        assert_eq!(snapshot.rules_fired, 1);
        assert_eq!(snapshot.rows_appended, 3);
        assert!((snapshot.plan_cache_hit_rate() - 0.75).abs() < f64::EPSILON);
        assert!((snapshot.staleness_hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_rates_are_zero() {
        let snapshot = Metrics::new().snapshot(0, 0);
        assert_eq!(snapshot.plan_cache_hit_rate(), 0.0);
        assert_eq!(snapshot.staleness_hit_rate(), 0.0);
        assert_eq!(snapshot.dispatch_timing_ms(), 0.0);
    }

    #[test]
    fn test_dispatch_timing_accumulates() {
        let metrics = Metrics::new();
        let timer = metrics.start_timer();
        std::thread::sleep(std::time::Duration::from_millis(2));
        metrics.record_dispatch(timer);

        assert!(metrics.snapshot(0, 0).dispatch_timing_ms() >= 2.0);
    }
}
