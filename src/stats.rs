//! Running statistics about the guard loop, rendered as a plain-text table
//! for `/health` and the shutdown summary.

use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Clone, Copy, Default)]
struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Snapshot of one running statistic.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatSnapshot {
    pub current: f64,
    pub average: f64,
    pub max: f64,
    pub min: f64,
    pub count: u64,
}

#[derive(Default)]
struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    fn snapshot(&self) -> StatSnapshot {
        if let Ok(s) = self.inner.lock() {
            StatSnapshot {
                current: s.last,
                average: s.avg(),
                max: s.max,
                min: s.min,
                count: s.count,
            }
        } else {
            StatSnapshot::default()
        }
    }
}

#[derive(Default)]
pub struct GuardStats {
    scanned_processes: Stat,
    tracked_processes: Stat,
    tick_duration_seconds: Stat,
    total_ticks: AtomicU64,
    throttle_actions: AtomicU64,
    enforcement_failures: AtomicU64,
}

impl GuardStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_tick(&self, scanned: usize, tracked: usize, duration_seconds: f64) {
        self.scanned_processes.add_sample(scanned as f64);
        self.tracked_processes.add_sample(tracked as f64);
        self.tick_duration_seconds.add_sample(duration_seconds);
        self.total_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttle(&self, failed: bool) {
        self.throttle_actions.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.enforcement_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total_ticks(&self) -> u64 {
        self.total_ticks.load(Ordering::Relaxed)
    }

    pub fn throttle_actions(&self) -> u64 {
        self.throttle_actions.load(Ordering::Relaxed)
    }

    pub fn enforcement_failures(&self) -> u64 {
        self.enforcement_failures.load(Ordering::Relaxed)
    }

    pub fn scanned_processes(&self) -> StatSnapshot {
        self.scanned_processes.snapshot()
    }

    pub fn tick_duration(&self) -> StatSnapshot {
        self.tick_duration_seconds.snapshot()
    }

    pub fn render_table(&self) -> String {
        let rows = [
            ("scanned processes", self.scanned_processes.snapshot(), 0usize),
            ("tracked processes", self.tracked_processes.snapshot(), 0),
            ("tick duration (s)", self.tick_duration_seconds.snapshot(), 3),
        ];

        let left_col = 26usize;
        let col_w = 12usize;

        let mut out = String::new();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "metric",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(out, "{}", "-".repeat(left_col + 3 + (col_w + 3) * 4)).ok();

        for (name, snap, precision) in rows {
            writeln!(
                out,
                "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
                name,
                format!("{:.p$}", snap.current, p = precision),
                format!("{:.p$}", snap.average, p = precision.max(1)),
                format!("{:.p$}", snap.max, p = precision),
                format!("{:.p$}", snap.min, p = precision),
                left = left_col,
                col = col_w
            )
            .ok();
        }

        writeln!(out).ok();
        writeln!(out, "number of done ticks: {}", self.total_ticks()).ok();
        writeln!(out, "throttle actions: {}", self.throttle_actions()).ok();
        writeln!(out, "enforcement failures: {}", self.enforcement_failures()).ok();

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stat() {
        let stats = GuardStats::new();
        stats.record_tick(10, 8, 0.5);
        stats.record_tick(30, 12, 0.1);
        stats.record_tick(20, 10, 0.3);

        let scanned = stats.scanned_processes();
        assert_eq!(scanned.current, 20.0);
        assert_eq!(scanned.max, 30.0);
        assert_eq!(scanned.min, 10.0);
        assert_eq!(scanned.count, 3);
        assert!((scanned.average - 20.0).abs() < 1e-9);
        assert_eq!(stats.total_ticks(), 3);
    }

    #[test]
    fn test_throttle_counters() {
        let stats = GuardStats::new();
        stats.record_throttle(false);
        stats.record_throttle(true);
        assert_eq!(stats.throttle_actions(), 2);
        assert_eq!(stats.enforcement_failures(), 1);
    }

    #[test]
    fn test_render_table() {
        let stats = GuardStats::new();
        stats.record_tick(5, 4, 0.012);
        let table = stats.render_table();
        assert!(table.contains("scanned processes"));
        assert!(table.contains("0.012"));
        assert!(table.contains("number of done ticks: 1"));
        assert!(table.contains("enforcement failures: 0"));
    }
}
