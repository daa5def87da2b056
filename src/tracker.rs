//! Per-process CPU usage from counter deltas.
//!
//! The tracker remembers the counters of every pid it has seen and turns the
//! difference between two consecutive observations into a percentage of the
//! total system capacity consumed by that pid. A pid produces no reading on
//! its first observation; it needs two data points.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use rayon::prelude::*;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::counter::CounterSource;

/// Counters observed for one pid at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterSample {
    pub system_total: f64,
    pub process_total: f64,
}

/// Last counters recorded for a tracked pid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessState {
    pub last_system_total: f64,
    pub last_process_total: f64,
}

impl From<CounterSample> for ProcessState {
    fn from(sample: CounterSample) -> Self {
        Self {
            last_system_total: sample.system_total,
            last_process_total: sample.process_total,
        }
    }
}

/// Converts counter deltas into a usage percentage.
///
/// The result is the share of the whole machine, not of one core: a process
/// saturating one of N cores reads roughly `100 / N`. A stalled or rewound
/// system counter yields exactly `0.0`, and the value is kept within
/// `[0, 100]`.
pub fn usage_percent(delta_proc: f64, delta_sys: f64) -> f64 {
    if delta_sys.is_nan() || delta_sys <= 0.0 {
        return 0.0;
    }
    let usage = delta_proc / delta_sys * 100.0;
    if usage.is_finite() {
        usage.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

pub struct UsageTracker {
    source: Arc<dyn CounterSource>,
    states: HashMap<u32, ProcessState>,
}

impl UsageTracker {
    pub fn new(source: Arc<dyn CounterSource>) -> Self {
        Self {
            source,
            states: HashMap::new(),
        }
    }

    /// Samples `pid` and returns its usage since the previous sample.
    ///
    /// Returns `None` on the first observation of `pid` and when the system
    /// counter itself is unreadable (no state is touched in that case).
    pub fn sample(&mut self, pid: u32) -> Option<f64> {
        let system_total = match self.source.system_total() {
            Ok(v) => v,
            Err(e) => {
                warn!("Skipping sample of pid {}: {}", pid, e);
                return None;
            }
        };
        let process_total = read_process_total(self.source.as_ref(), pid);
        self.observe(
            pid,
            CounterSample {
                system_total,
                process_total,
            },
        )
    }

    /// Samples every pid of a tick.
    ///
    /// The system counter is read once for the whole batch and per-process
    /// counters are read in parallel; state updates are applied afterwards
    /// one pid at a time. The result keeps the order of `pids`.
    pub fn sample_all(&mut self, pids: &[u32]) -> Vec<(u32, Option<f64>)> {
        let system_total = match self.source.system_total() {
            Ok(v) => v,
            Err(e) => {
                warn!("Skipping tick: {}", e);
                return pids.iter().map(|pid| (*pid, None)).collect();
            }
        };

        let source = self.source.as_ref();
        let samples: Vec<(u32, CounterSample)> = pids
            .par_iter()
            .map(|pid| {
                let sample = CounterSample {
                    system_total,
                    process_total: read_process_total(source, *pid),
                };
                (*pid, sample)
            })
            .collect();

        samples
            .into_iter()
            .map(|(pid, sample)| (pid, self.observe(pid, sample)))
            .collect()
    }

    /// Records `sample` for `pid` and returns the usage since the previous
    /// observation, or `None` if `pid` was not tracked yet.
    pub fn observe(&mut self, pid: u32, sample: CounterSample) -> Option<f64> {
        match self.states.entry(pid) {
            Entry::Vacant(slot) => {
                slot.insert(ProcessState::from(sample));
                None
            }
            Entry::Occupied(mut slot) => {
                let previous = slot.insert(ProcessState::from(sample));
                let delta_proc = sample.process_total - previous.last_process_total;
                let delta_sys = sample.system_total - previous.last_system_total;
                Some(usage_percent(delta_proc, delta_sys))
            }
        }
    }

    /// Forgets every pid not contained in `current`. Returns how many were
    /// dropped.
    pub fn evict(&mut self, current: &[u32]) -> usize {
        let live: HashSet<u32> = current.iter().copied().collect();
        let before = self.states.len();
        self.states.retain(|pid, _| live.contains(pid));
        let evicted = before - self.states.len();
        if evicted > 0 {
            debug!("Evicted {} exited processes", evicted);
        }
        evicted
    }

    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    pub fn is_tracked(&self, pid: u32) -> bool {
        self.states.contains_key(&pid)
    }

    pub fn state(&self, pid: u32) -> Option<ProcessState> {
        self.states.get(&pid).copied()
    }
}

/// Per-process counter, zero when the process cannot be read.
fn read_process_total(source: &dyn CounterSource, pid: u32) -> f64 {
    match source.process_total(pid) {
        Ok(v) => v,
        Err(e) => {
            debug!("Treating pid {} as idle: {}", pid, e);
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::CounterError;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Counter source whose values are set by the test.
    #[derive(Default)]
    struct ScriptedSource {
        system: Mutex<f64>,
        processes: Mutex<BTreeMap<u32, f64>>,
    }

    impl ScriptedSource {
        fn set(&self, system: f64, processes: &[(u32, f64)]) {
            *self.system.lock().unwrap() = system;
            *self.processes.lock().unwrap() = processes.iter().copied().collect();
        }
    }

    impl CounterSource for ScriptedSource {
        fn system_total(&self) -> Result<f64, CounterError> {
            Ok(*self.system.lock().unwrap())
        }

        fn process_total(&self, pid: u32) -> Result<f64, CounterError> {
            self.processes
                .lock()
                .unwrap()
                .get(&pid)
                .copied()
                .ok_or(CounterError::ProcessUnavailable {
                    pid,
                    reason: "gone".into(),
                })
        }
    }

    struct BrokenSystem;

    impl CounterSource for BrokenSystem {
        fn system_total(&self) -> Result<f64, CounterError> {
            Err(CounterError::SystemUnavailable("no /proc/stat".into()))
        }

        fn process_total(&self, _pid: u32) -> Result<f64, CounterError> {
            Ok(1.0)
        }
    }

    fn tracker() -> (Arc<ScriptedSource>, UsageTracker) {
        let source = Arc::new(ScriptedSource::default());
        let tracker = UsageTracker::new(source.clone());
        (source, tracker)
    }

    #[test]
    fn test_first_sample_is_absent() {
        let (source, mut tracker) = tracker();
        source.set(5000.0, &[(100, 4000.0)]);
        assert_eq!(tracker.sample(100), None);
        assert!(tracker.is_tracked(100));
        assert_eq!(
            tracker.state(100),
            Some(ProcessState {
                last_system_total: 5000.0,
                last_process_total: 4000.0,
            })
        );
    }

    #[test]
    fn test_delta_usage() {
        let (source, mut tracker) = tracker();
        source.set(1000.0, &[(100, 50.0)]);
        tracker.sample(100);
        source.set(1100.0, &[(100, 130.0)]);
        let usage = tracker.sample(100).unwrap();
        assert!((usage - 80.0).abs() < 1e-9);

        source.set(1500.0, &[(100, 140.0)]);
        let usage = tracker.sample(100).unwrap();
        assert!((usage - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_stalled_system_counter_reads_zero() {
        let (source, mut tracker) = tracker();
        source.set(1000.0, &[(7, 10.0)]);
        tracker.sample(7);
        source.set(1000.0, &[(7, 60.0)]);
        assert_eq!(tracker.sample(7), Some(0.0));

        // Rewound system counter
        source.set(900.0, &[(7, 70.0)]);
        assert_eq!(tracker.sample(7), Some(0.0));

        // State moved to the latest sample regardless
        assert_eq!(tracker.state(7).unwrap().last_system_total, 900.0);
    }

    #[test]
    fn test_vanished_process_reads_as_zero() {
        let (source, mut tracker) = tracker();
        source.set(1000.0, &[(7, 10.0)]);
        tracker.sample(7);
        source.set(1100.0, &[]);
        // Process total drops to 0: negative delta clamps to 0
        assert_eq!(tracker.sample(7), Some(0.0));
        assert_eq!(tracker.state(7).unwrap().last_process_total, 0.0);
    }

    #[test]
    fn test_eviction_restarts_series() {
        let (source, mut tracker) = tracker();
        source.set(1000.0, &[(1, 10.0), (2, 10.0)]);
        tracker.sample_all(&[1, 2]);
        assert_eq!(tracker.tracked(), 2);

        assert_eq!(tracker.evict(&[2]), 1);
        assert!(!tracker.is_tracked(1));
        assert!(tracker.is_tracked(2));

        // pid 1 reused with a smaller counter: fresh series
        source.set(1100.0, &[(1, 2.0), (2, 60.0)]);
        assert_eq!(tracker.sample(1), None);
        assert!((tracker.sample(2).unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_all_preserves_order() {
        let (source, mut tracker) = tracker();
        source.set(0.0, &[(3, 0.0), (1, 0.0), (2, 0.0)]);
        let first = tracker.sample_all(&[3, 1, 2]);
        assert_eq!(first, vec![(3, None), (1, None), (2, None)]);

        source.set(200.0, &[(3, 20.0), (1, 100.0), (2, 0.0)]);
        let second = tracker.sample_all(&[3, 1, 2]);
        assert_eq!(second, vec![(3, Some(10.0)), (1, Some(50.0)), (2, Some(0.0))]);
    }

    #[test]
    fn test_unreadable_system_counter_touches_nothing() {
        let mut tracker = UsageTracker::new(Arc::new(BrokenSystem));
        assert_eq!(tracker.sample(1), None);
        assert_eq!(tracker.sample_all(&[1, 2]), vec![(1, None), (2, None)]);
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn test_usage_percent_bounds() {
        assert_eq!(usage_percent(50.0, 0.0), 0.0);
        assert_eq!(usage_percent(50.0, -10.0), 0.0);
        assert_eq!(usage_percent(50.0, f64::NAN), 0.0);
        assert_eq!(usage_percent(-5.0, 100.0), 0.0);
        assert_eq!(usage_percent(150.0, 100.0), 100.0);
        assert_eq!(usage_percent(f64::INFINITY, 100.0), 0.0);
        assert!((usage_percent(1.0, 3.0) - 100.0 / 3.0).abs() < 1e-9);
    }
}
