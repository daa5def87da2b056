//! End-to-end guard scenarios against scripted counters and a fake /proc tree.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use responsiveness_guard::config::Config;
use responsiveness_guard::counter::{CounterError, CounterSource};
use responsiveness_guard::process::ProcessLister;
use responsiveness_guard::{
    usage_percent, Action, DryRunEnforcer, EnforceError, EnforcementSink, GuardLoop, GuardState,
    PolicyEngine, ProcessEnumerator, UsageTracker,
};

/// Counters and process table that tests mutate between ticks.
#[derive(Default)]
struct Machine {
    system: Mutex<f64>,
    processes: Mutex<BTreeMap<u32, f64>>,
}

impl Machine {
    fn set(&self, system: f64, processes: &[(u32, f64)]) {
        *self.system.lock().unwrap() = system;
        *self.processes.lock().unwrap() = processes.iter().copied().collect();
    }
}

impl ProcessLister for Machine {
    fn list_pids(&self) -> Vec<u32> {
        self.processes.lock().unwrap().keys().copied().collect()
    }
}

impl CounterSource for Machine {
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
                reason: "exited".into(),
            })
    }
}

fn guard_on(machine: &Arc<Machine>, interval: Duration) -> (GuardLoop, Arc<DryRunEnforcer>) {
    let sink = Arc::new(DryRunEnforcer::default());
    let guard = GuardLoop::new(
        ProcessEnumerator::new(machine.clone(), []),
        UsageTracker::new(machine.clone()),
        PolicyEngine::new(70.0),
        sink.clone(),
        interval,
    );
    (guard, sink)
}

fn limited_pids(sink: &DryRunEnforcer) -> Vec<u32> {
    sink.calls().into_iter().filter_map(|c| c.pid).collect()
}

#[tokio::test]
async fn hog_is_throttled_on_second_sample_and_forgotten_after_exit() {
    let machine = Arc::new(Machine::default());
    let (mut guard, sink) = guard_on(&machine, Duration::from_millis(10));

    machine.set(1000.0, &[(100, 0.0)]);
    let first = guard.tick().await;
    assert!(first.readings.is_empty());
    assert!(first.throttled.is_empty());

    machine.set(1100.0, &[(100, 80.0)]);
    let second = guard.tick().await;
    assert_eq!(second.usage_of(100), Some(80.0));
    assert_eq!(second.throttled, vec![100]);

    machine.set(1200.0, &[]);
    let third = guard.tick().await;
    assert_eq!(third.scanned, 0);
    assert_eq!(third.evicted, 1);
    assert!(!guard.tracker().is_tracked(100));

    assert_eq!(limited_pids(&sink), vec![100]);
}

#[tokio::test]
async fn usage_at_threshold_is_not_throttled() {
    let machine = Arc::new(Machine::default());
    let (mut guard, sink) = guard_on(&machine, Duration::from_millis(10));

    machine.set(0.0, &[(7, 0.0)]);
    guard.tick().await;
    machine.set(100.0, &[(7, 70.0)]);
    let report = guard.tick().await;

    assert_eq!(report.usage_of(7), Some(70.0));
    assert!(report.throttled.is_empty());
    assert!(limited_pids(&sink).is_empty());
}

#[tokio::test]
async fn stalled_system_counter_reads_as_idle() {
    let machine = Arc::new(Machine::default());
    let (mut guard, sink) = guard_on(&machine, Duration::from_millis(10));

    machine.set(500.0, &[(9, 10.0)]);
    guard.tick().await;
    machine.set(500.0, &[(9, 90.0)]);
    let report = guard.tick().await;

    assert_eq!(report.usage_of(9), Some(0.0));
    assert!(limited_pids(&sink).is_empty());
}

#[tokio::test]
async fn reused_pid_starts_with_fresh_baseline() {
    let machine = Arc::new(Machine::default());
    let (mut guard, sink) = guard_on(&machine, Duration::from_millis(10));

    machine.set(1000.0, &[(55, 500.0)]);
    guard.tick().await;
    machine.set(1100.0, &[]);
    guard.tick().await;

    // A new process under the same pid with a small counter
    machine.set(1200.0, &[(55, 3.0)]);
    let report = guard.tick().await;
    assert!(report.readings.is_empty());
    assert!(guard.tracker().is_tracked(55));
    assert!(limited_pids(&sink).is_empty());
}

#[tokio::test]
async fn empty_process_table_is_a_quiet_tick() {
    let machine = Arc::new(Machine::default());
    let (mut guard, sink) = guard_on(&machine, Duration::from_millis(10));

    machine.set(100.0, &[]);
    let report = guard.tick().await;
    assert_eq!(report.scanned, 0);
    assert_eq!(report.evicted, 0);
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn run_stops_promptly_during_a_long_sleep() {
    let machine = Arc::new(Machine::default());
    machine.set(100.0, &[(1, 0.0)]);
    let (mut guard, _sink) = guard_on(&machine, Duration::from_secs(3600));

    let ticks = tokio::time::timeout(
        Duration::from_secs(5),
        guard.run(tokio::time::sleep(Duration::from_millis(50))),
    )
    .await
    .expect("guard did not stop within the timeout");

    assert_eq!(ticks, 1);
    assert_eq!(guard.state(), GuardState::Stopped);
}

/// Enforcer whose setup always fails and whose `limit` fails for one pid.
struct BrokenEnforcer {
    failing_pid: u32,
    applied: Mutex<Vec<u32>>,
}

#[async_trait]
impl EnforcementSink for BrokenEnforcer {
    async fn setup(&self) -> Result<(), EnforceError> {
        Err(EnforceError::NotFound("./cgroup_limiter.sh".into()))
    }

    async fn apply(&self, pid: u32, _action: Action) -> Result<(), EnforceError> {
        self.applied.lock().unwrap().push(pid);
        if pid == self.failing_pid {
            Err(EnforceError::NotFound("./cgroup_limiter.sh".into()))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn enforcement_failures_do_not_stop_the_loop() {
    let machine = Arc::new(Machine::default());
    let sink = Arc::new(BrokenEnforcer {
        failing_pid: 100,
        applied: Mutex::new(Vec::new()),
    });
    let mut guard = GuardLoop::new(
        ProcessEnumerator::new(machine.clone(), []),
        UsageTracker::new(machine.clone()),
        PolicyEngine::new(70.0),
        sink.clone(),
        Duration::from_millis(10),
    );

    guard.setup().await;
    assert_eq!(guard.state(), GuardState::Running);

    machine.set(1000.0, &[(100, 0.0), (200, 0.0)]);
    guard.tick().await;

    // Both hog; the first limit call fails, the second still runs
    machine.set(1100.0, &[(100, 80.0), (200, 75.0)]);
    let second = guard.tick().await;
    assert_eq!(second.throttled, vec![100, 200]);
    assert_eq!(second.enforcement_failures, 1);

    // Still hogging: throttled again on the next tick
    machine.set(1200.0, &[(100, 160.0), (200, 80.0)]);
    let third = guard.tick().await;
    assert_eq!(third.throttled, vec![100]);
    assert_eq!(third.enforcement_failures, 1);

    assert_eq!(*sink.applied.lock().unwrap(), vec![100, 200, 100]);
    let stats = guard.stats();
    assert_eq!(stats.throttle_actions(), 3);
    assert_eq!(stats.enforcement_failures(), 2);
    assert_eq!(stats.total_ticks(), 3);
}

#[tokio::test]
async fn failing_setup_still_runs_ticks() {
    let machine = Arc::new(Machine::default());
    machine.set(100.0, &[(1, 0.0)]);
    let sink = Arc::new(BrokenEnforcer {
        failing_pid: 0,
        applied: Mutex::new(Vec::new()),
    });
    let mut guard = GuardLoop::new(
        ProcessEnumerator::new(machine.clone(), []),
        UsageTracker::new(machine.clone()),
        PolicyEngine::new(70.0),
        sink,
        Duration::from_secs(3600),
    );

    let ticks = guard
        .run(tokio::time::sleep(Duration::from_millis(50)))
        .await;
    assert_eq!(ticks, 1);
    assert_eq!(guard.state(), GuardState::Stopped);
}

#[test]
fn policy_and_formula_agree() {
    let policy = PolicyEngine::new(70.0);
    assert_eq!(policy.evaluate(1, Some(usage_percent(80.0, 100.0))), Action::Throttle);
    assert_eq!(policy.evaluate(1, Some(usage_percent(80.0, 0.0))), Action::Ignore);
    assert_eq!(policy.evaluate(1, None), Action::Ignore);
}

fn write_system_stat(root: &Path, total: u64) {
    let content = format!(
        "cpu  {} 0 0 0 0 0 0 0 0 0\ncpu0 {} 0 0 0 0 0 0 0 0 0\n",
        total, total
    );
    fs::write(root.join("stat"), content).unwrap();
}

fn write_process_stat(root: &Path, pid: u32, name: &str, utime: u64, stime: u64) {
    let dir = root.join(pid.to_string());
    fs::create_dir_all(&dir).unwrap();
    let content = format!(
        "{pid} ({name}) R 1 {pid} {pid} 0 -1 4194304 120 0 0 0 {utime} {stime} \
         0 0 20 0 1 0 4242 0 0\n"
    );
    fs::write(dir.join("stat"), content).unwrap();
    fs::write(dir.join("comm"), format!("{name}\n")).unwrap();
}

#[tokio::test]
async fn procfs_tree_drives_the_guard_from_config() {
    let proc_root = tempfile::tempdir().unwrap();
    let root = proc_root.path();

    write_system_stat(root, 10_000);
    write_process_stat(root, 4242, "spinner", 100, 0);
    write_process_stat(root, 4343, "idle worker", 10, 0);
    fs::create_dir_all(root.join("self")).unwrap();

    let config = Config {
        proc_root: Some(root.to_path_buf()),
        counter_source: Some("procfs".into()),
        dry_run: Some(true),
        ..Config::default()
    };
    let sink = Arc::new(DryRunEnforcer::default());
    let mut guard = GuardLoop::from_config(&config, sink.clone()).unwrap();

    let first = guard.tick().await;
    assert_eq!(first.scanned, 2);
    assert!(first.readings.is_empty());

    // 200 system ticks pass; the spinner burns 150 of them
    write_system_stat(root, 10_200);
    write_process_stat(root, 4242, "spinner", 200, 50);
    write_process_stat(root, 4343, "idle worker", 12, 0);
    let second = guard.tick().await;

    assert_eq!(second.usage_of(4242), Some(75.0));
    assert_eq!(second.usage_of(4343), Some(1.0));
    assert_eq!(second.throttled, vec![4242]);

    fs::remove_dir_all(root.join("4242")).unwrap();
    write_system_stat(root, 10_400);
    let third = guard.tick().await;
    assert_eq!(third.scanned, 1);
    assert_eq!(third.evicted, 1);

    assert_eq!(limited_pids(&sink), vec![4242]);
}

#[tokio::test]
async fn overflowing_process_counters_read_as_idle() {
    let proc_root = tempfile::tempdir().unwrap();
    let root = proc_root.path();

    write_system_stat(root, 1_000);
    write_process_stat(root, 77, "corrupt", u64::MAX, 1);

    let config = Config {
        proc_root: Some(root.to_path_buf()),
        counter_source: Some("procfs".into()),
        ..Config::default()
    };
    let sink = Arc::new(DryRunEnforcer::default());
    let mut guard = GuardLoop::from_config(&config, sink.clone()).unwrap();

    guard.tick().await;
    write_system_stat(root, 1_100);
    let report = guard.tick().await;

    assert_eq!(report.usage_of(77), Some(0.0));
    assert!(limited_pids(&sink).is_empty());
}

#[test]
fn replay_backend_requires_a_trace_file() {
    let config = Config {
        counter_source: Some("replay".into()),
        replay_file: None,
        ..Config::default()
    };
    let sink = Arc::new(DryRunEnforcer::default());
    assert!(GuardLoop::from_config(&config, sink).is_err());
}
