//! The sampling and decision loop.
//!
//! Each tick enumerates the process table, samples every pid, evaluates the
//! policy, hands violations to the enforcer and finally evicts state of
//! processes that are gone. Ticks never overlap; between ticks the loop
//! sleeps for the configured interval, and the sleep is abandoned as soon as
//! the shutdown future completes.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigError, DEFAULT_DISPLAY_THRESHOLD_PERCENT};
use crate::counter::build_sources;
use crate::enforcer::EnforcementSink;
use crate::metrics::GuardMetrics;
use crate::policy::{Action, PolicyEngine};
use crate::process::ProcessEnumerator;
use crate::stats::GuardStats;
use crate::tracker::UsageTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Running,
    Stopped,
}

/// Outcome of a single tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Pids enumerated this tick
    pub scanned: usize,
    /// Pids that produced a reading, with the reading
    pub readings: Vec<(u32, f64)>,
    pub throttled: Vec<u32>,
    pub enforcement_failures: usize,
    pub evicted: usize,
}

impl TickReport {
    pub fn usage_of(&self, pid: u32) -> Option<f64> {
        self.readings
            .iter()
            .find(|(p, _)| *p == pid)
            .map(|(_, usage)| *usage)
    }
}

pub struct GuardLoop {
    enumerator: ProcessEnumerator,
    tracker: UsageTracker,
    policy: PolicyEngine,
    sink: Arc<dyn EnforcementSink>,
    interval: Duration,
    display_threshold: f64,
    stats: Arc<GuardStats>,
    metrics: Option<GuardMetrics>,
    state: GuardState,
}

impl GuardLoop {
    pub fn new(
        enumerator: ProcessEnumerator,
        tracker: UsageTracker,
        policy: PolicyEngine,
        sink: Arc<dyn EnforcementSink>,
        interval: Duration,
    ) -> Self {
        Self {
            enumerator,
            tracker,
            policy,
            sink,
            interval,
            display_threshold: DEFAULT_DISPLAY_THRESHOLD_PERCENT,
            stats: Arc::new(GuardStats::new()),
            metrics: None,
            state: GuardState::Stopped,
        }
    }

    /// Wires sources, policy and interval from `config`.
    pub fn from_config(
        config: &Config,
        sink: Arc<dyn EnforcementSink>,
    ) -> Result<Self, ConfigError> {
        let sources = build_sources(config)?;
        debug!("Counter source: {:?}", sources.backend);

        let enumerator = ProcessEnumerator::new(sources.lister, config.ignore_pids())
            .with_max_processes(config.max_processes);
        let tracker = UsageTracker::new(sources.counters);
        let policy = PolicyEngine::new(config.threshold());

        Ok(Self::new(enumerator, tracker, policy, sink, config.interval())
            .with_display_threshold(config.display_threshold()))
    }

    pub fn with_display_threshold(mut self, threshold: f64) -> Self {
        self.display_threshold = threshold;
        self
    }

    pub fn with_stats(mut self, stats: Arc<GuardStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_metrics(mut self, metrics: GuardMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn tracker(&self) -> &UsageTracker {
        &self.tracker
    }

    pub fn stats(&self) -> Arc<GuardStats> {
        self.stats.clone()
    }

    /// Prepares the enforcer and enters `Running`. A failing setup is
    /// logged; the loop still runs.
    pub async fn setup(&mut self) {
        if let Err(e) = self.sink.setup().await {
            error!("Enforcer setup failed, continuing without it: {}", e);
        }
        self.state = GuardState::Running;
    }

    /// Runs one sampling and decision pass.
    pub async fn tick(&mut self) -> TickReport {
        let start = Instant::now();
        let pids = self.enumerator.enumerate();
        if pids.is_empty() {
            debug!("Process table empty or unavailable, nothing to sample");
        }

        let mut report = TickReport {
            scanned: pids.len(),
            ..TickReport::default()
        };

        if let Some(metrics) = &self.metrics {
            metrics.process_cpu_percent.reset();
        }

        for (pid, usage) in self.tracker.sample_all(&pids) {
            let action = self.policy.evaluate(pid, usage);
            let usage = match usage {
                Some(v) => v,
                None => continue,
            };
            report.readings.push((pid, usage));

            if usage > self.display_threshold {
                info!("PID {:5}: {:5.1}% CPU -> {}", pid, usage, action);
                if let Some(metrics) = &self.metrics {
                    let pid_label = pid.to_string();
                    metrics
                        .process_cpu_percent
                        .with_label_values(&[pid_label.as_str()])
                        .set(usage);
                }
            }

            if action == Action::Throttle {
                warn!("!!! VIOLATION DETECTED: PID {} using {:.1}% CPU !!!", pid, usage);
                let failed = match self.sink.apply(pid, action).await {
                    Ok(()) => false,
                    Err(e) => {
                        error!("Error limiting PID {}: {}", pid, e);
                        report.enforcement_failures += 1;
                        true
                    }
                };
                report.throttled.push(pid);
                self.stats.record_throttle(failed);
                if let Some(metrics) = &self.metrics {
                    metrics.throttle_actions.inc();
                    if failed {
                        metrics.enforcement_failures.inc();
                    }
                }
            }
        }

        report.evicted = self.tracker.evict(&pids);

        let elapsed = start.elapsed().as_secs_f64();
        let tracked = self.tracker.tracked();
        self.stats.record_tick(report.scanned, tracked, elapsed);
        if let Some(metrics) = &self.metrics {
            metrics.scanned_processes.set(report.scanned as i64);
            metrics.tracked_processes.set(tracked as i64);
            metrics.tick_duration.set(elapsed);
            metrics.ticks_total.inc();
        }

        debug!(
            "Tick done: {} scanned, {} readings, {} throttled, {} evicted in {:.3}s",
            report.scanned,
            report.readings.len(),
            report.throttled.len(),
            report.evicted,
            elapsed
        );
        report
    }

    /// Runs setup, then ticks until `shutdown` completes. Returns the number
    /// of completed ticks.
    pub async fn run<F>(&mut self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        self.setup().await;
        info!(
            "Guard running: interval {:.1}s, threshold {:.1}%",
            self.interval.as_secs_f64(),
            self.policy.threshold()
        );

        let mut ticks = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = self.tick() => ticks += 1,
            }
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.state = GuardState::Stopped;
        info!("Stopping responsiveness guard after {} ticks", ticks);
        ticks
    }
}
