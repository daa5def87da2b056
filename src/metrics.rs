//! Prometheus metrics definitions for the guard loop.

use prometheus::{Gauge, GaugeVec, IntCounter, IntGauge, Opts, Registry};

/// Collection of Prometheus metrics updated once per tick.
#[derive(Clone)]
pub struct GuardMetrics {
    pub scanned_processes: IntGauge,
    pub tracked_processes: IntGauge,
    pub tick_duration: Gauge,
    pub ticks_total: IntCounter,
    pub throttle_actions: IntCounter,
    pub enforcement_failures: IntCounter,
    /// Readings above the display threshold, labelled by pid
    pub process_cpu_percent: GaugeVec,
}

impl GuardMetrics {
    /// Creates and registers all Prometheus metrics with the registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let scanned_processes = IntGauge::new(
            "responsiveness_guard_scanned_processes",
            "Number of processes enumerated in the last tick",
        )?;
        let tracked_processes = IntGauge::new(
            "responsiveness_guard_tracked_processes",
            "Number of processes with usage history after the last tick",
        )?;
        let tick_duration = Gauge::new(
            "responsiveness_guard_tick_duration_seconds",
            "Time spent in the last tick (sampling, policy and enforcement)",
        )?;
        let ticks_total = IntCounter::new(
            "responsiveness_guard_ticks_total",
            "Number of completed ticks",
        )?;
        let throttle_actions = IntCounter::new(
            "responsiveness_guard_throttle_actions_total",
            "Number of throttle actions issued",
        )?;
        let enforcement_failures = IntCounter::new(
            "responsiveness_guard_enforcement_failures_total",
            "Number of throttle actions the enforcer failed to carry out",
        )?;
        let process_cpu_percent = GaugeVec::new(
            Opts::new(
                "responsiveness_guard_process_cpu_percent",
                "CPU usage of the whole machine per process in percent (last tick)",
            ),
            &["pid"],
        )?;

        registry.register(Box::new(scanned_processes.clone()))?;
        registry.register(Box::new(tracked_processes.clone()))?;
        registry.register(Box::new(tick_duration.clone()))?;
        registry.register(Box::new(ticks_total.clone()))?;
        registry.register(Box::new(throttle_actions.clone()))?;
        registry.register(Box::new(enforcement_failures.clone()))?;
        registry.register(Box::new(process_cpu_percent.clone()))?;

        Ok(Self {
            scanned_processes,
            tracked_processes,
            tick_duration,
            ticks_total,
            throttle_actions,
            enforcement_failures,
            process_cpu_percent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_metrics_register_and_encode() {
        let registry = Registry::new();
        let metrics = GuardMetrics::new(&registry).unwrap();
        metrics.throttle_actions.inc();
        metrics
            .process_cpu_percent
            .with_label_values(&["4242"])
            .set(81.5);

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("responsiveness_guard_throttle_actions_total 1"));
        assert!(text.contains("responsiveness_guard_process_cpu_percent{pid=\"4242\"} 81.5"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        GuardMetrics::new(&registry).unwrap();
        assert!(GuardMetrics::new(&registry).is_err());
    }
}
