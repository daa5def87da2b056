//! Threshold policy.

use std::fmt;

/// Decision for one process on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Throttle,
    Ignore,
}

impl Action {
    /// Verb passed to the enforcement command.
    pub fn verb(&self) -> &'static str {
        match self {
            Action::Throttle => "limit",
            Action::Ignore => "ignore",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Throttle => f.write_str("THROTTLE"),
            Action::Ignore => f.write_str("ignore"),
        }
    }
}

/// Compares usage readings against a fixed CPU budget.
///
/// Stateless: a process that stays above the budget is throttled again on
/// every tick.
#[derive(Debug, Clone, Copy)]
pub struct PolicyEngine {
    threshold: f64,
}

impl PolicyEngine {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// `Throttle` iff a reading exists and is strictly above the threshold.
    pub fn evaluate(&self, _pid: u32, usage: Option<f64>) -> Action {
        match usage {
            Some(usage) if usage > self.threshold => Action::Throttle,
            _ => Action::Ignore,
        }
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_THRESHOLD_PERCENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_strict() {
        let policy = PolicyEngine::new(70.0);
        assert_eq!(policy.evaluate(1, Some(70.0)), Action::Ignore);
        assert_eq!(policy.evaluate(1, Some(70.000001)), Action::Throttle);
        assert_eq!(policy.evaluate(1, Some(69.9)), Action::Ignore);
        assert_eq!(policy.evaluate(1, Some(100.0)), Action::Throttle);
    }

    #[test]
    fn test_absent_usage_is_ignored() {
        for threshold in [0.0, 50.0, 100.0] {
            let policy = PolicyEngine::new(threshold);
            assert_eq!(policy.evaluate(42, None), Action::Ignore);
        }
    }

    #[test]
    fn test_zero_threshold_throttles_any_load() {
        let policy = PolicyEngine::new(0.0);
        assert_eq!(policy.evaluate(1, Some(0.0)), Action::Ignore);
        assert_eq!(policy.evaluate(1, Some(0.1)), Action::Throttle);
    }

    #[test]
    fn test_default_threshold() {
        assert_eq!(PolicyEngine::default().threshold(), 70.0);
    }

    #[test]
    fn test_action_rendering() {
        assert_eq!(Action::Throttle.to_string(), "THROTTLE");
        assert_eq!(Action::Ignore.to_string(), "ignore");
        assert_eq!(Action::Throttle.verb(), "limit");
    }
}
