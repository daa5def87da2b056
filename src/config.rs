//! Configuration for the guard.
//!
//! Every field is optional so a config file only needs the keys it changes;
//! the accessor methods fall back to the documented defaults. Precedence is
//! CLI flag > config file > default, the CLI part is applied by the binary.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::counter::CounterBackend;

// Default configuration constants
pub const DEFAULT_INTERVAL_SECS: f64 = 2.0;
/// Longest accepted sampling interval (one day).
pub const MAX_INTERVAL_SECS: f64 = 86_400.0;
pub const DEFAULT_THRESHOLD_PERCENT: f64 = 70.0;
pub const DEFAULT_DISPLAY_THRESHOLD_PERCENT: f64 = 10.0;
pub const DEFAULT_PROC_ROOT: &str = "/proc";
pub const DEFAULT_ENFORCER_PROGRAM: &str = "bash";
pub const DEFAULT_ENFORCER_SCRIPT: &str = "./cgroup_limiter.sh";
pub const DEFAULT_ENFORCER_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9216;

/// Locations probed when no config path is given.
pub const DEFAULT_CONFIG_LOCATIONS: &[&str] = &[
    "/etc/responsiveness-guard/config.yaml",
    "/etc/responsiveness-guard/config.yml",
    "/etc/responsiveness-guard/config.json",
    "/etc/responsiveness-guard/config.toml",
    "./responsiveness-guard.yaml",
    "./responsiveness-guard.yml",
    "./responsiveness-guard.json",
    "./responsiveness-guard.toml",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("{0}")]
    Invalid(String),
}

/// Guard configuration as read from file or built from defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    // Sampling
    #[serde(alias = "interval-secs")]
    pub interval_secs: Option<f64>,
    #[serde(alias = "threshold-percent")]
    pub threshold_percent: Option<f64>,
    /// Status lines are printed for readings above this value
    #[serde(alias = "display-threshold-percent")]
    pub display_threshold_percent: Option<f64>,
    #[serde(alias = "proc-root")]
    pub proc_root: Option<PathBuf>,
    /// "auto" | "procfs" | "clock" | "replay"
    #[serde(alias = "counter-source")]
    pub counter_source: Option<String>,
    #[serde(alias = "replay-file")]
    pub replay_file: Option<PathBuf>,
    #[serde(alias = "ignore-pids")]
    pub ignore_pids: Option<Vec<u32>>,
    #[serde(alias = "max-processes")]
    pub max_processes: Option<usize>,
    pub parallelism: Option<usize>,

    // Enforcement
    #[serde(alias = "dry-run")]
    pub dry_run: Option<bool>,
    #[serde(alias = "enforcer-program")]
    pub enforcer_program: Option<String>,
    #[serde(alias = "enforcer-script")]
    pub enforcer_script: Option<PathBuf>,
    #[serde(alias = "enforcer-timeout-secs")]
    pub enforcer_timeout_secs: Option<u64>,

    // Metrics server
    #[serde(alias = "enable-metrics")]
    pub enable_metrics: Option<bool>,
    pub bind: Option<String>,
    pub port: Option<u16>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_secs: Some(DEFAULT_INTERVAL_SECS),
            threshold_percent: Some(DEFAULT_THRESHOLD_PERCENT),
            display_threshold_percent: Some(DEFAULT_DISPLAY_THRESHOLD_PERCENT),
            proc_root: Some(PathBuf::from(DEFAULT_PROC_ROOT)),
            counter_source: Some("auto".into()),
            replay_file: None,
            ignore_pids: None,
            max_processes: None,
            parallelism: None,
            dry_run: Some(false),
            enforcer_program: Some(DEFAULT_ENFORCER_PROGRAM.into()),
            enforcer_script: Some(PathBuf::from(DEFAULT_ENFORCER_SCRIPT)),
            enforcer_timeout_secs: Some(DEFAULT_ENFORCER_TIMEOUT_SECS),
            enable_metrics: Some(false),
            bind: Some(DEFAULT_BIND_ADDR.into()),
            port: Some(DEFAULT_PORT),
            log_level: Some("info".into()),
        }
    }
}

impl Config {
    /// Sampling interval. Values that do not fit a `Duration` fall back to
    /// the default; `validate_effective_config` rejects them up front.
    pub fn interval(&self) -> Duration {
        self.interval_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_INTERVAL_SECS))
    }

    pub fn threshold(&self) -> f64 {
        self.threshold_percent.unwrap_or(DEFAULT_THRESHOLD_PERCENT)
    }

    pub fn display_threshold(&self) -> f64 {
        self.display_threshold_percent
            .unwrap_or(DEFAULT_DISPLAY_THRESHOLD_PERCENT)
    }

    pub fn proc_root(&self) -> PathBuf {
        self.proc_root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROC_ROOT))
    }

    pub fn counter_backend(&self) -> Result<CounterBackend, ConfigError> {
        self.counter_source.as_deref().unwrap_or("auto").parse()
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run.unwrap_or(false)
    }

    pub fn enforcer_program(&self) -> &str {
        self.enforcer_program
            .as_deref()
            .unwrap_or(DEFAULT_ENFORCER_PROGRAM)
    }

    pub fn enforcer_script(&self) -> PathBuf {
        self.enforcer_script
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ENFORCER_SCRIPT))
    }

    pub fn enforcer_timeout(&self) -> Duration {
        Duration::from_secs(
            self.enforcer_timeout_secs
                .unwrap_or(DEFAULT_ENFORCER_TIMEOUT_SECS),
        )
    }

    pub fn ignore_pids(&self) -> Vec<u32> {
        self.ignore_pids.clone().unwrap_or_default()
    }

    pub fn enable_metrics(&self) -> bool {
        self.enable_metrics.unwrap_or(false)
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), ConfigError> {
    if let Some(interval) = cfg.interval_secs {
        if !interval.is_finite() || interval <= 0.0 || interval > MAX_INTERVAL_SECS {
            return Err(ConfigError::Invalid(format!(
                "interval_secs must be within (0, {}], got {}",
                MAX_INTERVAL_SECS, interval
            )));
        }
    }

    for (name, value) in [
        ("threshold_percent", cfg.threshold_percent),
        ("display_threshold_percent", cfg.display_threshold_percent),
    ] {
        if let Some(v) = value {
            if !v.is_finite() || !(0.0..=100.0).contains(&v) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be within 0..=100, got {}",
                    name, v
                )));
            }
        }
    }

    if cfg.counter_backend()? == CounterBackend::Replay && cfg.replay_file.is_none() {
        return Err(ConfigError::Invalid(
            "counter_source is set to replay, but no replay_file defined".into(),
        ));
    }

    if cfg.enforcer_timeout_secs == Some(0) {
        return Err(ConfigError::Invalid(
            "enforcer_timeout_secs must be greater than 0".into(),
        ));
    }

    if let Some(level) = cfg.log_level.as_deref() {
        if !matches!(level, "off" | "error" | "warn" | "info" | "debug" | "trace") {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level '{}', expected off, error, warn, info, debug or trace",
                level
            )));
        }
    }

    Ok(())
}

/// Loads the configuration file at `path`, or the first existing default
/// location. Without any file the defaults are returned.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match DEFAULT_CONFIG_LOCATIONS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
        {
            Some(p) => p.to_path_buf(),
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;

    let parse_err = |reason: String| ConfigError::Parse {
        path: path.clone(),
        reason,
    };

    let config: Config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        Some("toml") => toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        // Default to YAML
        _ => serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
    };

    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}
