//! Raw cumulative CPU-time counters.
//!
//! Every [`CounterSource`] exposes one system-wide aggregate and one counter
//! per pid. Units are abstract ticks; only ratios of deltas are meaningful.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, ConfigError};
use crate::process::{self, ProcessLister, ProcfsLister};
use crate::replay::ReplayTrace;
use crate::system;

/// Failure to read a counter.
#[derive(Debug, Error)]
pub enum CounterError {
    /// The process is gone or its accounting file is unreadable.
    #[error("counter for pid {pid} unavailable: {reason}")]
    ProcessUnavailable { pid: u32, reason: String },

    /// The system-wide aggregate could not be read.
    #[error("system counter unavailable: {0}")]
    SystemUnavailable(String),
}

/// Read-only access to cumulative CPU counters.
pub trait CounterSource: Send + Sync {
    /// Cumulative ticks across all cores.
    fn system_total(&self) -> Result<f64, CounterError>;

    /// Cumulative ticks consumed by `pid` (user + system).
    fn process_total(&self, pid: u32) -> Result<f64, CounterError>;
}

/// Counters read from a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcfsCounterSource {
    root: PathBuf,
}

impl ProcfsCounterSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CounterSource for ProcfsCounterSource {
    fn system_total(&self) -> Result<f64, CounterError> {
        system::read_cpu_stat(&self.root)
            .map(|stat| stat.total() as f64)
            .map_err(CounterError::SystemUnavailable)
    }

    fn process_total(&self, pid: u32) -> Result<f64, CounterError> {
        process::read_process_cpu_ticks(&self.root, pid)
            .map(|ticks| ticks as f64)
            .map_err(|reason| CounterError::ProcessUnavailable { pid, reason })
    }
}

/// Fallback for hosts without a readable `/proc/stat`.
///
/// The system total follows the wall clock in centiseconds; no per-process
/// accounting exists, so every process reads as idle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockCounterSource;

impl CounterSource for ClockCounterSource {
    fn system_total(&self) -> Result<f64, CounterError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 100.0)
            .map_err(|e| CounterError::SystemUnavailable(e.to_string()))
    }

    fn process_total(&self, pid: u32) -> Result<f64, CounterError> {
        Err(CounterError::ProcessUnavailable {
            pid,
            reason: "no per-process accounting on this host".to_string(),
        })
    }
}

/// Counter backend selected in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterBackend {
    /// `procfs` when `<proc_root>/stat` is readable, otherwise `clock`.
    Auto,
    Procfs,
    Clock,
    Replay,
}

impl FromStr for CounterBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "procfs" => Ok(Self::Procfs),
            "clock" => Ok(Self::Clock),
            "replay" => Ok(Self::Replay),
            other => Err(ConfigError::Invalid(format!(
                "Invalid counter_source '{}', expected auto, procfs, clock or replay",
                other
            ))),
        }
    }
}

/// Process lister and counter source wired for one configuration.
pub struct Sources {
    pub lister: Arc<dyn ProcessLister>,
    pub counters: Arc<dyn CounterSource>,
    pub backend: CounterBackend,
}

/// Builds the lister/counter pair selected by `config`.
///
/// `auto` resolves to `procfs` or `clock` here, so the returned backend is
/// never [`CounterBackend::Auto`].
pub fn build_sources(config: &Config) -> Result<Sources, ConfigError> {
    let root = config.proc_root();
    let backend = config.counter_backend()?;

    let backend = match backend {
        CounterBackend::Auto => {
            if system::read_cpu_stat(&root).is_ok() {
                CounterBackend::Procfs
            } else {
                warn!(
                    "{} is not readable, falling back to the wall-clock counter source",
                    root.join("stat").display()
                );
                CounterBackend::Clock
            }
        }
        other => other,
    };

    let sources = match backend {
        CounterBackend::Procfs | CounterBackend::Auto => Sources {
            lister: Arc::new(ProcfsLister::new(root.clone())),
            counters: Arc::new(ProcfsCounterSource::new(root)),
            backend: CounterBackend::Procfs,
        },
        CounterBackend::Clock => Sources {
            lister: Arc::new(ProcfsLister::new(root)),
            counters: Arc::new(ClockCounterSource),
            backend,
        },
        CounterBackend::Replay => {
            let path = config.replay_file.as_ref().ok_or_else(|| {
                ConfigError::Invalid("counter_source 'replay' requires replay_file".into())
            })?;
            let trace = Arc::new(ReplayTrace::load(path)?);
            info!(
                "Replaying {} ticks from {}",
                trace.len(),
                path.display()
            );
            Sources {
                lister: trace.clone(),
                counters: trace,
                backend,
            }
        }
    };

    Ok(sources)
}
