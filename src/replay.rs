//! Recorded counter traces.
//!
//! A trace is a JSON file with one frame per tick. The trace acts as both
//! the process lister and the counter source: each enumeration advances to
//! the next frame and counter reads are answered from the current frame.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use crate::config::ConfigError;
use crate::counter::{CounterError, CounterSource};
use crate::process::ProcessLister;

/// Counters of a single tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReplayTick {
    pub system_total: f64,
    /// Cumulative ticks per live pid
    #[serde(default)]
    pub processes: BTreeMap<u32, f64>,
}

/// Root structure for trace JSON files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayData {
    pub version: String,
    pub generated_at: String,
    pub ticks: Vec<ReplayTick>,
}

pub struct ReplayTrace {
    ticks: Vec<ReplayTick>,
    /// Number of frames handed out so far
    position: Mutex<usize>,
}

impl ReplayTrace {
    pub fn new(ticks: Vec<ReplayTick>) -> Self {
        Self {
            ticks,
            position: Mutex::new(0),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let data: ReplayData =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(data.ticks))
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// True once every frame has been enumerated.
    pub fn is_exhausted(&self) -> bool {
        self.position() >= self.ticks.len()
    }

    fn position(&self) -> usize {
        match self.position.lock() {
            Ok(p) => *p,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn current(&self) -> Option<&ReplayTick> {
        let pos = self.position();
        if pos == 0 {
            return None;
        }
        self.ticks.get(pos - 1)
    }
}

impl ProcessLister for ReplayTrace {
    fn list_pids(&self) -> Vec<u32> {
        let mut pos = match self.position.lock() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *pos >= self.ticks.len() {
            // Past the end the trace behaves like a host without processes
            return Vec::new();
        }
        let frame = &self.ticks[*pos];
        *pos += 1;
        frame.processes.keys().copied().collect()
    }
}

impl CounterSource for ReplayTrace {
    fn system_total(&self) -> Result<f64, CounterError> {
        self.current()
            .map(|tick| tick.system_total)
            .ok_or_else(|| CounterError::SystemUnavailable("replay not started".into()))
    }

    fn process_total(&self, pid: u32) -> Result<f64, CounterError> {
        self.current()
            .and_then(|tick| tick.processes.get(&pid).copied())
            .ok_or_else(|| CounterError::ProcessUnavailable {
                pid,
                reason: "not present in replay frame".into(),
            })
    }
}
