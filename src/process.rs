//! Process table enumeration and per-process CPU counters.
//!
//! A [`ProcessLister`] yields the raw pid set of the host (or of a replay
//! trace); [`ProcessEnumerator`] applies the ignore set and the optional
//! process cap on top of it and is what the guard loop talks to.

use ahash::AHashSet as HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Source of the raw pid set of a tick.
pub trait ProcessLister: Send + Sync {
    /// Returns every live pid. An unavailable process table yields an empty
    /// list, never an error.
    fn list_pids(&self) -> Vec<u32>;
}

/// Lists numeric entries of a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcfsLister {
    root: PathBuf,
}

impl ProcfsLister {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ProcessLister for ProcfsLister {
    fn list_pids(&self) -> Vec<u32> {
        collect_pids(&self.root)
    }
}

/// Collects pids from the numeric directory names under `root`.
fn collect_pids(root: &Path) -> Vec<u32> {
    let mut out = Vec::new();
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Process table {} unavailable: {}", root.display(), e);
            return out;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = match name.to_str() {
            Some(v) => v,
            None => continue,
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if let Ok(pid) = name.parse::<u32>() {
            out.push(pid);
        }
    }
    out
}

/// Current pid set minus a fixed ignore set.
pub struct ProcessEnumerator {
    lister: Arc<dyn ProcessLister>,
    ignore: HashSet<u32>,
    max_processes: Option<usize>,
}

impl ProcessEnumerator {
    /// Builds an enumerator that never reports the calling process itself,
    /// in addition to everything in `ignore`.
    pub fn new(lister: Arc<dyn ProcessLister>, ignore: impl IntoIterator<Item = u32>) -> Self {
        let mut ignore: HashSet<u32> = ignore.into_iter().collect();
        ignore.insert(std::process::id());
        Self {
            lister,
            ignore,
            max_processes: None,
        }
    }

    pub fn with_max_processes(mut self, max: Option<usize>) -> Self {
        self.max_processes = max;
        self
    }

    pub fn is_ignored(&self, pid: u32) -> bool {
        self.ignore.contains(&pid)
    }

    /// Returns the sorted, de-duplicated pid set of this tick.
    pub fn enumerate(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self
            .lister
            .list_pids()
            .into_iter()
            .filter(|pid| !self.ignore.contains(pid))
            .collect();
        pids.sort_unstable();
        pids.dedup();
        if let Some(max) = self.max_processes {
            pids.truncate(max);
        }
        pids
    }
}

/// Reads `utime + stime` (clock ticks) of `pid` from `<proc_root>/<pid>/stat`.
pub fn read_process_cpu_ticks(proc_root: &Path, pid: u32) -> Result<u64, String> {
    let path = proc_root.join(pid.to_string()).join("stat");
    let content = fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    parse_process_cpu_ticks(&content)
}

/// Parses `utime + stime` out of `/proc/<pid>/stat` content.
///
/// The command name (field 2) may contain spaces and parentheses, so fields
/// are counted from the last `)`.
pub fn parse_process_cpu_ticks(content: &str) -> Result<u64, String> {
    let close = content
        .rfind(')')
        .ok_or_else(|| "Invalid stat format: missing command name".to_string())?;
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();

    // rest[0] is field 3 (state); utime and stime are fields 14 and 15
    if rest.len() < 13 {
        return Err(format!(
            "Invalid stat format: expected at least 15 fields, got {}",
            rest.len() + 2
        ));
    }

    let utime = rest[11]
        .parse::<u64>()
        .map_err(|e| format!("Failed to parse utime: {}", e))?;
    let stime = rest[12]
        .parse::<u64>()
        .map_err(|e| format!("Failed to parse stime: {}", e))?;

    utime
        .checked_add(stime)
        .ok_or_else(|| format!("CPU ticks overflow: utime {} + stime {}", utime, stime))
}

/// Reads process name from comm file or extracts from cmdline
pub fn read_process_name(proc_root: &Path, pid: u32) -> Option<String> {
    let proc_path = proc_root.join(pid.to_string());
    if let Ok(s) = fs::read_to_string(proc_path.join("comm")) {
        let t = s.trim();
        if !t.is_empty() {
            return Some(t.into());
        }
    }

    let cmd = fs::read(proc_path.join("cmdline")).ok()?;
    let first = cmd.split(|b| *b == 0).next()?;
    if first.is_empty() {
        return None;
    }
    let s = String::from_utf8_lossy(first);
    Some(s.rsplit('/').next().unwrap_or(&s).to_string())
}
