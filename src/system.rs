//! System-wide CPU counters from the /proc filesystem.
//!
//! This module reads the aggregate `cpu` line of `/proc/stat`, which is the
//! system-wide cumulative tick counter every usage percentage is measured
//! against, and the online core count used for operator hints.

use std::fs;
use std::path::Path;

/// Cumulative CPU tick counters of the aggregate `cpu` line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStat {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuStat {
    /// Calculate total CPU time (all fields).
    ///
    /// `guest` and `guest_nice` are already accounted in `user`/`nice` and
    /// are therefore not added again. Saturates instead of overflowing.
    pub fn total(&self) -> u64 {
        [
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
        ]
        .iter()
        .fold(self.user, |acc, v| acc.saturating_add(*v))
    }
}

/// Reads the aggregate CPU counters from `<proc_root>/stat`.
pub fn read_cpu_stat(proc_root: &Path) -> Result<CpuStat, String> {
    let path = proc_root.join("stat");
    let content = fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    parse_cpu_stat(&content)
}

/// Parses the aggregate `cpu ` line out of `/proc/stat` content.
///
/// Per-core lines (`cpu0`, `cpu1`, ...) are skipped.
pub fn parse_cpu_stat(content: &str) -> Result<CpuStat, String> {
    let line = content
        .lines()
        .find(|line| line.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| "No aggregate cpu line found in /proc/stat".to_string())?;

    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 5 {
        return Err(format!(
            "Invalid cpu line: expected at least 4 counters, got {}",
            parts.len() - 1
        ));
    }

    let field = |idx: usize| -> Result<u64, String> {
        match parts.get(idx) {
            Some(v) => v
                .parse::<u64>()
                .map_err(|e| format!("Failed to parse cpu field {}: {}", idx, e)),
            None => Ok(0),
        }
    };

    Ok(CpuStat {
        user: field(1)?,
        nice: field(2)?,
        system: field(3)?,
        idle: field(4)?,
        iowait: field(5)?,
        irq: field(6)?,
        softirq: field(7)?,
        steal: field(8)?,
    })
}

/// Gets the number of CPU cores.
///
/// Counts the per-core `cpuN` lines of `<proc_root>/stat`.
pub fn get_cpu_core_count(proc_root: &Path) -> Result<usize, String> {
    let path = proc_root.join("stat");
    let content = fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

    let count = count_cores(&content);
    if count == 0 {
        return Err("No per-core cpu lines found in /proc/stat".to_string());
    }
    Ok(count)
}

fn count_cores(content: &str) -> usize {
    content
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|name| {
            name.strip_prefix("cpu")
                .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        })
        .count()
}
