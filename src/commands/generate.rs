//! Generate testdata command implementation.
//!
//! Writes a synthetic replay trace that exercises the interesting paths of
//! the guard: sustained CPU hogs, idle processes, a process that exits half
//! way through and a pid that is reused afterwards with a fresh counter.

use chrono::Utc;
use rand::Rng;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

use responsiveness_guard::replay::{ReplayData, ReplayTick};

/// Trace format version written by this generator.
pub const TRACE_VERSION: &str = "1";

/// Ticks the synthetic machine advances per sample (4 cores, 2s, USER_HZ 100).
const SYSTEM_TICKS_PER_SAMPLE: f64 = 800.0;

const HOG_PID_BASE: u32 = 1000;
const IDLE_PID_BASE: u32 = 2000;
/// Pid of the process that exits and is later reused.
const TRANSIENT_PID: u32 = 3000;

/// Builds a trace of `ticks` frames.
pub fn generate_trace<R: Rng>(ticks: usize, hogs: usize, idle: usize, rng: &mut R) -> ReplayData {
    let mut system_total = rng.gen_range(100_000.0..1_000_000.0_f64).round();
    let mut counters: BTreeMap<u32, f64> = BTreeMap::new();
    let mut frames = Vec::with_capacity(ticks);

    let transient_exit = ticks / 2;
    let transient_reuse = ticks * 3 / 4;

    for tick in 0..ticks {
        let delta_sys = SYSTEM_TICKS_PER_SAMPLE;
        system_total += delta_sys;

        for i in 0..hogs {
            let share = rng.gen_range(0.72..0.95);
            *counters.entry(HOG_PID_BASE + i as u32).or_insert(0.0) += (share * delta_sys).round();
        }
        for i in 0..idle {
            let share = rng.gen_range(0.0..0.05);
            *counters.entry(IDLE_PID_BASE + i as u32).or_insert(0.0) += (share * delta_sys).round();
        }

        if tick == transient_exit {
            counters.remove(&TRANSIENT_PID);
        } else if tick < transient_exit || tick >= transient_reuse {
            let share = rng.gen_range(0.15..0.30);
            *counters.entry(TRANSIENT_PID).or_insert(0.0) += (share * delta_sys).round();
        }

        frames.push(ReplayTick {
            system_total,
            processes: counters.clone(),
        });
    }

    ReplayData {
        version: TRACE_VERSION.to_string(),
        generated_at: Utc::now().to_rfc3339(),
        ticks: frames,
    }
}

/// Generate testdata command handler.
pub fn command_generate_testdata(
    output: PathBuf,
    ticks: usize,
    hogs: usize,
    idle: usize,
) -> anyhow::Result<()> {
    info!("Generating replay trace with {} ticks", ticks);

    let mut rng = rand::thread_rng();
    let data = generate_trace(ticks, hogs, idle, &mut rng);
    debug!(
        "Trace spans {} frames, {} pids in the first frame",
        data.ticks.len(),
        data.ticks.first().map_or(0, |t| t.processes.len())
    );

    let json = serde_json::to_string_pretty(&data)?;
    fs::write(&output, json)?;

    println!("✅ Replay trace written to: {}", output.display());
    println!("   Ticks: {}", ticks);
    println!("   CPU hogs: {} (pids {}..)", hogs, HOG_PID_BASE);
    println!("   Idle processes: {} (pids {}..)", idle, IDLE_PID_BASE);
    println!(
        "   Transient pid {} exits at tick {} and is reused from tick {}",
        TRANSIENT_PID,
        ticks / 2,
        ticks * 3 / 4
    );
    println!(
        "\nRun with: responsiveness-guard --counter-source replay --replay-file {} --dry-run",
        output.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_trace_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let data = generate_trace(8, 2, 3, &mut rng);
        assert_eq!(data.version, TRACE_VERSION);
        assert_eq!(data.ticks.len(), 8);

        let first = &data.ticks[0];
        assert_eq!(first.processes.len(), 2 + 3 + 1);

        // Transient pid is gone at tick 4 and 5, back from tick 6
        assert!(!data.ticks[4].processes.contains_key(&TRANSIENT_PID));
        assert!(!data.ticks[5].processes.contains_key(&TRANSIENT_PID));
        let reused = data.ticks[6].processes[&TRANSIENT_PID];
        assert!(reused < data.ticks[3].processes[&TRANSIENT_PID]);
    }

    #[test]
    fn test_counters_are_monotonic() {
        let mut rng = StdRng::seed_from_u64(11);
        let data = generate_trace(10, 1, 1, &mut rng);
        for pair in data.ticks.windows(2) {
            assert!(pair[1].system_total > pair[0].system_total);
            let hog = HOG_PID_BASE;
            assert!(pair[1].processes[&hog] >= pair[0].processes[&hog]);
        }
    }
}
