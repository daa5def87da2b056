//! Check command implementation.
//!
//! Validates the process table, the CPU counters, the enforcer and the
//! configuration.

use std::env;
use std::path::Path;

use responsiveness_guard::config::{validate_effective_config, Config};
use responsiveness_guard::enforcer::{effective_dry_run, running_as_root, ENFORCEMENT_SUPPORTED};
use responsiveness_guard::process::{self, ProcessLister, ProcfsLister};
use responsiveness_guard::system;

/// Looks `program` up the way the shell would.
fn find_in_path(program: &str) -> Option<std::path::PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.exists().then(|| candidate.to_path_buf());
    }
    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|p| p.is_file())
    })
}

/// Validates system requirements and configuration
pub fn command_check(proc: bool, enforcer: bool, all: bool, config: &Config) -> anyhow::Result<()> {
    println!("🔍 Responsiveness Guard - System Check");
    println!("======================================");

    let mut all_ok = true;
    let root = config.proc_root();

    if proc || all {
        println!("\n📁 Checking {} filesystem...", root.display());
        if root.exists() {
            let pids = ProcfsLister::new(&root).list_pids();
            if pids.is_empty() {
                println!("   ❌ Cannot read any process entries");
                all_ok = false;
            } else {
                println!("   ✅ Can read {} process entries", pids.len());
            }

            match system::read_cpu_stat(&root) {
                Ok(stat) => println!("   ✅ System CPU counter readable ({} ticks)", stat.total()),
                Err(e) => {
                    println!("   ❌ {}", e);
                    println!("      The guard would fall back to the wall-clock counter source");
                    all_ok = false;
                }
            }

            match process::read_process_cpu_ticks(&root, std::process::id()) {
                Ok(ticks) => println!("   ✅ Per-process CPU counter readable ({} ticks)", ticks),
                Err(e) => {
                    println!("   ❌ {}", e);
                    all_ok = false;
                }
            }

            if let Ok(cores) = system::get_cpu_core_count(&root) {
                println!(
                    "   ℹ️  {} cores: a single-threaded process peaks at ~{:.1}% usage",
                    cores,
                    100.0 / cores as f64
                );
            }
        } else {
            println!("   ❌ {} not found", root.display());
            all_ok = false;
        }
    }

    if enforcer || all {
        println!("\n🛡️  Checking enforcer...");
        if !ENFORCEMENT_SUPPORTED {
            println!("   ⚠️  Non-Linux host: cgroup enforcement unavailable, dry-run forced");
        }
        if effective_dry_run(config) {
            println!("   ℹ️  Dry-run mode: enforcer calls are only printed");
        }

        let program = config.enforcer_program();
        match find_in_path(program) {
            Some(path) => println!("   ✅ Enforcer program found: {}", path.display()),
            None => {
                println!("   ❌ Enforcer program '{}' not found", program);
                all_ok = false;
            }
        }

        let script = config.enforcer_script();
        if script.is_file() {
            println!("   ✅ Enforcer script found: {}", script.display());
        } else {
            println!("   ❌ Enforcer script {} not found", script.display());
            all_ok = false;
        }

        if running_as_root() {
            println!("   ✅ Running as root");
        } else {
            println!("   ⚠️  Not running as root, cgroup enforcement might fail");
        }
    }

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(()) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - system is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review warnings");
        std::process::exit(1);
    }
}
