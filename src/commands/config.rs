//! Config command implementation.

use std::fs;
use std::path::PathBuf;

use responsiveness_guard::config::Config;

use crate::cli::ConfigFormat;

/// Generates configuration files
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<()> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from("responsiveness-guard.yaml"));
    let content = render_config(&config, format, commented)?;

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Serializes `config` in the requested format.
pub fn render_config(
    config: &Config,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<String> {
    let content = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => {
            let content = serde_yaml::to_string(config)?;
            if commented {
                add_config_comments(content)
            } else {
                content
            }
        }
    };
    Ok(content)
}

/// Adds comments to YAML configuration
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Responsiveness Guard Configuration
# ===================================
#
# Sampling
# --------
# interval_secs: 2.0               # Seconds between ticks
# threshold_percent: 70.0          # Throttle above this share of the whole machine
# display_threshold_percent: 10.0  # Print status lines above this usage
# proc_root: "/proc"               # procfs mount to read
# counter_source: "auto"           # auto, procfs, clock or replay
# replay_file: null                # Trace for counter_source: replay
# ignore_pids: null                # Pids never throttled (own pid always is)
# max_processes: null              # Maximum processes sampled per tick
# parallelism: null                # Sampling threads (null = auto)
#
# Enforcement
# -----------
# dry_run: false                   # Print enforcer calls instead of running them
# enforcer_program: "bash"         # Interpreter of the enforcer script
# enforcer_script: "./cgroup_limiter.sh"
# enforcer_timeout_secs: 10        # Kill the enforcer after N seconds
#
# Metrics Server
# --------------
# enable_metrics: false            # Serve /metrics and /health
# bind: "127.0.0.1"
# port: 9216
#
# Logging
# -------
# log_level: "info"                # off, error, warn, info, debug, trace
"#;

    format!("{comments}\n{yaml}")
}
