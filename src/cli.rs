//! CLI arguments and subcommands for responsiveness-guard.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::Level;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Maps to a tracing level; `None` disables logging.
    pub fn to_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }

    pub fn parse_name(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "responsiveness-guard",
    about = "Throttles processes that exceed a CPU budget",
    long_about = "Throttles processes that exceed a CPU budget.\n\n\
                  Periodically samples per-process CPU counters from /proc, computes each \
                  process's share of the whole machine and invokes an external enforcer \
                  (by default a cgroup helper script) for processes above the threshold.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Sampling interval in seconds
    #[arg(short = 'i', long)]
    pub interval: Option<f64>,

    /// CPU usage (percent of the whole machine) above which a process is throttled
    #[arg(short = 't', long)]
    pub threshold: Option<f64>,

    /// Print status lines for processes above this usage
    #[arg(long)]
    pub display_threshold: Option<f64>,

    /// Print enforcer calls instead of executing them
    #[arg(long)]
    pub dry_run: bool,

    /// Enforcer helper script
    #[arg(long)]
    pub enforcer_script: Option<PathBuf>,

    /// Counter source: auto, procfs, clock or replay
    #[arg(long)]
    pub counter_source: Option<String>,

    /// Replay trace for --counter-source replay
    #[arg(long)]
    pub replay_file: Option<PathBuf>,

    /// Additional pids never to throttle (comma-separated)
    #[arg(long)]
    pub ignore_pids: Option<String>,

    /// Parallel sampling threads (0 = auto)
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// Maximum number of processes to sample per tick
    #[arg(long)]
    pub max_processes: Option<usize>,

    /// Serve /metrics and /health
    #[arg(long)]
    pub metrics: bool,

    /// HTTP listen port for --metrics
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP for --metrics
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level (overrides log_level from the config file)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and system requirements
    Check {
        /// Check the /proc filesystem and counters
        #[arg(long)]
        proc: bool,

        /// Check the enforcer program and script
        #[arg(long)]
        enforcer: bool,

        /// Check all system requirements
        #[arg(long)]
        all: bool,
    },

    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Sample a few ticks and print readings without enforcing anything
    Test {
        /// Number of sampling ticks after the initial baseline
        #[arg(short = 'n', long, default_value_t = 1)]
        iterations: usize,

        /// Show every reading instead of the top ten
        #[arg(long)]
        verbose: bool,
    },

    /// Generate a synthetic replay trace JSON file
    GenerateTestdata {
        /// Output file path
        #[arg(short = 'o', long, default_value = "testdata.json")]
        output: PathBuf,

        /// Number of ticks in the trace
        #[arg(long, default_value_t = 30)]
        ticks: usize,

        /// Number of CPU hogs
        #[arg(long, default_value_t = 2)]
        hogs: usize,

        /// Number of mostly idle processes
        #[arg(long, default_value_t = 12)]
        idle: usize,
    },
}
