// responsiveness-guard - version 0.1.0
// CPU budget guard with tracing logging
use anyhow::Context;
use axum::{routing::get, Router};
use clap::{Parser, ValueEnum};
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};

use responsiveness_guard::config::{
    load_config, validate_effective_config, Config, ConfigError, DEFAULT_BIND_ADDR, DEFAULT_PORT,
};
use responsiveness_guard::enforcer::{
    effective_dry_run, enforcer_from_config, running_as_root, ENFORCEMENT_SUPPORTED,
};
use responsiveness_guard::guard::GuardLoop;
use responsiveness_guard::metrics::GuardMetrics;
use responsiveness_guard::stats::GuardStats;

mod cli;
mod commands;
mod handlers;
mod state;

use cli::{Args, Commands, ConfigFormat, LogLevel};
use state::AppState;

/// -------------------------------------------------------------------
/// CONFIGURATION MANAGEMENT
/// -------------------------------------------------------------------

/// Resolves configuration from CLI args, config file, and defaults.
/// Precedence: CLI (if provided) > config file > default.
fn resolve_config(args: &Args) -> Result<Config, ConfigError> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if args.interval.is_some() {
        config.interval_secs = args.interval;
    }
    if args.threshold.is_some() {
        config.threshold_percent = args.threshold;
    }
    if args.display_threshold.is_some() {
        config.display_threshold_percent = args.display_threshold;
    }
    if args.dry_run {
        config.dry_run = Some(true);
    }
    if let Some(script) = &args.enforcer_script {
        config.enforcer_script = Some(script.clone());
    }
    if let Some(source) = &args.counter_source {
        config.counter_source = Some(source.clone());
    }
    if let Some(file) = &args.replay_file {
        config.replay_file = Some(file.clone());
    }

    // Parse comma-separated ignore list
    if let Some(ignore_str) = &args.ignore_pids {
        let pids = ignore_str
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u32>().map_err(|_| {
                    ConfigError::Invalid(format!("Invalid pid '{}' in --ignore-pids", s))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        config.ignore_pids = Some(pids);
    }

    if args.parallelism.is_some() {
        config.parallelism = args.parallelism;
    }
    if args.max_processes.is_some() {
        config.max_processes = args.max_processes;
    }

    if args.metrics {
        config.enable_metrics = Some(true);
    }
    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }
    if let Some(level) = args.log_level {
        config.log_level = level.to_possible_value().map(|v| v.get_name().to_string());
    }

    Ok(config)
}

/// Shows configuration in requested format
fn show_config(config: &Config, format: ConfigFormat) -> anyhow::Result<()> {
    let output = commands::config::render_config(config, format, false)?;
    println!("{output}");
    Ok(())
}

/// Initializes tracing logging subsystem with configured log level
fn setup_logging(config: &Config) {
    let level = config
        .log_level
        .as_deref()
        .and_then(LogLevel::parse_name)
        .unwrap_or(LogLevel::Info);

    let filter = match level.to_level() {
        Some(level) => LevelFilter::from_level(level),
        None => LevelFilter::OFF,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    info!("Logging initialized with level: {:?}", level);
}

/// Completes on SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Binds the metrics server and serves it in a background task.
async fn spawn_metrics_server(
    config: &Config,
    state: Arc<AppState>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let bind_ip_str = config.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
    let port = config.port.unwrap_or(DEFAULT_PORT);
    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind_ip_str, port))?;

    let app = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .route("/health", get(handlers::health_handler))
        .with_state(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {}", addr))?;
    info!("Metrics server listening on http://{}", addr);

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    }))
}

/// -------------------------------------------------------------------
/// MAIN APPLICATION ENTRY POINT
/// -------------------------------------------------------------------
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }

    if args.check_config {
        println!("✅ Configuration is valid");
        return Ok(());
    }

    if args.show_config {
        return show_config(&config, args.config_format);
    }

    // Setup logging subsystem first to enable proper logging
    setup_logging(&config);

    // Handle subcommands
    if let Some(command) = &args.command {
        return match command {
            Commands::Check {
                proc,
                enforcer,
                all,
            } => commands::command_check(*proc, *enforcer, *all, &config),
            Commands::Config {
                output,
                format,
                commented,
            } => commands::command_config(output.clone(), *format, *commented),
            Commands::Test {
                iterations,
                verbose,
            } => commands::command_test(*iterations, *verbose, &config).await,
            Commands::GenerateTestdata {
                output,
                ticks,
                hogs,
                idle,
            } => commands::command_generate_testdata(output.clone(), *ticks, *hogs, *idle),
        };
    }

    info!("=== Responsiveness Guard Initialized ===");

    // Configure parallel sampling thread pool if specified
    if let Some(threads) = config.parallelism {
        if threads > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
                .unwrap_or_else(|e| error!("Failed to set rayon thread pool: {}", e));
            debug!("Rayon thread pool configured with {} threads", threads);
        }
    }

    if !ENFORCEMENT_SUPPORTED && !config.dry_run() {
        warn!("Non-Linux host detected, enabling dry-run mode");
    }
    if !effective_dry_run(&config) && !running_as_root() {
        warn!("Not running as root. Cgroup enforcement might fail.");
    }

    let sink = enforcer_from_config(&config);
    let stats = Arc::new(GuardStats::new());
    let mut guard = GuardLoop::from_config(&config, sink)
        .context("Failed to set up counter sources")?
        .with_stats(stats.clone());

    let server_task = if config.enable_metrics() {
        let registry = Registry::new();
        let metrics = GuardMetrics::new(&registry)?;
        guard = guard.with_metrics(metrics);
        let state = Arc::new(AppState {
            registry,
            stats: stats.clone(),
        });
        Some(spawn_metrics_server(&config, state).await?)
    } else {
        None
    };

    info!(
        "Threshold {:.1}% of total CPU capacity, interval {:.1}s",
        config.threshold(),
        config.interval().as_secs_f64()
    );

    let ticks = guard.run(shutdown_signal()).await;

    if let Some(task) = server_task {
        task.abort();
        let _ = task.await;
    }

    info!("Session summary ({} ticks):\n{}", ticks, stats.render_table());
    Ok(())
}
