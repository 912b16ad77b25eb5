use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use hydromux::logsink::{LogSink, TracingLogSink};
use hydromux::stats::{Phase, TickStats};
use hydromux::{alarms, cli, config, runtime, tick};

/// Initialize tracing from the configured log level. Logs go to stderr so
/// stdout stays clean for check-mode output.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

/// Bring the hardware online and pump control steps until SIGTERM/SIGINT.
async fn run(config_path: &Path) -> Result<()> {
    let cfg = config::Config::load(config_path)?;
    init_tracing(&cfg.log_level);

    info!(
        config_path = %config_path.display(),
        backends = cfg.backends.len(),
        temperatures = cfg.temperatures.len(),
        switches = cfg.switches.len(),
        relays = cfg.relays.len(),
        "hydromux starting"
    );

    let alarms = alarms::tracing_alarms();
    let controller = Arc::new(runtime::Controller::from_config(&cfg, Arc::clone(&alarms))?);

    // Setup failure or zero backends: refuse to come online.
    controller
        .registry()
        .setup()
        .context("hardware setup failed, refusing to come online")?;
    if let Err(e) = controller.registry().online() {
        controller.registry().exit();
        anyhow::bail!("hardware failed to come online: {e}");
    }

    let shutdown = Arc::new(tokio::sync::Notify::new());
    let stats = Arc::new(TickStats::new());

    // Tick driver: input → plant hook → output, at the configured cadence.
    // The plant runtime registers its hook when linked in; standalone, the
    // daemon pumps I/O and serves readers.
    {
        let controller = Arc::clone(&controller);
        let stats = Arc::clone(&stats);
        let shutdown = Arc::clone(&shutdown);
        let _ = tokio::spawn(tick::run_tick_driver(
            controller,
            None,
            cfg.tick_period,
            stats,
            shutdown,
        ));
    }

    // Periodic metric sources (temperatures, relay accounting).
    let sink = TracingLogSink::new(Arc::clone(&shutdown));
    for source in controller.log_sources() {
        sink.register(source);
    }

    wait_for_shutdown_signal().await?;

    info!("shutting down");
    shutdown.notify_waiters();

    for phase in [Phase::Input, Phase::Plant, Phase::Output] {
        if let Some(s) = stats.phase_stats(phase) {
            info!(
                phase = phase.as_str(),
                p50_ms = s.p50_ms,
                p95_ms = s.p95_ms,
                p99_ms = s.p99_ms,
                samples = s.sample_count,
                "phase latency"
            );
        }
    }

    if let Err(e) = controller.registry().offline() {
        error!(error = %e, "offline sweep reported failures");
    }
    controller.registry().exit();
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c");
    Ok(())
}

/// Validate the config and print a JSON summary to stdout.
fn check(config_path: &Path) -> Result<()> {
    let cfg = config::Config::load(config_path)?;
    let summary = serde_json::json!({
        "config": config_path.display().to_string(),
        "tick_period_ms": cfg.tick_period.as_millis() as u64,
        "backends": cfg.backends.keys().collect::<Vec<_>>(),
        "temperatures": cfg.temperatures.iter().map(|t| &t.name).collect::<Vec<_>>(),
        "switches": cfg.switches.iter().map(|s| &s.name).collect::<Vec<_>>(),
        "relays": cfg.relays.iter().map(|r| &r.name).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if cfg.backends.is_empty() {
        // Tracing is not initialized in check mode.
        eprintln!("warning: no backends configured, controller would refuse to come online");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let config_path = cli.config.unwrap_or_else(cli::default_config_path);

    match cli.command {
        None | Some(cli::Command::Run) => run(&config_path).await,
        Some(cli::Command::Check) => check(&config_path),
    }
}
