//! Phemex Guard - Main entry point
//!
//! Config files: phemex-guard.toml, phemex-guard.yaml, config.toml

use anyhow::Result;
use phemex_guard::risk::{CycleOrchestrator, ReentryEngine, TrailingStopEngine};
use phemex_guard::{Config, FileStateStore, PhemexClient, VERSION};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    let log_level = config.log_level.as_deref().unwrap_or("info");
    let level = parse_log_level(log_level);

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("Starting Phemex Guard v{}", VERSION);
    config.validate()?;
    info!("Configuration loaded");
    info!("  Symbols: {:?}", config.symbols);
    info!("  State directory: {}", config.state_dir);
    info!("  Cycle interval: {}s", config.risk.cycle_interval_secs);

    let api_key = config.api.key.clone().unwrap_or_default();
    let api_secret = config.api.secret.clone().unwrap_or_default();
    let gateway = Arc::new(PhemexClient::new(
        &api_key,
        &api_secret,
        config.api.rate_limit_ms,
    ));
    let store = Arc::new(FileStateStore::new(&config.state_dir)?);

    let orchestrator = CycleOrchestrator::new(
        gateway,
        store,
        TrailingStopEngine::new(config.risk.breath_step, config.risk.flat_pnl_epsilon),
        ReentryEngine::new(config.risk.liquidation_fraction, config.risk.closeness_warn),
        config.symbols.clone(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to initialize orchestrator: {}", e))?;

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        let _ = shutdown_tx.send(()).await;
    });

    info!("Guard initialized successfully, starting polling loop...");

    // An overrunning cycle delays the next tick rather than skipping it or
    // running two cycles at once.
    let mut tick = interval(Duration::from_secs(config.risk.cycle_interval_secs));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                // Supervisory boundary: a failed cycle never kills the daemon.
                if let Err(e) = orchestrator.run_cycle().await {
                    error!("❌ Cycle failed: {e}. Retrying next tick.");
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down...");
    Ok(())
}

/// Parse log level string
fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
