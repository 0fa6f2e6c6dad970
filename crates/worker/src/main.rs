mod bootstrap;

use std::time::Duration;

use anyhow::Result;

use parley_agent::JobOutcome;
use parley_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use parley_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config, None).await?;

    tracing::info!(
        event_name = "system.worker.started",
        correlation_id = "bootstrap",
        pipeline_mode = if app.pipeline_configured { "configured" } else { "noop" },
        poll_interval_ms = app.config.worker.poll_interval_ms,
        "parley-worker started"
    );

    let _ = &app.db_pool;
    let _ = &app.queue;
    let _ = &app.guard;
    tokio::select! {
        _ = poll_loop(&app) => {}
        _ = wait_for_shutdown() => {}
    }

    tracing::info!(
        event_name = "system.worker.stopping",
        correlation_id = "shutdown",
        "parley-worker stopping"
    );

    Ok(())
}

async fn poll_loop(app: &bootstrap::Application) {
    let idle_wait = Duration::from_millis(app.config.worker.poll_interval_ms);
    loop {
        match app.worker.process_next().await {
            Ok(JobOutcome::Idle) => tokio::time::sleep(idle_wait).await,
            Ok(_) => {}
            Err(error) => {
                // Infrastructure errors are logged and the loop keeps
                // polling; jobs stay queued until acknowledged.
                tracing::error!(
                    event_name = "system.worker.poll_error",
                    correlation_id = "poll",
                    error = %error,
                    "worker pass failed"
                );
                tokio::time::sleep(idle_wait).await;
            }
        }
    }
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
