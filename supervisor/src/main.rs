//! Script supervisor daemon
//!
//! Responsibilities:
//! - Read configuration from `$SCRIPT_SUPERVISOR_CONFIG` or `./supervisor.toml`
//! - Create the scripts and logs directories
//! - Start the configured autostart scripts and keep them alive
//! - Stop every child on SIGINT/SIGTERM before exiting

use anyhow::{Context, Result};
use std::fs;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use script_supervisor::{config, Supervisor};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;
    init_logging(&config.system.log_level)?;

    info!("Script supervisor v{} starting...", env!("CARGO_PKG_VERSION"));

    fs::create_dir_all(&config.paths.scripts_dir).with_context(|| {
        format!(
            "Failed to create scripts dir {}",
            config.paths.scripts_dir.display()
        )
    })?;
    fs::create_dir_all(&config.paths.logs_dir).with_context(|| {
        format!("Failed to create logs dir {}", config.paths.logs_dir.display())
    })?;

    let autostart = config.supervision.autostart.clone();
    let supervisor = Supervisor::new(config);

    match supervisor.list_scripts() {
        Ok(scripts) => info!(count = scripts.len(), "Scripts available: {scripts:?}"),
        Err(e) => warn!("Failed to list scripts: {e}"),
    }

    for name in &autostart {
        match supervisor.start(name).await {
            Ok(()) => info!(script = %name, "Autostarted"),
            Err(e) => warn!(script = %name, "Autostart failed: {e}"),
        }
    }

    info!(
        running = supervisor.list_running().await.len(),
        "Supervisor ready"
    );

    wait_for_shutdown().await;

    supervisor.shutdown().await;
    info!("Script supervisor shut down cleanly");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level {level:?}"))?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to listen for SIGTERM: {e}");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for SIGINT: {e}");
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received SIGINT, shutting down..."),
            Err(e) => error!("Failed to listen for SIGINT: {e}"),
        },
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
    }
}
