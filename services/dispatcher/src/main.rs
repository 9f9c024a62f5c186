//! Mission dispatcher.
//!
//! Periodically scrapes the mission list, builds requirement records and
//! dispatches vehicles to missions from a fixed pool of mission pages.

use std::sync::Arc;

use anyhow::{Context, Result};
use mcd_dispatcher::mock::{MockPage, MockPlatform};
use mcd_dispatcher::{Config, DispatchWorker, MissionPage, Tables, VehicleLockTable};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        region = ?config.region,
        base_url = config.region.base_url(),
        data_dir = %config.data_dir.display(),
        workers = config.workers,
        allow_incomplete = config.policy.allow_incomplete,
        dispatch_mode = %config.policy.mode,
        "Starting mission dispatcher"
    );

    let tables = Tables::load(&config.data_dir).with_context(|| {
        format!("Failed to load static tables from {}", config.data_dir.display())
    })?;

    // In-memory platform and pages (mock for now)
    let platform = Arc::new(MockPlatform::new());
    let pages: Vec<Box<dyn MissionPage>> = (0..config.workers)
        .map(|_| Box::new(MockPage::new()) as Box<dyn MissionPage>)
        .collect();

    let locks = Arc::new(VehicleLockTable::new());
    let mut worker = DispatchWorker::new(&config, Arc::new(tables), platform, pages, locks);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker_handle = tokio::spawn(async move {
        worker.run(shutdown_rx).await;
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut worker_handle => {
            if let Err(e) = result {
                error!(error = %e, "Dispatch worker panicked");
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if !worker_handle.is_finished() {
        let _ = worker_handle.await;
    }

    info!("Mission dispatcher shutdown complete");
    Ok(())
}
