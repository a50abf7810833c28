use anyhow::{Context, Result};
use helios::cache::ApiCache;
use helios::clock::SystemClock;
use helios::config::Config;
use helios::logging::init_logging;
use helios::sim::SimDevices;
use helios::site::Site;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Optional config path as first argument, default locations otherwise
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => Config::load().context("Failed to load config")?,
    };

    init_logging(&config.logging).context("Failed to initialize logging")?;
    info!(
        "Helios {} starting up with {} loadpoint(s)",
        env!("APP_VERSION"),
        config.loadpoints.len()
    );

    let cache = Arc::new(ApiCache::new());
    let clock = Arc::new(SystemClock);
    let devices = SimDevices::from_config(&config.devices, cache.clone(), clock.clone());

    let mut site = Site::from_config(&config, &devices, clock, cache)
        .map_err(|e| anyhow::anyhow!("Failed to create site: {}", e))?;

    // Stop the control loop on ctrl-c
    let shutdown = site.shutdown_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown.send(());
        }
    });

    match site.run().await {
        Ok(()) => {
            info!("Helios shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Site failed with error: {}", e);
            Err(anyhow::anyhow!("Site error: {}", e))
        }
    }
}
