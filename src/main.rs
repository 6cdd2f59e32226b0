//! Daemon entry point: configuration, logging, and the serial pipeline.

use tracing::{error, info};

use ventio::scheduler::FairScheduler;
use ventio::serial::SerialManager;
use ventio::{config, logging};

#[tokio::main]
async fn main() {
    let logging = logging::setup();

    let variables =
        serde_json::to_string(&config::variables()).unwrap_or_else(|_| "[]".to_string());

    let config = match config::load() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, %variables, "failed to initialize configuration");
            std::process::exit(1);
        }
    };

    logging.set_level(config.log_level);
    info!(%variables, "this software is configured using environment variables");

    let (mut manager, request_tx) = SerialManager::new(&config.serial_port);
    if let Err(err) = manager.start() {
        error!(error = %err, port = %config.serial_port, "failed to start serial manager");
        std::process::exit(1);
    }

    // Request sources are attached by higher-level controllers before the
    // scheduler starts; the daemon itself only owns the merge point.
    let mut scheduler = FairScheduler::new(request_tx);
    scheduler.start();

    info!(port = %config.serial_port, "serial manager running");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for the shutdown signal");
    }

    scheduler.stop();
    match manager.stop().await {
        Ok(()) => info!("shutdown complete"),
        Err(err) => {
            error!(error = %err, "failed to stop the serial manager cleanly");
            std::process::exit(1);
        }
    }
}
