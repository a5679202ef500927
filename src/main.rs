use std::sync::Arc;

use tracing::{error, info, warn};

use sharebox::{Config, StorageService};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            if let Err(e) = config.apply_env_overrides() {
                eprintln!("Ignoring environment overrides: {e}");
            }
            config
        }
    };

    // Initialize logging
    if let Err(e) = sharebox::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        sharebox::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    info!("sharebox - per-tenant storage service");

    let service = match StorageService::from_config(&config) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!(error = %e, "Failed to open storage");
            std::process::exit(1);
        }
    };

    let stop = match sharebox::shutdown::shutdown_signal() {
        Ok(stop) => stop,
        Err(e) => {
            error!(error = %e, "Failed to install signal handlers");
            std::process::exit(1);
        }
    };

    let sweeper = service.spawn_link_sweeper(config.share.sweep_interval());

    let signal = stop.await;
    info!(signal, "Shutting down");
    sweeper.abort();
    if let Err(e) = service.shutdown().await {
        warn!(error = %e, "Failed to shut down storage service");
    }
}
