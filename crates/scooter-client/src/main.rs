#![doc = include_str!("../README.md")]

mod logging;
mod vehicle;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use vehicle::config::{CliArgs, ClientConfig};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ClientConfig::try_from(args)?;

    logging::init_logging()?;

    tracing::info!(
        vehicle_id = config.vehicle_id,
        hub = %config.hub_addr,
        latitude = config.start.latitude,
        longitude = config.start.longitude,
        battery = config.battery,
        "Starting scooter-client"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let state = vehicle::session::run(config, shutdown).await?;
    tracing::info!(
        vehicle_id = state.id,
        latitude = state.position.latitude,
        longitude = state.position.longitude,
        battery = state.battery,
        "Vehicle stopped"
    );

    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    token.cancel();
}
