#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use clap::Parser;
use scooter_core::proto::{FILE_DESCRIPTOR_SET, scooter_service_server::ScooterServiceServer};
use server::{
    collab::{Collaborators, memory::MemoryFleet},
    config::{CliArgs, ServerConfig},
    http,
    hub::Hub,
    service::handler::ScooterHubService,
    telemetry::init_telemetry,
};
use std::future::IntoFuture;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let fleet = match &config.fleet_file {
        Some(path) => MemoryFleet::from_file(path)?,
        None => MemoryFleet::demo(),
    };

    let grpc_listener = TcpListener::bind(&config.grpc_addr)
        .await
        .with_context(|| format!("failed to bind gRPC listener on {}", config.grpc_addr))?;
    let http_listener = TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", config.http_addr))?;

    log_startup_info(&config);

    let hub = Hub::new(config, Collaborators::in_memory(fleet));
    let res = run_servers(hub, grpc_listener, http_listener).await;

    providers.shutdown();
    res
}

async fn run_servers(
    hub: Hub,
    grpc_listener: TcpListener,
    http_listener: TcpListener,
) -> anyhow::Result<()> {
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<ScooterServiceServer<ScooterHubService>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let grpc = Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_scooter_service(ScooterHubService::new(hub.clone())))
        .serve_with_incoming_shutdown(
            TcpListenerStream::new(grpc_listener),
            shutdown_signal(hub.clone(), health_reporter),
        );

    // The HTTP listener drains once the hub starts shutting down, which also
    // ends every live feed.
    let http = axum::serve(http_listener, http::router(hub.clone()))
        .with_graceful_shutdown(hub.shutdown_token().clone().cancelled_owned())
        .into_future();

    tokio::try_join!(
        async { grpc.await.context("gRPC server failed") },
        async { http.await.context("HTTP server failed") },
    )?;

    tracing::info!("Hub shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting scooter hub with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting scooter hub: gRPC on {}, HTTP on {}",
            config.grpc_addr,
            config.http_addr
        );
    }
}

fn build_scooter_service(service: ScooterHubService) -> ScooterServiceServer<ScooterHubService> {
    ScooterServiceServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
}

async fn shutdown_signal(hub: Hub, health_reporter: HealthReporter) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Publish the status
    health_reporter
        .set_not_serving::<ScooterServiceServer<ScooterHubService>>()
        .await;

    // 2. End sessions and live feeds, then stop the registry
    if let Err(e) = hub.shutdown().await {
        tracing::error!("Error during hub shutdown: {e}");
    }
}
