use anyhow::bail;
use clap::Parser;
use std::path::PathBuf;

/// Runtime configuration for the `scooter-hub` binary.
///
/// These settings control where the hub listens and how deep its internal
/// queues are. All values are parsed from CLI arguments or environment
/// variables (a `.env` file is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "scooter-hub",
    version,
    about = "Dispatch hub for a fleet of connected scooters"
)]
pub struct CliArgs {
    /// Address of the gRPC listener vehicles connect to.
    ///
    /// Environment variable: `GRPC_ADDR`
    #[arg(long, env = "GRPC_ADDR", default_value_t = String::from("0.0.0.0:9000"))]
    pub grpc_addr: String,

    /// Address of the HTTP listener serving the live feed and order
    /// endpoints.
    ///
    /// Environment variable: `HTTP_ADDR`
    #[arg(long, env = "HTTP_ADDR", default_value_t = String::from("0.0.0.0:8085"))]
    pub http_addr: String,

    /// Capacity of the registry's request queue.
    ///
    /// Environment variable: `REGISTRY_BUFFER_SIZE`
    #[arg(long, env = "REGISTRY_BUFFER_SIZE", default_value_t = 256)]
    pub registry_buffer_size: usize,

    /// Capacity of the shared telemetry queue. Telemetry arriving while it
    /// is full is dropped.
    ///
    /// Environment variable: `BUS_BUFFER_SIZE`
    #[arg(long, env = "BUS_BUFFER_SIZE", default_value_t = 4096)]
    pub bus_buffer_size: usize,

    /// Capacity of each live feed subscriber's queue. A subscriber that
    /// falls this far behind misses messages until it catches up.
    ///
    /// Environment variable: `SUBSCRIBER_BUFFER_SIZE`
    #[arg(long, env = "SUBSCRIBER_BUFFER_SIZE", default_value_t = 64)]
    pub subscriber_buffer_size: usize,

    /// Capacity of the outbound buffer of each vehicle stream.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Seconds to wait for the registry to acknowledge shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Event log topic trip reports are published to.
    ///
    /// Environment variable: `EVENT_TOPIC`
    #[arg(long, env = "EVENT_TOPIC", default_value_t = String::from("order"))]
    pub event_topic: String,

    /// JSON fixture seeding the in-memory fleet (scooters and stations).
    /// A small demo fleet is used when unset.
    ///
    /// Environment variable: `FLEET_FILE`
    #[arg(long, env = "FLEET_FILE")]
    pub fleet_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub grpc_addr: String,
    pub http_addr: String,
    pub registry_buffer_size: usize,
    pub bus_buffer_size: usize,
    pub subscriber_buffer_size: usize,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: u64,
    pub event_topic: String,
    pub fleet_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: "0.0.0.0:9000".to_string(),
            http_addr: "0.0.0.0:8085".to_string(),
            registry_buffer_size: 256,
            bus_buffer_size: 4096,
            subscriber_buffer_size: 64,
            stream_buffer_size: 8,
            shutdown_timeout: 3,
            event_topic: "order".to_string(),
            fleet_file: None,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        for (name, value) in [
            ("REGISTRY_BUFFER_SIZE", args.registry_buffer_size),
            ("BUS_BUFFER_SIZE", args.bus_buffer_size),
            ("SUBSCRIBER_BUFFER_SIZE", args.subscriber_buffer_size),
            ("STREAM_BUFFER_SIZE", args.stream_buffer_size),
        ] {
            if value == 0 {
                bail!("{name} must be greater than 0");
            }
        }

        if args.grpc_addr == args.http_addr {
            bail!(
                "GRPC_ADDR and HTTP_ADDR must differ (both are {})",
                args.grpc_addr
            );
        }

        if args.event_topic.trim().is_empty() {
            bail!("EVENT_TOPIC must not be empty");
        }

        Ok(Self {
            grpc_addr: args.grpc_addr,
            http_addr: args.http_addr,
            registry_buffer_size: args.registry_buffer_size,
            bus_buffer_size: args.bus_buffer_size,
            subscriber_buffer_size: args.subscriber_buffer_size,
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: args.shutdown_timeout,
            event_topic: args.event_topic,
            fleet_file: args.fleet_file,
        })
    }
}
