//! The running hub: every shared component plus the order flow.
//!
//! [`Hub`] is cheap to clone and is handed to the gRPC service, the HTTP
//! router and each vehicle session.

use crate::server::{
    collab::{Collaborators, TripInfo},
    config::ServerConfig,
    dispatch::{DispatchRouter, RouteOutcome},
    registry::{Registry, SessionId},
    streaming::{bus::TelemetryBus, fanout::Fanout},
};
use core::time::Duration;
use portable_atomic::{AtomicU64, Ordering};
use scooter_core::{
    Error, Result,
    types::{DispatchCommand, Position, StationId, VehicleId},
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of [`Hub::place_order`]. A routing miss is reported here rather
/// than as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderReceipt {
    pub order_id: u64,
    pub outcome: RouteOutcome,
}

/// Counters since start, served on `GET /stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub commands_delivered: u64,
    pub commands_dropped: u64,
    pub telemetry_accepted: u64,
    pub heartbeats: u64,
    pub telemetry_dropped: u64,
    pub subscribers: usize,
    pub subscriber_lag: u64,
}

#[derive(Clone)]
pub struct Hub {
    config: ServerConfig,
    registry: Registry,
    router: Arc<DispatchRouter>,
    bus: TelemetryBus,
    fanout: Fanout,
    collaborators: Collaborators,
    shutdown: CancellationToken,
    next_session: Arc<AtomicU64>,
}

impl Hub {
    /// Spawns the registry and telemetry bus tasks.
    pub fn new(config: ServerConfig, collaborators: Collaborators) -> Self {
        let shutdown = CancellationToken::new();
        let registry = Registry::spawn(config.registry_buffer_size);
        let fanout = Fanout::new(config.subscriber_buffer_size);
        let bus = TelemetryBus::spawn(config.bus_buffer_size, fanout.clone(), shutdown.clone());

        Self {
            router: Arc::new(DispatchRouter::new(registry.clone())),
            config,
            registry,
            bus,
            fanout,
            collaborators,
            shutdown,
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn router(&self) -> &DispatchRouter {
        &self.router
    }

    pub fn stats(&self) -> HubStats {
        let bus = self.bus.stats();
        HubStats {
            commands_delivered: self.router().delivered(),
            commands_dropped: self.router().dropped(),
            telemetry_accepted: bus.accepted.load(Ordering::Relaxed),
            heartbeats: bus.heartbeats.load(Ordering::Relaxed),
            telemetry_dropped: bus.dropped.load(Ordering::Relaxed),
            subscribers: self.fanout.len(),
            subscriber_lag: self.fanout.lagged(),
        }
    }

    pub const fn bus(&self) -> &TelemetryBus {
        &self.bus
    }

    pub const fn fanout(&self) -> &Fanout {
        &self.fanout
    }

    pub const fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Cancelled once shutdown starts. Sessions run on child tokens.
    pub const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn next_session(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }

    /// Ends every session and live feed, then stops the registry. Live
    /// feeds requested after this start already ended.
    ///
    /// # Errors
    ///
    /// [`Error::ChannelError`] if the registry does not acknowledge within
    /// the configured shutdown timeout, or whatever the registry reports.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!(stats = ?self.stats(), "Hub shutting down");
        self.shutdown.cancel();
        self.fanout.close_all();

        let timeout = Duration::from_secs(self.config.shutdown_timeout);
        match tokio::time::timeout(timeout, self.registry.shutdown()).await {
            Ok(res) => res,
            Err(_) => Err(Error::ChannelError {
                context: format!("registry did not stop within {}s", timeout.as_secs()),
            }),
        }
    }

    /// Rents `scooter_id` towards `station_id` and dispatches it.
    ///
    /// # Errors
    ///
    /// Collaborator failures (unknown scooter or station included) are
    /// passed through unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn place_order(
        &self,
        scooter_id: VehicleId,
        station_id: StationId,
    ) -> Result<OrderReceipt> {
        let Collaborators { fleet, orders, .. } = &self.collaborators;

        let scooter = fleet.get_scooter_by_id(scooter_id).await?;
        let station = fleet.get_station_by_id(station_id).await?;
        let rent = fleet
            .create_scooter_status_in_rent(scooter.id, station.id)
            .await?;
        let order = orders
            .create_order(&TripInfo {
                scooter_id: scooter.id,
                status_start_id: rent.id,
                destination_station_id: station.id,
            })
            .await?;

        let outcome = self
            .router
            .route(DispatchCommand {
                vehicle_id: scooter.id,
                destination_station_id: station.id,
                destination: Position::new(station.latitude, station.longitude),
                origin: Position::new(rent.latitude, rent.longitude),
                battery_remain: rent.battery_remain,
            })
            .await;

        tracing::info!(order_id = order.id, routed = outcome.is_delivered(), "Order placed");

        Ok(OrderReceipt {
            order_id: order.id,
            outcome,
        })
    }
}
