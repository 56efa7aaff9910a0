//! Fire-and-forget delivery of dispatch commands.
//!
//! [`DispatchRouter::route`] never fails. A command for a vehicle that is not
//! reachable is discarded, counted and logged; the caller learns what
//! happened from the returned [`RouteOutcome`]. Nothing is retried or
//! acknowledged.

use crate::server::{
    registry::{Registry, SessionId},
    telemetry::{increment_commands_routed, increment_routing_misses},
};
use portable_atomic::{AtomicU64, Ordering};
use scooter_core::types::DispatchCommand;
use serde::Serialize;

/// Why a command was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// No stream is bound to the vehicle.
    Unbound,
    /// A binding exists but its stream has already ended.
    ChannelClosed,
    /// The registry could not be asked (the hub is shutting down).
    RegistryUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered { session: SessionId },
    Dropped { reason: DropReason },
}

impl RouteOutcome {
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

#[derive(Debug)]
pub struct DispatchRouter {
    registry: Registry,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl DispatchRouter {
    pub const fn new(registry: Registry) -> Self {
        Self {
            registry,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Places `command` in the bound vehicle's single command slot,
    /// overwriting a command the stream has not forwarded yet.
    #[tracing::instrument(skip_all, fields(vehicle_id = command.vehicle_id, station_id = command.destination_station_id))]
    pub async fn route(&self, command: DispatchCommand) -> RouteOutcome {
        let handle = match self.registry.lookup(command.vehicle_id).await {
            Ok(Some(handle)) => handle,
            Ok(None) => return self.drop_command(DropReason::Unbound),
            Err(e) => {
                tracing::debug!("Registry lookup failed: {e}");
                return self.drop_command(DropReason::RegistryUnavailable);
            }
        };

        let session = handle.session();
        if !handle.deliver(command) {
            return self.drop_command(DropReason::ChannelClosed);
        }

        self.delivered.fetch_add(1, Ordering::Relaxed);
        increment_commands_routed();
        tracing::info!(session, "Dispatch command delivered");

        RouteOutcome::Delivered { session }
    }

    /// Commands delivered to a stream since start.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Commands discarded since start.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn drop_command(&self, reason: DropReason) -> RouteOutcome {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        increment_routing_misses();
        tracing::warn!(?reason, "Dispatch command dropped");
        RouteOutcome::Dropped { reason }
    }
}
