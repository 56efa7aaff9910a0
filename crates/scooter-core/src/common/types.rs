//! # Domain values shared by the hub and the vehicles
//!
//! Wire messages are the prost types in [`crate::proto`]. The hub works with
//! the plain values defined here and converts at the edge:
//!
//! - [`TelemetryMessage`] - one position/battery report, JSON-encoded for
//!   the live feed.
//! - [`DispatchCommand`] - a destination pushed to one vehicle, sent as a
//!   [`ServerMessage`].
//! - [`TripReport`] - the final status of a trip, sent as [`SendStatus`] and
//!   published to the event log as JSON.

use crate::proto::{ClientMessage, SendStatus, ServerMessage};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Integer identity of a vehicle.
pub type VehicleId = u64;

/// Integer identity of a docking station.
pub type StationId = u64;

/// Identity of a vehicle that has not been assigned one (or has forgotten
/// it). Messages carrying it are keep-alives.
pub const UNASSIGNED: VehicleId = 0;

/// A point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Planar distance in degrees.
    pub fn distance_to(&self, other: Position) -> f64 {
        (other.latitude - self.latitude).hypot(other.longitude - self.longitude)
    }
}

/// Milliseconds since the Unix epoch, saturating at `u64::MAX`.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(millis)
        .unwrap_or_default()
}

fn millis(d: core::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// One position/battery report from a vehicle.
///
/// Produced once per simulator step and stamped by the hub when it is
/// ingested. The JSON form is the body of each live feed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMessage {
    pub vehicle_id: VehicleId,
    pub latitude: f64,
    pub longitude: f64,
    pub battery_remain: f64,
    pub timestamp: u64,
}

impl TelemetryMessage {
    pub fn from_client(msg: &ClientMessage, timestamp: u64) -> Self {
        Self {
            vehicle_id: msg.id,
            latitude: msg.latitude,
            longitude: msg.longitude,
            battery_remain: msg.battery_remain,
            timestamp,
        }
    }

    /// Keep-alives carry the unassigned identity and are never forwarded.
    pub const fn is_heartbeat(&self) -> bool {
        self.vehicle_id == UNASSIGNED
    }

    pub const fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }
}

/// A destination assignment for one vehicle.
///
/// Alongside the destination it carries the vehicle's last persisted
/// position and charge; the vehicle adopts them when the assignment lands.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchCommand {
    pub vehicle_id: VehicleId,
    pub destination_station_id: StationId,
    pub destination: Position,
    pub origin: Position,
    pub battery_remain: f64,
}

impl From<&DispatchCommand> for ServerMessage {
    fn from(cmd: &DispatchCommand) -> Self {
        ServerMessage {
            id: cmd.vehicle_id,
            latitude: cmd.origin.latitude,
            longitude: cmd.origin.longitude,
            battery_remain: cmd.battery_remain,
            station_id: cmd.destination_station_id,
            dest_latitude: cmd.destination.latitude,
            dest_longitude: cmd.destination.longitude,
        }
    }
}

impl From<ServerMessage> for DispatchCommand {
    fn from(msg: ServerMessage) -> Self {
        Self {
            vehicle_id: msg.id,
            destination_station_id: msg.station_id,
            destination: Position::new(msg.dest_latitude, msg.dest_longitude),
            origin: Position::new(msg.latitude, msg.longitude),
            battery_remain: msg.battery_remain,
        }
    }
}

/// Final status of a trip, reported by the vehicle and recorded for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripReport {
    pub station_id: StationId,
    pub scooter_id: VehicleId,
    pub latitude: f64,
    pub longitude: f64,
    pub battery_remain: f64,
}

impl From<SendStatus> for TripReport {
    fn from(status: SendStatus) -> Self {
        Self {
            station_id: status.station_id,
            scooter_id: status.scooter_id,
            latitude: status.latitude,
            longitude: status.longitude,
            battery_remain: status.battery_remain,
        }
    }
}

impl From<&TripReport> for SendStatus {
    fn from(report: &TripReport) -> Self {
        SendStatus {
            station_id: report.station_id,
            scooter_id: report.scooter_id,
            latitude: report.latitude,
            longitude: report.longitude,
            battery_remain: report.battery_remain,
        }
    }
}
