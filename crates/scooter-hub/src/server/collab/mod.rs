//! Interfaces of the systems the hub depends on but does not own.
//!
//! - [`FleetRepository`] - scooter and station records.
//! - [`OrderService`] - order creation.
//! - [`EventLog`] - durable audit log of trip reports.
//!
//! The hub only ever talks to them through these traits. Failures are passed
//! through as [`Error::Upstream`](scooter_core::Error::Upstream) (or
//! `NotFound`) and never retried. [`memory`] provides the in-process adapters
//! the binary and the tests run against.

pub mod memory;

use scooter_core::{
    Result,
    types::{StationId, TripReport, VehicleId},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scooter {
    pub id: VehicleId,
    #[serde(default)]
    pub model: String,
    pub latitude: f64,
    pub longitude: f64,
    pub battery_remain: f64,
    #[serde(default)]
    pub can_be_rent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: StationId,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Rent record created when a scooter is handed to a trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RentStatus {
    pub id: u64,
    pub scooter_id: VehicleId,
    pub station_id: StationId,
    pub latitude: f64,
    pub longitude: f64,
    pub battery_remain: f64,
    pub created_at: u64,
}

/// What the order service needs to open an order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripInfo {
    pub scooter_id: VehicleId,
    pub status_start_id: u64,
    pub destination_station_id: StationId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: u64,
    pub scooter_id: VehicleId,
    pub status_start_id: u64,
    pub destination_station_id: StationId,
    pub created_at: u64,
}

#[tonic::async_trait]
pub trait FleetRepository: Send + Sync {
    async fn get_all_scooters(&self) -> Result<Vec<Scooter>>;

    async fn get_scooter_by_id(&self, id: VehicleId) -> Result<Scooter>;

    async fn get_all_stations(&self) -> Result<Vec<Station>>;

    async fn get_station_by_id(&self, id: StationId) -> Result<Station>;

    /// Marks the scooter as rented from `station_id` and returns the rent
    /// record.
    async fn create_scooter_status_in_rent(
        &self,
        id: VehicleId,
        station_id: StationId,
    ) -> Result<RentStatus>;

    /// Persists the final status of a trip.
    async fn send_current_status(&self, report: &TripReport) -> Result<()>;
}

#[tonic::async_trait]
pub trait OrderService: Send + Sync {
    async fn create_order(&self, trip: &TripInfo) -> Result<Order>;
}

#[tonic::async_trait]
pub trait EventLog: Send + Sync {
    /// Publishes one JSON-encoded record on `topic`.
    async fn publish(&self, topic: &str, payload: String) -> Result<()>;
}

/// The collaborators a hub is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub fleet: Arc<dyn FleetRepository>,
    pub orders: Arc<dyn OrderService>,
    pub events: Arc<dyn EventLog>,
}

impl Collaborators {
    /// In-memory collaborators seeded with `fleet`.
    pub fn in_memory(fleet: memory::MemoryFleet) -> Self {
        Self {
            fleet: Arc::new(fleet),
            orders: Arc::new(memory::MemoryOrders::default()),
            events: Arc::new(memory::TracingEventLog::default()),
        }
    }
}
