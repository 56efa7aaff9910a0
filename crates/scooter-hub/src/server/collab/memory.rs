use super::{
    EventLog, FleetRepository, Order, OrderService, RentStatus, Scooter, Station, TripInfo,
};
use anyhow::Context;
use parking_lot::{Mutex, RwLock};
use portable_atomic::{AtomicU64, Ordering};
use scooter_core::{
    Error, Result,
    types::{StationId, TripReport, VehicleId, unix_millis},
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Shape of a `FLEET_FILE` fixture.
#[derive(Debug, Default, Deserialize)]
pub struct FleetFixture {
    #[serde(default)]
    pub scooters: Vec<Scooter>,
    #[serde(default)]
    pub stations: Vec<Station>,
}

/// Fleet records held in process memory.
#[derive(Debug, Default)]
pub struct MemoryFleet {
    scooters: RwLock<BTreeMap<VehicleId, Scooter>>,
    stations: RwLock<BTreeMap<StationId, Station>>,
    statuses: Mutex<Vec<TripReport>>,
    next_rent_id: AtomicU64,
}

impl MemoryFleet {
    pub fn new(fixture: FleetFixture) -> Self {
        Self {
            scooters: RwLock::new(fixture.scooters.into_iter().map(|s| (s.id, s)).collect()),
            stations: RwLock::new(fixture.stations.into_iter().map(|s| (s.id, s)).collect()),
            statuses: Mutex::new(Vec::new()),
            next_rent_id: AtomicU64::new(1),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fleet file {}", path.display()))?;
        let fixture: FleetFixture = serde_json::from_str(&raw)
            .with_context(|| format!("invalid fleet file {}", path.display()))?;
        Ok(Self::new(fixture))
    }

    /// A handful of scooters and stations for local runs.
    pub fn demo() -> Self {
        let scooter = |id, latitude, longitude, battery_remain| Scooter {
            id,
            model: "demo".to_string(),
            latitude,
            longitude,
            battery_remain,
            can_be_rent: true,
        };
        let station = |id, name: &str, latitude, longitude| Station {
            id,
            name: name.to_string(),
            latitude,
            longitude,
        };

        Self::new(FleetFixture {
            scooters: vec![
                scooter(1, 48.4647, 35.0462, 100.0),
                scooter(2, 48.4680, 35.0400, 80.0),
                scooter(3, 48.4500, 35.0600, 52.7),
            ],
            stations: vec![
                station(1, "Central", 48.4660, 35.0450),
                station(2, "Riverside", 48.4620, 35.0510),
            ],
        })
    }

    /// Trip reports recorded through [`FleetRepository::send_current_status`].
    #[cfg(test)]
    pub fn statuses(&self) -> Vec<TripReport> {
        self.statuses.lock().clone()
    }
}

#[tonic::async_trait]
impl FleetRepository for MemoryFleet {
    async fn get_all_scooters(&self) -> Result<Vec<Scooter>> {
        Ok(self.scooters.read().values().cloned().collect())
    }

    async fn get_scooter_by_id(&self, id: VehicleId) -> Result<Scooter> {
        self.scooters
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                what: format!("scooter {id}"),
            })
    }

    async fn get_all_stations(&self) -> Result<Vec<Station>> {
        Ok(self.stations.read().values().cloned().collect())
    }

    async fn get_station_by_id(&self, id: StationId) -> Result<Station> {
        self.stations
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                what: format!("station {id}"),
            })
    }

    async fn create_scooter_status_in_rent(
        &self,
        id: VehicleId,
        station_id: StationId,
    ) -> Result<RentStatus> {
        let mut scooters = self.scooters.write();
        let scooter = scooters.get_mut(&id).ok_or_else(|| Error::NotFound {
            what: format!("scooter {id}"),
        })?;
        scooter.can_be_rent = false;

        Ok(RentStatus {
            id: self.next_rent_id.fetch_add(1, Ordering::Relaxed),
            scooter_id: id,
            station_id,
            latitude: scooter.latitude,
            longitude: scooter.longitude,
            battery_remain: scooter.battery_remain,
            created_at: unix_millis(),
        })
    }

    async fn send_current_status(&self, report: &TripReport) -> Result<()> {
        if let Some(scooter) = self.scooters.write().get_mut(&report.scooter_id) {
            scooter.latitude = report.latitude;
            scooter.longitude = report.longitude;
            scooter.battery_remain = report.battery_remain;
            scooter.can_be_rent = true;
        }
        self.statuses.lock().push(report.clone());
        Ok(())
    }
}

/// Order service that numbers orders in memory.
#[derive(Debug)]
pub struct MemoryOrders {
    next_id: AtomicU64,
    orders: Mutex<Vec<Order>>,
}

impl Default for MemoryOrders {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            orders: Mutex::new(Vec::new()),
        }
    }
}

impl MemoryOrders {
    #[cfg(test)]
    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().clone()
    }
}

#[tonic::async_trait]
impl OrderService for MemoryOrders {
    async fn create_order(&self, trip: &TripInfo) -> Result<Order> {
        let order = Order {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            scooter_id: trip.scooter_id,
            status_start_id: trip.status_start_id,
            destination_station_id: trip.destination_station_id,
            created_at: unix_millis(),
        };
        self.orders.lock().push(order.clone());
        Ok(order)
    }
}

/// Event log that writes each record to the `event_log` tracing target and
/// keeps it in memory.
#[derive(Debug, Default)]
pub struct TracingEventLog {
    published: Mutex<Vec<(String, String)>>,
}

impl TracingEventLog {
    #[cfg(test)]
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }
}

#[tonic::async_trait]
impl EventLog for TracingEventLog {
    async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        tracing::info!(target: "event_log", topic, %payload, "Event published");
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }
}
