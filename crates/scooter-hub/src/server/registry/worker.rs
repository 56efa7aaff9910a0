use super::{RegistryEntry, request::RegistryRequest};
use crate::server::telemetry::{decrement_vehicles_bound, increment_vehicles_bound};
use scooter_core::types::{VehicleId, unix_millis};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Task owning the vehicle table.
///
/// The table is never shared: every lookup and mutation arrives as a
/// [`RegistryRequest`] and is applied in arrival order. The loop runs until a
/// [`RegistryRequest::Shutdown`] is received or every [`Registry`] handle is
/// dropped.
///
/// # Request Types
///
/// - [`RegistryRequest::Bind`] - last writer wins; the superseded session is
///   reported back so the caller can log it.
/// - [`RegistryRequest::Unbind`] - only removes an entry still owned by the
///   calling session, which makes it idempotent and keeps a stale connection
///   from evicting its successor.
///
/// [`Registry`]: super::Registry
pub async fn registry_loop(mut rx: mpsc::Receiver<RegistryRequest>) {
    tracing::trace!("Registry started");

    let mut entries: HashMap<VehicleId, RegistryEntry> = HashMap::new();

    while let Some(request) = rx.recv().await {
        match request {
            RegistryRequest::Bind {
                vehicle_id,
                handle,
                response,
            } => {
                let session = handle.session();
                let previous = entries.insert(
                    vehicle_id,
                    RegistryEntry {
                        vehicle_id,
                        handle,
                        bound_at: unix_millis(),
                    },
                );

                let superseded = match previous {
                    Some(previous) => {
                        tracing::info!(
                            vehicle_id,
                            session,
                            superseded = previous.handle.session(),
                            "Vehicle rebound to a new stream"
                        );
                        Some(previous.handle.session())
                    }
                    None => {
                        increment_vehicles_bound();
                        tracing::info!(vehicle_id, session, "Vehicle bound");
                        None
                    }
                };

                let _ = response.send(superseded);
            }
            RegistryRequest::Lookup {
                vehicle_id,
                response,
            } => {
                let _ = response.send(entries.get(&vehicle_id).map(|e| e.handle.clone()));
            }
            RegistryRequest::Unbind {
                vehicle_id,
                session,
                response,
            } => {
                let owned = entries
                    .get(&vehicle_id)
                    .is_some_and(|e| e.handle.session() == session);

                if owned {
                    entries.remove(&vehicle_id);
                    decrement_vehicles_bound();
                    tracing::info!(vehicle_id, session, "Vehicle unbound");
                } else {
                    tracing::trace!(vehicle_id, session, "Unbind ignored, not the owner");
                }

                let _ = response.send(owned);
            }
            RegistryRequest::Snapshot { response } => {
                let mut snapshot: Vec<RegistryEntry> = entries.values().cloned().collect();
                snapshot.sort_by_key(|e| e.vehicle_id);
                let _ = response.send(snapshot);
            }
            RegistryRequest::Shutdown { response } => {
                tracing::debug!(bound = entries.len(), "Registry received shutdown signal");

                if response.send(()).is_err() {
                    tracing::error!("Registry failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    tracing::trace!("Registry stopped");
}
