//! gRPC service implementation for vehicle streams and trip reports.
//!
//! [`ScooterHubService`] implements every method of the generated
//! [`ScooterService`] trait:
//!
//! - `Register` - bidirectional vehicle stream, see
//!   [`open_session`](crate::server::streaming::session::open_session).
//! - `Receive` - telemetry-only client stream, acknowledged on EOF.
//! - `SendCurrentStatus` - persists a finished trip and publishes it to the
//!   event log.

use crate::server::{hub::Hub, streaming::session::open_session};
use core::pin::Pin;
use futures::StreamExt;
use scooter_core::{
    Error,
    proto::{Ack, ClientMessage, SendStatus, ServerMessage, scooter_service_server::ScooterService},
    types::{TelemetryMessage, TripReport, unix_millis},
};
use tokio_stream::Stream;
use tonic::{Request, Response, Status, Streaming};

#[derive(Clone)]
pub struct ScooterHubService {
    hub: Hub,
}

impl ScooterHubService {
    pub const fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

#[tonic::async_trait]
impl ScooterService for ScooterHubService {
    type RegisterStream = VehicleStream;

    #[tracing::instrument(skip_all)]
    async fn register(
        &self,
        req: Request<Streaming<ClientMessage>>,
    ) -> Result<Response<Self::RegisterStream>, Status> {
        let outbound = register_vehicle(&self.hub, req.into_inner())?;
        Ok(Response::new(outbound))
    }

    #[tracing::instrument(skip_all)]
    async fn receive(
        &self,
        req: Request<Streaming<ClientMessage>>,
    ) -> Result<Response<Ack>, Status> {
        ingest_telemetry(&self.hub, req.into_inner()).await?;
        Ok(Response::new(Ack {}))
    }

    #[tracing::instrument(skip_all, fields(scooter_id = req.get_ref().scooter_id, station_id = req.get_ref().station_id))]
    async fn send_current_status(
        &self,
        req: Request<SendStatus>,
    ) -> Result<Response<Ack>, Status> {
        let report = TripReport::from(req.into_inner());
        let collaborators = self.hub.collaborators();

        collaborators.fleet.send_current_status(&report).await?;

        let payload = serde_json::to_string(&report).map_err(|e| Error::Upstream {
            context: format!("failed to encode trip report: {e}"),
        })?;
        collaborators
            .events
            .publish(&self.hub.config().event_topic, payload)
            .await?;

        tracing::info!(battery_remain = report.battery_remain, "Trip status recorded");
        Ok(Response::new(Ack {}))
    }
}

type VehicleStream = Pin<Box<dyn Stream<Item = Result<ServerMessage, Status>> + Send>>;

/// Opens a vehicle session on `inbound` unless the hub is shutting down.
fn register_vehicle<S>(hub: &Hub, inbound: S) -> Result<VehicleStream, Status>
where
    S: Stream<Item = Result<ClientMessage, Status>> + Send + Unpin + 'static,
{
    if hub.shutdown_token().is_cancelled() {
        return Err(Error::ServiceShutdown.into());
    }

    Ok(Box::pin(open_session(hub, inbound)))
}

/// Feeds every message of `inbound` to the telemetry bus without binding a
/// vehicle. Returns how many messages were read once the stream ends.
async fn ingest_telemetry<S>(hub: &Hub, mut inbound: S) -> Result<u64, Status>
where
    S: Stream<Item = Result<ClientMessage, Status>> + Unpin,
{
    let shutdown = hub.shutdown_token();
    let mut received = 0_u64;

    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => return Err(Error::ServiceShutdown.into()),
            next = inbound.next() => next,
        };

        match next {
            Some(Ok(msg)) => {
                received += 1;
                hub.bus().ingest(TelemetryMessage::from_client(&msg, unix_millis()));
            }
            Some(Err(status)) => {
                tracing::warn!(received, "Telemetry stream failed: {status}");
                return Err(status);
            }
            None => break,
        }
    }

    tracing::debug!(received, "Telemetry stream completed");
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{
        collab::{
            Collaborators,
            memory::{MemoryFleet, TracingEventLog},
        },
        config::ServerConfig,
    };
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    fn hub() -> Hub {
        Hub::new(
            ServerConfig::default(),
            Collaborators::in_memory(MemoryFleet::demo()),
        )
    }

    fn telemetry(id: u64) -> ClientMessage {
        ClientMessage {
            id,
            latitude: 48.4647,
            longitude: 35.0462,
            battery_remain: 80.0,
        }
    }

    #[tokio::test]
    async fn receive_feeds_subscribers_without_binding() {
        let hub = hub();
        let mut sub = hub.fanout().subscribe();
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(telemetry(0))).await.unwrap();
        tx.send(Ok(telemetry(5))).await.unwrap();
        drop(tx);

        let received = ingest_telemetry(&hub, ReceiverStream::new(rx)).await.unwrap();

        assert_eq!(received, 2);
        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.vehicle_id, 5);
        assert_eq!(msg.battery_remain, 80.0);
        assert!(hub.registry().snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn receive_returns_the_stream_error() {
        let hub = hub();
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(telemetry(5))).await.unwrap();
        tx.send(Err(Status::data_loss("connection reset"))).await.unwrap();

        let err = ingest_telemetry(&hub, ReceiverStream::new(rx)).await.unwrap_err();

        assert_eq!(err.code(), tonic::Code::DataLoss);
        assert_eq!(hub.stats().telemetry_accepted, 1);
    }

    #[tokio::test]
    async fn receive_stops_on_shutdown() {
        let hub = hub();
        let (_tx, rx) = mpsc::channel::<Result<ClientMessage, Status>>(4);
        hub.shutdown().await.unwrap();

        let err = ingest_telemetry(&hub, ReceiverStream::new(rx)).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn register_is_refused_during_shutdown() {
        let hub = hub();
        hub.shutdown().await.unwrap();
        let (_tx, rx) = mpsc::channel::<Result<ClientMessage, Status>>(4);

        let err = register_vehicle(&hub, ReceiverStream::new(rx)).err().unwrap();
        assert_eq!(err.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn trip_report_is_persisted_and_published() {
        let fleet = Arc::new(MemoryFleet::demo());
        let events = Arc::new(TracingEventLog::default());
        let collaborators = Collaborators {
            fleet: fleet.clone(),
            events: events.clone(),
            ..Collaborators::in_memory(MemoryFleet::demo())
        };
        let service = ScooterHubService::new(Hub::new(ServerConfig::default(), collaborators));

        service
            .send_current_status(Request::new(SendStatus {
                station_id: 2,
                scooter_id: 1,
                latitude: 48.4620,
                longitude: 35.0510,
                battery_remain: 97.5,
            }))
            .await
            .unwrap();

        assert_eq!(fleet.statuses().len(), 1);

        let published = events.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "order");
        let record: serde_json::Value = serde_json::from_str(&published[0].1).unwrap();
        assert_eq!(record["scooterId"], 1);
        assert_eq!(record["stationId"], 2);
        assert_eq!(record["batteryRemain"], 97.5);
    }
}
