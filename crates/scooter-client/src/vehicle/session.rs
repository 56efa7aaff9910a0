//! The vehicle's connection to the hub.
//!
//! [`run`] opens the `Register` stream, announces the configured identity
//! and then runs two loops until either ends or shutdown is requested:
//!
//! - [`receive_assignments`] stores every assignment from the hub in a
//!   single-slot watch. An assignment that arrives mid-trip replaces any
//!   earlier pending one and is driven once the current trip is over.
//! - [`Driver::run`] sends keep-alives while idle, drives each assignment
//!   and reports the finished trip through `SendCurrentStatus`.

use super::{
    config::ClientConfig,
    movement::{MovementParams, VehicleState},
    simulator::{Simulator, TelemetrySink, TripOutcome},
};
use anyhow::Context;
use core::time::Duration;
use scooter_core::{
    Result,
    proto::{ClientMessage, SendStatus, ServerMessage, scooter_service_client::ScooterServiceClient},
    types::{DispatchCommand, UNASSIGNED},
};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tonic::{Status, codec::CompressionEncoding, transport::Channel};

/// Where finished trips are reported.
#[tonic::async_trait]
pub trait TripReporter: Send {
    async fn report(&mut self, status: SendStatus) -> Result<()>;
}

#[tonic::async_trait]
impl TripReporter for ScooterServiceClient<Channel> {
    async fn report(&mut self, status: SendStatus) -> Result<()> {
        self.send_current_status(status).await?;
        Ok(())
    }
}

/// Connects to the hub and drives assignments until the stream ends or
/// `shutdown` is cancelled. Returns the vehicle's final state.
pub async fn run(config: ClientConfig, shutdown: CancellationToken) -> anyhow::Result<VehicleState> {
    let channel = Channel::from_shared(config.hub_addr.clone())?
        .connect()
        .await
        .with_context(|| format!("failed to connect to hub at {}", config.hub_addr))?;
    let mut client = ScooterServiceClient::new(channel)
        .send_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip);

    let state = VehicleState::new(config.vehicle_id, config.start, config.battery);
    let (outbound, rx) = mpsc::channel(config.outbound_buffer_size);

    // The first message carries the identity the hub binds this stream to.
    outbound
        .send(state.to_message())
        .await
        .context("outbound queue closed before registration")?;

    let inbound = client
        .register(ReceiverStream::new(rx))
        .await
        .context("failed to open vehicle stream")?
        .into_inner();
    tracing::info!(vehicle_id = state.id, hub = %config.hub_addr, "Registered with hub");

    let token = shutdown.child_token();
    let (slot, assignments) = watch::channel(None);
    let receiver = tokio::spawn(receive_assignments(inbound, slot, token.clone()));

    let simulator = Simulator::new(
        MovementParams {
            step: config.step,
            discharge: config.discharge,
        },
        config.interval,
        config.forget_on_depletion,
    );
    let driver = Driver::new(state, simulator, config.heartbeat, outbound, client);
    let state = driver.run(assignments, token.clone()).await;

    token.cancel();
    if let Err(e) = receiver.await {
        tracing::warn!("Assignment receiver panicked: {e}");
    }

    Ok(state)
}

/// Stores each assignment from `inbound` in `slot`, newest first, until the
/// stream ends.
pub async fn receive_assignments<S>(
    mut inbound: S,
    slot: watch::Sender<Option<DispatchCommand>>,
    token: CancellationToken,
) where
    S: Stream<Item = core::result::Result<ServerMessage, Status>> + Unpin,
{
    loop {
        let next = tokio::select! {
            () = token.cancelled() => break,
            next = inbound.next() => next,
        };

        match next {
            Some(Ok(msg)) => {
                let command = DispatchCommand::from(msg);
                tracing::info!(
                    vehicle_id = command.vehicle_id,
                    station_id = command.destination_station_id,
                    "Assignment received"
                );
                slot.send_replace(Some(command));
            }
            Some(Err(status)) => {
                tracing::warn!("Hub stream failed: {status}");
                break;
            }
            None => {
                tracing::info!("Hub closed the stream");
                break;
            }
        }
    }

    token.cancel();
}

/// Drives a vehicle between assignments.
pub struct Driver<S, R> {
    state: VehicleState,
    simulator: Simulator,
    heartbeat: Duration,
    sink: S,
    reporter: R,
}

impl<S: TelemetrySink, R: TripReporter> Driver<S, R> {
    pub const fn new(
        state: VehicleState,
        simulator: Simulator,
        heartbeat: Duration,
        sink: S,
        reporter: R,
    ) -> Self {
        Self {
            state,
            simulator,
            heartbeat,
            sink,
            reporter,
        }
    }

    /// Runs until `token` is cancelled or the assignment slot is dropped.
    pub async fn run(
        mut self,
        mut assignments: watch::Receiver<Option<DispatchCommand>>,
        token: CancellationToken,
    ) -> VehicleState {
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + self.heartbeat,
            self.heartbeat,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = heartbeat.tick() => self.send_keep_alive().await,
                changed = assignments.changed() => {
                    if changed.is_err() {
                        break;
                    }

                    let Some(command) = assignments.borrow_and_update().clone() else {
                        continue;
                    };

                    if !self.drive(command, &token).await {
                        break;
                    }
                    heartbeat.reset();
                }
            }
        }

        self.state
    }

    async fn send_keep_alive(&mut self) {
        let msg = ClientMessage {
            id: UNASSIGNED,
            ..self.state.to_message()
        };
        if let Err(e) = self.sink.send(msg).await {
            tracing::debug!("Keep-alive not sent: {e}");
        }
    }

    /// Drives one assignment and reports it. Returns `false` if cancelled
    /// mid-trip.
    async fn drive(&mut self, command: DispatchCommand, token: &CancellationToken) -> bool {
        self.state = VehicleState::new(command.vehicle_id, command.origin, command.battery_remain);
        self.state.assigned_station = Some(command.destination_station_id);
        tracing::info!(
            vehicle_id = command.vehicle_id,
            station_id = command.destination_station_id,
            "Trip started"
        );

        let summary = tokio::select! {
            () = token.cancelled() => return false,
            summary = self.simulator.run_trip(&mut self.state, command.destination, &mut self.sink) => summary,
        };

        match summary.outcome {
            TripOutcome::Arrived => tracing::info!(
                vehicle_id = command.vehicle_id,
                steps = summary.steps,
                "Trip finished"
            ),
            TripOutcome::Incomplete => tracing::warn!(
                vehicle_id = command.vehicle_id,
                steps = summary.steps,
                remaining = summary.remaining,
                "Trip incomplete"
            ),
        }

        let status = SendStatus {
            station_id: command.destination_station_id,
            scooter_id: command.vehicle_id,
            latitude: self.state.position.latitude,
            longitude: self.state.position.longitude,
            battery_remain: self.state.battery,
        };
        if let Err(e) = self.reporter.report(status).await {
            tracing::warn!(vehicle_id = command.vehicle_id, "Failed to report trip: {e}");
        }
        self.state.assigned_station = None;

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scooter_core::types::Position;

    #[tonic::async_trait]
    impl TripReporter for mpsc::UnboundedSender<SendStatus> {
        async fn report(&mut self, status: SendStatus) -> Result<()> {
            let _ = self.send(status);
            Ok(())
        }
    }

    type TestDriver = Driver<mpsc::Sender<ClientMessage>, mpsc::UnboundedSender<SendStatus>>;

    struct Harness {
        telemetry: mpsc::Receiver<ClientMessage>,
        reports: mpsc::UnboundedReceiver<SendStatus>,
        slot: watch::Sender<Option<DispatchCommand>>,
        token: CancellationToken,
        driver: tokio::task::JoinHandle<VehicleState>,
    }

    fn start(heartbeat: Duration) -> Harness {
        let (sink, telemetry) = mpsc::channel(1024);
        let (reporter, reports) = mpsc::unbounded_channel();
        let (slot, assignments) = watch::channel(None);
        let token = CancellationToken::new();

        let driver: TestDriver = Driver::new(
            VehicleState::new(7, Position::new(10.0, 10.0), 100.0),
            Simulator::new(MovementParams::default(), Duration::ZERO, true),
            heartbeat,
            sink,
            reporter,
        );

        Harness {
            telemetry,
            reports,
            slot,
            token: token.clone(),
            driver: tokio::spawn(driver.run(assignments, token)),
        }
    }

    fn assignment(station: u64, destination: Position) -> DispatchCommand {
        DispatchCommand {
            vehicle_id: 7,
            destination_station_id: station,
            destination,
            origin: Position::new(10.0, 10.0),
            battery_remain: 90.0,
        }
    }

    #[tokio::test]
    async fn assignment_is_driven_and_reported() {
        let mut h = start(Duration::from_secs(3600));
        let destination = Position::new(10.0003, 10.0002);

        h.slot.send_replace(Some(assignment(4, destination)));

        let report = h.reports.recv().await.unwrap();
        assert_eq!(report.station_id, 4);
        assert_eq!(report.scooter_id, 7);
        assert_eq!(report.latitude, destination.latitude);
        assert_eq!(report.longitude, destination.longitude);
        assert!((report.battery_remain - 89.7).abs() < 1e-9);

        let first = h.telemetry.recv().await.unwrap();
        assert_eq!(first.id, 7);
        assert_eq!(first.battery_remain, 90.0);

        h.token.cancel();
        let state = h.driver.await.unwrap();
        assert_eq!(state.position, destination);
        assert_eq!(state.assigned_station, None);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_vehicle_sends_keep_alives() {
        let mut h = start(Duration::from_secs(3));

        let keep_alive = h.telemetry.recv().await.unwrap();
        assert_eq!(keep_alive.id, UNASSIGNED);
        assert_eq!(keep_alive.battery_remain, 100.0);

        let again = h.telemetry.recv().await.unwrap();
        assert_eq!(again.id, UNASSIGNED);

        h.token.cancel();
        h.driver.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_slot_stops_the_driver() {
        let h = start(Duration::from_secs(3600));
        drop(h.slot);

        let state = h.driver.await.unwrap();
        assert_eq!(state.id, 7);
    }

    #[tokio::test]
    async fn newest_assignment_wins() {
        let (tx, rx) = mpsc::channel(4);
        let (slot, mut assignments) = watch::channel(None);
        let token = CancellationToken::new();

        for station in [1, 2] {
            tx.send(Ok(ServerMessage::from(&assignment(
                station,
                Position::new(11.0, 11.0),
            ))))
            .await
            .unwrap();
        }
        drop(tx);

        receive_assignments(ReceiverStream::new(rx), slot, token.clone()).await;

        let latest = assignments.borrow_and_update().clone().unwrap();
        assert_eq!(latest.destination_station_id, 2);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn hub_error_ends_receiver() {
        let (tx, rx) = mpsc::channel(4);
        let (slot, _assignments) = watch::channel(None);
        let token = CancellationToken::new();

        tx.send(Err(Status::unavailable("hub gone"))).await.unwrap();

        receive_assignments(ReceiverStream::new(rx), slot, token.clone()).await;
        assert!(token.is_cancelled());
    }
}
