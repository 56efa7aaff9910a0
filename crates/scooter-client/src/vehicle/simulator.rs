//! Drives one trip from the vehicle's position to a destination.

use super::movement::{Heading, MovementParams, VehicleState, advance};
use core::time::Duration;
use scooter_core::{
    Error, Result,
    proto::ClientMessage,
    types::{Position, UNASSIGNED},
};
use tokio::sync::mpsc;

/// Where each step's telemetry goes.
#[tonic::async_trait]
pub trait TelemetrySink: Send {
    async fn send(&mut self, msg: ClientMessage) -> Result<()>;
}

#[tonic::async_trait]
impl TelemetrySink for mpsc::Sender<ClientMessage> {
    async fn send(&mut self, msg: ClientMessage) -> Result<()> {
        mpsc::Sender::send(self, msg)
            .await
            .map_err(|_| Error::ChannelError {
                context: "outbound telemetry stream closed".to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripOutcome {
    /// The vehicle is on the destination.
    Arrived,
    /// The battery ran out first.
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripSummary {
    pub outcome: TripOutcome,
    pub steps: u64,
    /// Distance left to the destination, in degrees.
    pub remaining: f64,
}

#[derive(Debug, Clone)]
pub struct Simulator {
    params: MovementParams,
    interval: Duration,
    forget_on_depletion: bool,
}

impl Simulator {
    pub const fn new(params: MovementParams, interval: Duration, forget_on_depletion: bool) -> Self {
        Self {
            params,
            interval,
            forget_on_depletion,
        }
    }

    /// Moves `state` towards `destination` until it arrives or the battery
    /// runs out.
    ///
    /// Every step reports the state to `sink` before moving; a failed report
    /// is logged and the trip goes on. On arrival the position is snapped
    /// onto the destination.
    pub async fn run_trip<S: TelemetrySink>(
        &self,
        state: &mut VehicleState,
        destination: Position,
        sink: &mut S,
    ) -> TripSummary {
        let mut steps = 0;

        loop {
            let heading = Heading::towards(state.position, destination, self.params.step);

            if heading.is_arrived() {
                state.position = destination;
                tracing::info!(vehicle_id = state.id, steps, battery = state.battery, "Arrived");
                return TripSummary {
                    outcome: TripOutcome::Arrived,
                    steps,
                    remaining: 0.0,
                };
            }

            if state.is_depleted() {
                let remaining = state.position.distance_to(destination);
                tracing::warn!(vehicle_id = state.id, steps, remaining, "Battery depleted before arrival");
                if self.forget_on_depletion {
                    state.id = UNASSIGNED;
                }
                return TripSummary {
                    outcome: TripOutcome::Incomplete,
                    steps,
                    remaining,
                };
            }

            if let Err(e) = sink.send(state.to_message()).await {
                tracing::warn!(vehicle_id = state.id, "Failed to send telemetry: {e}");
            }

            advance(state, heading, &self.params);
            steps += 1;

            if !self.interval.is_zero() {
                tokio::time::sleep(self.interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collects every message in memory.
    #[derive(Default)]
    struct Recorder(Vec<ClientMessage>);

    #[tonic::async_trait]
    impl TelemetrySink for Recorder {
        async fn send(&mut self, msg: ClientMessage) -> Result<()> {
            self.0.push(msg);
            Ok(())
        }
    }

    struct Broken;

    #[tonic::async_trait]
    impl TelemetrySink for Broken {
        async fn send(&mut self, _msg: ClientMessage) -> Result<()> {
            Err(Error::ChannelError {
                context: "gone".to_string(),
            })
        }
    }

    fn simulator(forget_on_depletion: bool) -> Simulator {
        Simulator::new(MovementParams::default(), Duration::ZERO, forget_on_depletion)
    }

    #[tokio::test]
    async fn depleted_before_long_trip() {
        let mut state = VehicleState::new(7, Position::new(52.18, 47.17), 52.7);
        let destination = Position::new(59.0, 49.0);
        let mut sink = Recorder::default();

        let summary = simulator(true)
            .run_trip(&mut state, destination, &mut sink)
            .await;

        assert_eq!(summary.outcome, TripOutcome::Incomplete);
        assert!(summary.remaining > 0.0);
        assert!(state.battery <= 0.0);
        assert!(state.position.latitude < 59.0);
        assert!(state.position.longitude <= 49.0);
        assert_eq!(state.id, UNASSIGNED);

        // 527 steps of 0.1 empty a 52.7 charge.
        assert_eq!(summary.steps, 527);
        assert_eq!(sink.0.len(), 527);
        assert_eq!(sink.0[0].id, 7);
        assert_eq!(sink.0[0].battery_remain, 52.7);
        assert!(sink.0.windows(2).all(|w| w[1].battery_remain < w[0].battery_remain));
    }

    #[tokio::test]
    async fn depletion_keeps_identity_when_configured() {
        let mut state = VehicleState::new(7, Position::new(52.18, 47.17), 0.3);

        let summary = simulator(false)
            .run_trip(&mut state, Position::new(59.0, 49.0), &mut Recorder::default())
            .await;

        assert_eq!(summary.outcome, TripOutcome::Incomplete);
        assert_eq!(state.id, 7);
    }

    #[tokio::test]
    async fn converges_on_destination() {
        let start = Position::new(48.4647, 35.0462);
        let destination = Position::new(48.4620, 35.0510);
        let mut state = VehicleState::new(1, start, 100.0);
        let mut sink = Recorder::default();

        let summary = simulator(true)
            .run_trip(&mut state, destination, &mut sink)
            .await;

        assert_eq!(summary.outcome, TripOutcome::Arrived);
        assert_eq!(state.position, destination);
        assert_eq!(state.id, 1);

        // 27 diagonal steps close latitude, 21 more close longitude.
        assert_eq!(summary.steps, 48);
        let expected = 100.0 - 0.1 * summary.steps as f64;
        assert!((state.battery - expected).abs() < 1e-9);

        // L-shaped: diagonal first, then due east only.
        let last = sink.0.last().unwrap();
        assert!((last.latitude - destination.latitude).abs() < 0.00005);
        assert!(last.longitude < destination.longitude);
    }

    #[tokio::test]
    async fn battery_drops_by_one_discharge_per_step() {
        let mut state = VehicleState::new(1, Position::new(10.0, 10.0), 80.0);
        let mut sink = Recorder::default();

        simulator(true)
            .run_trip(&mut state, Position::new(10.001, 9.999), &mut sink)
            .await;

        for pair in sink.0.windows(2) {
            assert!((pair[0].battery_remain - pair[1].battery_remain - 0.1).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn already_there_takes_no_steps() {
        let here = Position::new(48.0, 35.0);
        let mut state = VehicleState::new(1, here, 10.0);
        let mut sink = Recorder::default();

        let summary = simulator(true).run_trip(&mut state, here, &mut sink).await;

        assert_eq!(summary.outcome, TripOutcome::Arrived);
        assert_eq!(summary.steps, 0);
        assert!(sink.0.is_empty());
        assert_eq!(state.battery, 10.0);
    }

    #[tokio::test]
    async fn send_failures_do_not_stop_the_trip() {
        let mut state = VehicleState::new(1, Position::new(10.0, 10.0), 80.0);

        let summary = simulator(true)
            .run_trip(&mut state, Position::new(10.0005, 10.0), &mut Broken)
            .await;

        assert_eq!(summary.outcome, TripOutcome::Arrived);
        assert_eq!(summary.steps, 5);
    }

    #[tokio::test]
    async fn channel_sink_forwards_messages() {
        let (mut tx, mut rx) = mpsc::channel(4);
        let mut state = VehicleState::new(3, Position::new(10.0, 10.0), 80.0);

        simulator(true)
            .run_trip(&mut state, Position::new(10.0002, 10.0), &mut tx)
            .await;

        assert_eq!(rx.recv().await.unwrap().latitude, 10.0);
        assert!((rx.recv().await.unwrap().latitude - 10.0001).abs() < 1e-12);
    }
}
