//! One vehicle's `Register` stream.
//!
//! [`open_session`] splits the connection into a receive loop and a send
//! loop that share a cancellation token (a child of the hub's shutdown
//! token). Either loop ending cancels the other.
//!
//! The receive loop owns the strong reference to the session's
//! [`CommandSlot`] and the registry binding. It binds on the first message
//! carrying a non-zero vehicle id, rebinds if a later message carries a
//! different one, forwards every message to the telemetry bus and unbinds
//! when the inbound side ends. The send loop forwards whatever lands in the
//! slot to the client.

use crate::server::{
    hub::Hub,
    registry::{ChannelHandle, CommandSlot, SessionId},
};
use futures::{Stream, StreamExt};
use scooter_core::{
    proto::{ClientMessage, ServerMessage},
    types::{DispatchCommand, TelemetryMessage, UNASSIGNED, VehicleId, unix_millis},
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Binding state of a session. The session is closed once its receive loop
/// returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Only keep-alives so far.
    AwaitingIdentity,
    Bound(VehicleId),
}

impl SessionState {
    const fn vehicle(self) -> Option<VehicleId> {
        match self {
            Self::AwaitingIdentity => None,
            Self::Bound(id) => Some(id),
        }
    }
}

/// Starts a session over `inbound` and returns its outbound stream.
pub fn open_session<S>(hub: &Hub, inbound: S) -> ReceiverStream<Result<ServerMessage, Status>>
where
    S: Stream<Item = Result<ClientMessage, Status>> + Send + Unpin + 'static,
{
    let session = hub.next_session();
    let token = hub.shutdown_token().child_token();
    let (slot_tx, slot_rx) = watch::channel(None);
    let (resp_tx, resp_rx) = mpsc::channel(hub.config().stream_buffer_size);

    tracing::debug!(session, "Vehicle stream opened");

    tokio::spawn(receive_loop(
        hub.clone(),
        session,
        inbound,
        Arc::new(slot_tx),
        token.clone(),
    ));
    tokio::spawn(send_loop(session, slot_rx, resp_tx, token));

    ReceiverStream::new(resp_rx)
}

async fn receive_loop<S>(
    hub: Hub,
    session: SessionId,
    mut inbound: S,
    slot: Arc<CommandSlot>,
    token: CancellationToken,
) where
    S: Stream<Item = Result<ClientMessage, Status>> + Unpin,
{
    let mut state = SessionState::AwaitingIdentity;

    loop {
        let next = tokio::select! {
            () = token.cancelled() => break,
            next = inbound.next() => next,
        };

        match next {
            Some(Ok(msg)) => {
                if msg.id != UNASSIGNED && state.vehicle() != Some(msg.id) {
                    state = rebind(&hub, session, &slot, state, msg.id).await;
                }
                hub.bus()
                    .ingest(TelemetryMessage::from_client(&msg, unix_millis()));
            }
            Some(Err(status)) => {
                tracing::warn!(session, "Vehicle stream failed: {status}");
                break;
            }
            None => {
                tracing::debug!(session, "Vehicle stream ended");
                break;
            }
        }
    }

    token.cancel();

    if let SessionState::Bound(vehicle_id) = state {
        release(&hub, session, vehicle_id).await;
    }
}

async fn send_loop(
    session: SessionId,
    mut slot_rx: watch::Receiver<Option<DispatchCommand>>,
    resp_tx: mpsc::Sender<Result<ServerMessage, Status>>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            () = resp_tx.closed() => {
                tracing::debug!(session, "Vehicle dropped the response stream");
                break;
            }
            changed = slot_rx.changed() => {
                if changed.is_err() {
                    break;
                }

                let Some(command) = slot_rx.borrow_and_update().clone() else {
                    continue;
                };

                tokio::select! {
                    () = token.cancelled() => break,
                    sent = resp_tx.send(Ok(ServerMessage::from(&command))) => {
                        if sent.is_err() {
                            break;
                        }
                        tracing::debug!(
                            session,
                            vehicle_id = command.vehicle_id,
                            station_id = command.destination_station_id,
                            "Assignment forwarded"
                        );
                    }
                }
            }
        }
    }

    token.cancel();
}

async fn rebind(
    hub: &Hub,
    session: SessionId,
    slot: &Arc<CommandSlot>,
    state: SessionState,
    vehicle_id: VehicleId,
) -> SessionState {
    if let SessionState::Bound(previous) = state {
        release(hub, session, previous).await;
    }

    match hub
        .registry()
        .bind(vehicle_id, ChannelHandle::new(session, slot))
        .await
    {
        Ok(superseded) => {
            tracing::info!(session, vehicle_id, ?superseded, "Vehicle bound");
            SessionState::Bound(vehicle_id)
        }
        Err(e) => {
            tracing::warn!(session, vehicle_id, "Failed to bind vehicle: {e}");
            SessionState::AwaitingIdentity
        }
    }
}

async fn release(hub: &Hub, session: SessionId, vehicle_id: VehicleId) {
    match hub.registry().unbind(vehicle_id, session).await {
        Ok(true) => tracing::info!(session, vehicle_id, "Vehicle unbound"),
        Ok(false) => tracing::debug!(session, vehicle_id, "Binding already superseded"),
        Err(e) => tracing::debug!(session, vehicle_id, "Unbind skipped: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{
        collab::{Collaborators, memory::MemoryFleet},
        config::ServerConfig,
    };
    use core::time::Duration;
    use scooter_core::types::Position;

    type Inbound = mpsc::Sender<Result<ClientMessage, Status>>;

    fn hub() -> Hub {
        Hub::new(
            ServerConfig::default(),
            Collaborators::in_memory(MemoryFleet::demo()),
        )
    }

    fn connect(hub: &Hub) -> (Inbound, ReceiverStream<Result<ServerMessage, Status>>) {
        let (tx, rx) = mpsc::channel(16);
        let outbound = open_session(hub, ReceiverStream::new(rx));
        (tx, outbound)
    }

    fn report(id: u64) -> ClientMessage {
        ClientMessage {
            id,
            latitude: 52.18,
            longitude: 47.17,
            battery_remain: 52.7,
        }
    }

    fn command(vehicle_id: u64, station: u64) -> DispatchCommand {
        DispatchCommand {
            vehicle_id,
            destination_station_id: station,
            destination: Position::new(59.0, 49.0),
            origin: Position::new(52.18, 47.17),
            battery_remain: 52.7,
        }
    }

    /// Polls the registry until the session bound to `vehicle_id` satisfies
    /// `done`, and returns it.
    async fn wait_until(
        hub: &Hub,
        vehicle_id: u64,
        done: impl Fn(Option<SessionId>) -> bool,
    ) -> Option<SessionId> {
        for _ in 0..200 {
            let bound = hub
                .registry()
                .lookup(vehicle_id)
                .await
                .unwrap()
                .map(|handle| handle.session());
            if done(bound) {
                return bound;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("binding of vehicle {vehicle_id} never settled");
    }

    async fn bound_session(hub: &Hub, vehicle_id: u64) -> SessionId {
        wait_until(hub, vehicle_id, |bound| bound.is_some())
            .await
            .unwrap()
    }

    async fn wait_unbound(hub: &Hub, vehicle_id: u64) {
        wait_until(hub, vehicle_id, |bound| bound.is_none()).await;
    }

    #[tokio::test]
    async fn keep_alives_do_not_bind() {
        let hub = hub();
        let (tx, _outbound) = connect(&hub);

        tx.send(Ok(report(0))).await.unwrap();
        tx.send(Ok(report(0))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(hub.registry().snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_identifying_message_binds_and_commands_flow_back() {
        let hub = hub();
        let (tx, mut outbound) = connect(&hub);

        tx.send(Ok(report(0))).await.unwrap();
        tx.send(Ok(report(7))).await.unwrap();
        bound_session(&hub, 7).await;

        assert!(hub.router().route(command(7, 3)).await.is_delivered());

        let msg = outbound.next().await.unwrap().unwrap();
        assert_eq!(msg.id, 7);
        assert_eq!(msg.station_id, 3);
        assert_eq!(msg.dest_latitude, 59.0);
        assert_eq!(msg.battery_remain, 52.7);
    }

    #[tokio::test]
    async fn eof_unbinds_and_ends_outbound() {
        let hub = hub();
        let (tx, mut outbound) = connect(&hub);

        tx.send(Ok(report(7))).await.unwrap();
        bound_session(&hub, 7).await;

        drop(tx);
        wait_unbound(&hub, 7).await;
        assert!(outbound.next().await.is_none());
        assert!(!hub.router().route(command(7, 1)).await.is_delivered());
    }

    #[tokio::test]
    async fn transport_error_closes_session() {
        let hub = hub();
        let (tx, mut outbound) = connect(&hub);

        tx.send(Ok(report(7))).await.unwrap();
        bound_session(&hub, 7).await;

        tx.send(Err(Status::unavailable("reset"))).await.unwrap();
        wait_unbound(&hub, 7).await;
        assert!(outbound.next().await.is_none());
    }

    #[tokio::test]
    async fn changed_identity_rebinds() {
        let hub = hub();
        let (tx, _outbound) = connect(&hub);

        tx.send(Ok(report(7))).await.unwrap();
        let session = bound_session(&hub, 7).await;

        tx.send(Ok(report(8))).await.unwrap();
        assert_eq!(bound_session(&hub, 8).await, session);
        wait_unbound(&hub, 7).await;
    }

    #[tokio::test]
    async fn superseded_session_leaves_newer_binding_alone() {
        let hub = hub();
        let (old_tx, _old_out) = connect(&hub);
        old_tx.send(Ok(report(7))).await.unwrap();
        let old = bound_session(&hub, 7).await;

        let (new_tx, mut new_out) = connect(&hub);
        new_tx.send(Ok(report(7))).await.unwrap();
        let new = wait_until(&hub, 7, |bound| bound.is_some_and(|s| s != old))
            .await
            .unwrap();

        drop(old_tx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bound_session(&hub, 7).await, new);

        assert!(hub.router().route(command(7, 2)).await.is_delivered());
        assert_eq!(new_out.next().await.unwrap().unwrap().station_id, 2);
    }

    #[tokio::test]
    async fn pending_command_is_overwritten() {
        let (tx, slot_rx) = watch::channel(None);
        let slot = Arc::new(tx);
        let handle = ChannelHandle::new(1, &slot);

        assert!(handle.deliver(command(7, 1)));
        assert!(handle.deliver(command(7, 2)));

        // Nothing was forwarded yet, so only the newest command is waiting.
        let (resp_tx, mut resp_rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        tokio::spawn(send_loop(1, slot_rx, resp_tx, token.clone()));

        assert_eq!(resp_rx.recv().await.unwrap().unwrap().station_id, 2);
        token.cancel();
        assert!(resp_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn telemetry_reaches_subscribers_but_keep_alives_do_not() {
        let hub = hub();
        let mut sub = hub.fanout().subscribe();
        let (tx, _outbound) = connect(&hub);

        tx.send(Ok(report(0))).await.unwrap();
        tx.send(Ok(report(5))).await.unwrap();

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.vehicle_id, 5);
        assert_eq!(msg.battery_remain, 52.7);
    }

    #[tokio::test]
    async fn hub_shutdown_closes_sessions() {
        let hub = hub();
        let (tx, mut outbound) = connect(&hub);
        tx.send(Ok(report(7))).await.unwrap();
        bound_session(&hub, 7).await;

        hub.shutdown_token().cancel();

        assert!(outbound.next().await.is_none());
    }
}
