//! Vehicle registry: which vehicle is reachable over which stream.
//!
//! The table is owned by a single task ([`worker::registry_loop`]); the
//! cloneable [`Registry`] handle turns each operation into a
//! [`request::RegistryRequest`] and awaits the reply.
//!
//! Entries hold a [`ChannelHandle`], a weak reference to the command slot of
//! a vehicle's stream. The strong reference belongs to the stream's receive
//! loop, so a handle whose stream has ended can no longer deliver even if
//! its entry has not been removed yet.

mod request;
mod worker;


use request::RegistryRequest;
use scooter_core::{
    Error, Result,
    types::{DispatchCommand, UNASSIGNED, VehicleId},
};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, watch};

/// Identity of one vehicle stream, unique for the lifetime of the hub.
pub type SessionId = u64;

/// Single pending command of a vehicle stream. Sending overwrites a command
/// the stream has not yet forwarded.
pub type CommandSlot = watch::Sender<Option<DispatchCommand>>;

/// Weak handle to a vehicle stream's [`CommandSlot`].
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    session: SessionId,
    slot: Weak<CommandSlot>,
}

impl ChannelHandle {
    pub fn new(session: SessionId, slot: &Arc<CommandSlot>) -> Self {
        Self {
            session,
            slot: Arc::downgrade(slot),
        }
    }

    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// Places `command` in the stream's slot.
    ///
    /// Returns `false` when the stream is gone: its receive loop has exited
    /// or its send loop no longer listens.
    pub fn deliver(&self, command: DispatchCommand) -> bool {
        match self.slot.upgrade() {
            Some(slot) => slot.send(Some(command)).is_ok(),
            None => false,
        }
    }
}

/// One bound vehicle.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub vehicle_id: VehicleId,
    pub handle: ChannelHandle,
    /// Unix epoch milliseconds.
    pub bound_at: u64,
}

/// Cloneable handle to the registry task.
#[derive(Debug, Clone)]
pub struct Registry {
    tx: mpsc::Sender<RegistryRequest>,
}

impl Registry {
    /// Spawns the registry task with a request queue of `buffer` slots.
    pub fn spawn(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        tokio::spawn(worker::registry_loop(rx));
        Self { tx }
    }

    /// Binds `vehicle_id` to `handle`, returning the superseded session.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] for the unassigned identity.
    /// - [`Error::ServiceShutdown`] once the registry task has stopped.
    pub async fn bind(
        &self,
        vehicle_id: VehicleId,
        handle: ChannelHandle,
    ) -> Result<Option<SessionId>> {
        if vehicle_id == UNASSIGNED {
            return Err(Error::InvalidRequest {
                reason: "vehicle id 0 is reserved for unassigned vehicles".to_string(),
            });
        }

        self.call(|response| RegistryRequest::Bind {
            vehicle_id,
            handle,
            response,
        })
        .await
    }

    pub async fn lookup(&self, vehicle_id: VehicleId) -> Result<Option<ChannelHandle>> {
        self.call(|response| RegistryRequest::Lookup {
            vehicle_id,
            response,
        })
        .await
    }

    /// Releases `vehicle_id` if `session` still owns it. Idempotent.
    pub async fn unbind(&self, vehicle_id: VehicleId, session: SessionId) -> Result<bool> {
        self.call(|response| RegistryRequest::Unbind {
            vehicle_id,
            session,
            response,
        })
        .await
    }

    /// Every bound vehicle, ordered by id.
    pub async fn snapshot(&self) -> Result<Vec<RegistryEntry>> {
        self.call(|response| RegistryRequest::Snapshot { response })
            .await
    }

    /// Stops the registry task and waits for its acknowledgement.
    pub async fn shutdown(&self) -> Result<()> {
        self.call(|response| RegistryRequest::Shutdown { response })
            .await
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> RegistryRequest,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(request(tx))
            .await
            .map_err(|_| Error::ServiceShutdown)?;
        rx.await.map_err(|_| Error::ChannelError {
            context: "registry dropped the reply".to_string(),
        })
    }
}
