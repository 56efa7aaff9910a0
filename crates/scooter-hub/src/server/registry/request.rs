//! Internal message types used to talk to the registry task.
//!
//! Every read and write of the vehicle table goes through
//! [`RegistryRequest`]. Requests are sent over a bounded MPSC channel and each
//! carries a one-shot channel for the reply, so callers observe the table in
//! the order the registry task applied their requests.

use super::{ChannelHandle, RegistryEntry, SessionId};
use scooter_core::types::VehicleId;
use tokio::sync::oneshot;

#[derive(Debug)]
pub(crate) enum RegistryRequest {
    /// Bind `vehicle_id` to `handle`, replacing any existing binding.
    ///
    /// - `response`: the session that was superseded, if any.
    Bind {
        vehicle_id: VehicleId,
        handle: ChannelHandle,
        response: oneshot::Sender<Option<SessionId>>,
    },

    Lookup {
        vehicle_id: VehicleId,
        response: oneshot::Sender<Option<ChannelHandle>>,
    },

    /// Remove the binding of `vehicle_id` if it still belongs to `session`.
    ///
    /// - `response`: whether an entry was removed.
    Unbind {
        vehicle_id: VehicleId,
        session: SessionId,
        response: oneshot::Sender<bool>,
    },

    Snapshot {
        response: oneshot::Sender<Vec<RegistryEntry>>,
    },

    /// Request the registry task to stop and acknowledge.
    Shutdown { response: oneshot::Sender<()> },
}
