//! Error types for the dispatch hub and the vehicle client.
//!
//! This module defines the central `Error` enum. It implements
//! `From<Error>` for `tonic::Status` so handlers can propagate failures to
//! gRPC callers with `?`.
//!
//! ## Error Cases
//! - `ChannelError`: An internal communication failure between tasks.
//! - `Transport`: A vehicle stream closed or errored.
//! - `Upstream`: A collaborator (repository, order service, event log)
//!   failed. Passed through without further classification.
//! - `NotFound`: A collaborator has no record for the requested id.
//! - `InvalidRequest`: The request was malformed.
//! - `ServiceShutdown`: A request arrived while the hub was shutting down.
//!
//! Routing misses and depleted trips are outcomes, not errors, and have no
//! variant here.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the dispatch hub.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The vehicle's stream closed or errored.
    #[error("Transport error: {context}")]
    Transport { context: String },

    /// A collaborator failed.
    #[error("Upstream error: {context}")]
    Upstream { context: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    /// The request was invalid or violated a precondition.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {}", context))
            }
            Error::Transport { context } => Status::unavailable(context),
            Error::Upstream { context } => Status::internal(format!("Upstream error: {}", context)),
            Error::NotFound { what } => Status::not_found(what),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Transport {
            context: format!("{}: {}", status.code(), status.message()),
        }
    }
}
