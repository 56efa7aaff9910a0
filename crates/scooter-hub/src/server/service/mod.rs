//! gRPC surface of the hub.
//!
//! - [`handler`] - `ScooterService` implementation ([`handler::ScooterHubService`]).

pub mod handler;
