//! Server-side components of the scooter dispatch hub.
//!
//! ## Submodules
//!
//! - [`registry`] - which vehicle is reachable over which stream.
//! - [`dispatch`] - delivery of destination assignments.
//! - [`streaming`] - vehicle sessions, the telemetry bus and the live feed
//!   fanout.
//! - [`hub`] - the shared state tying the above together, plus the order
//!   flow.
//! - [`service`] - gRPC service implementation.
//! - [`http`] - live feed and REST routes.
//! - [`collab`] - fleet repository, order service and event log
//!   interfaces.
//! - [`config`] / [`telemetry`] - runtime settings and tracing setup.
//!
//! These components are wired together in the binary's `main.rs`.

pub mod collab;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod hub;
pub mod registry;
pub mod service;
pub mod streaming;
pub mod telemetry;
