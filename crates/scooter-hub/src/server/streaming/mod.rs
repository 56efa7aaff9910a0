//! Data paths of the hub.
//!
//! - [`session`] - per-vehicle `Register` streams.
//! - [`bus`] - the shared telemetry queue.
//! - [`fanout`] - replication of telemetry to live feed subscribers.

pub mod bus;
pub mod fanout;
pub mod session;
