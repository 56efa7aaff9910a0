//! Simulated vehicle.
//!
//! - [`config`]: CLI and environment configuration.
//! - [`movement`]: Step function and battery model.
//! - [`simulator`]: Runs a single trip against a telemetry sink.
//! - [`session`]: Hub connection, keep-alives and trip reporting.

pub mod config;
pub mod movement;
pub mod session;
pub mod simulator;
