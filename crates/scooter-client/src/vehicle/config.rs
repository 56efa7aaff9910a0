use anyhow::bail;
use clap::{ArgAction, Parser};
use core::time::Duration;
use scooter_core::types::{Position, UNASSIGNED, VehicleId};

/// Runtime configuration for the `scooter-client` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "scooter-client",
    version,
    about = "Simulated scooter connected to the dispatch hub"
)]
pub struct CliArgs {
    /// URI of the hub's gRPC listener.
    ///
    /// Environment variable: `HUB_ADDR`
    #[arg(long, env = "HUB_ADDR", default_value_t = String::from("http://127.0.0.1:9000"))]
    pub hub_addr: String,

    /// Identity announced to the hub. Must not be 0, which is reserved for
    /// keep-alives.
    ///
    /// Environment variable: `VEHICLE_ID`
    #[arg(long, env = "VEHICLE_ID")]
    pub vehicle_id: VehicleId,

    /// Environment variable: `START_LATITUDE`
    #[arg(long, env = "START_LATITUDE", default_value_t = 48.4647)]
    pub start_latitude: f64,

    /// Environment variable: `START_LONGITUDE`
    #[arg(long, env = "START_LONGITUDE", default_value_t = 35.0462)]
    pub start_longitude: f64,

    /// Initial charge, in percent.
    ///
    /// Environment variable: `BATTERY`
    #[arg(long, env = "BATTERY", default_value_t = 100.0)]
    pub battery: f64,

    /// Distance covered per axis and step, in degrees.
    ///
    /// Environment variable: `STEP`
    #[arg(long, env = "STEP", default_value_t = 0.0001)]
    pub step: f64,

    /// Charge consumed per step.
    ///
    /// Environment variable: `DISCHARGE`
    #[arg(long, env = "DISCHARGE", default_value_t = 0.1)]
    pub discharge: f64,

    /// Delay between two steps of a trip, in milliseconds.
    ///
    /// Environment variable: `INTERVAL_MS`
    #[arg(long, env = "INTERVAL_MS", default_value_t = 450)]
    pub interval_ms: u64,

    /// Seconds between keep-alives while idle.
    ///
    /// Environment variable: `HEARTBEAT_SECS`
    #[arg(long, env = "HEARTBEAT_SECS", default_value_t = 3)]
    pub heartbeat_secs: u64,

    /// Reset the vehicle identity to 0 when the battery runs out mid-trip.
    ///
    /// Environment variable: `FORGET_ON_DEPLETION`
    #[arg(long, env = "FORGET_ON_DEPLETION", default_value_t = true, action = ArgAction::Set)]
    pub forget_on_depletion: bool,

    /// Capacity of the outbound telemetry queue.
    ///
    /// Environment variable: `OUTBOUND_BUFFER_SIZE`
    #[arg(long, env = "OUTBOUND_BUFFER_SIZE", default_value_t = 32)]
    pub outbound_buffer_size: usize,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub hub_addr: String,
    pub vehicle_id: VehicleId,
    pub start: Position,
    pub battery: f64,
    pub step: f64,
    pub discharge: f64,
    pub interval: Duration,
    pub heartbeat: Duration,
    pub forget_on_depletion: bool,
    pub outbound_buffer_size: usize,
}

impl TryFrom<CliArgs> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.vehicle_id == UNASSIGNED {
            bail!("VEHICLE_ID must not be 0");
        }

        if !args.hub_addr.starts_with("http://") && !args.hub_addr.starts_with("https://") {
            bail!("HUB_ADDR must be an http(s) URI, got {}", args.hub_addr);
        }

        if !(args.step.is_finite() && args.step > 0.0) {
            bail!("STEP must be a positive number of degrees");
        }

        if !(args.discharge.is_finite() && args.discharge > 0.0) {
            bail!("DISCHARGE must be positive");
        }

        if !(0.0..=100.0).contains(&args.battery) {
            bail!("BATTERY must be within 0..=100, got {}", args.battery);
        }

        if !(-90.0..=90.0).contains(&args.start_latitude)
            || !(-180.0..=180.0).contains(&args.start_longitude)
        {
            bail!(
                "start position ({}, {}) is out of range",
                args.start_latitude,
                args.start_longitude
            );
        }

        if args.heartbeat_secs == 0 {
            bail!("HEARTBEAT_SECS must be greater than 0");
        }

        if args.outbound_buffer_size == 0 {
            bail!("OUTBOUND_BUFFER_SIZE must be greater than 0");
        }

        Ok(Self {
            hub_addr: args.hub_addr,
            vehicle_id: args.vehicle_id,
            start: Position::new(args.start_latitude, args.start_longitude),
            battery: args.battery,
            step: args.step,
            discharge: args.discharge,
            interval: Duration::from_millis(args.interval_ms),
            heartbeat: Duration::from_secs(args.heartbeat_secs),
            forget_on_depletion: args.forget_on_depletion,
            outbound_buffer_size: args.outbound_buffer_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ClientConfig> {
        let args = CliArgs::try_parse_from(
            std::iter::once("scooter-client").chain(args.iter().copied()),
        )?;
        ClientConfig::try_from(args)
    }

    #[test]
    fn defaults_match_the_reference_vehicle() {
        let config = parse(&["--vehicle-id", "7"]).unwrap();
        assert_eq!(config.vehicle_id, 7);
        assert_eq!(config.step, 0.0001);
        assert_eq!(config.discharge, 0.1);
        assert_eq!(config.interval, Duration::from_millis(450));
        assert_eq!(config.heartbeat, Duration::from_secs(3));
        assert!(config.forget_on_depletion);
    }

    #[test]
    fn zero_identity_is_rejected() {
        let err = parse(&["--vehicle-id", "0"]).unwrap_err();
        assert!(err.to_string().contains("VEHICLE_ID"));
    }

    #[test]
    fn identity_reset_can_be_disabled() {
        let config = parse(&["--vehicle-id", "7", "--forget-on-depletion", "false"]).unwrap();
        assert!(!config.forget_on_depletion);
    }

    #[test]
    fn non_positive_step_is_rejected() {
        let err = parse(&["--vehicle-id", "7", "--step", "0"]).unwrap_err();
        assert!(err.to_string().contains("STEP"));
    }
}
