//! Movement and battery model.
//!
//! A trip is a sequence of [`advance`] calls along the [`Heading`] from the
//! vehicle's position to its destination. The heading is recomputed before
//! every step: each axis moves one step towards the destination until the
//! remaining offset on that axis is at most half a step, at which point the
//! axis is closed. Both axes open gives a diagonal move, one axis open an
//! axis-aligned one, so a trip approaches its destination in an L shape.

use scooter_core::{
    proto::ClientMessage,
    types::{Position, StationId, VehicleId},
};

/// Direction of travel along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Negative,
    Closed,
    Positive,
}

impl Sign {
    /// Classifies the remaining `offset` on an axis.
    pub fn of(offset: f64, step: f64) -> Self {
        if offset.abs() <= step / 2.0 {
            Self::Closed
        } else if offset > 0.0 {
            Self::Positive
        } else {
            Self::Negative
        }
    }

    pub const fn factor(self) -> f64 {
        match self {
            Self::Negative => -1.0,
            Self::Closed => 0.0,
            Self::Positive => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heading {
    pub latitude: Sign,
    pub longitude: Sign,
}

impl Heading {
    pub fn towards(from: Position, to: Position, step: f64) -> Self {
        Self {
            latitude: Sign::of(to.latitude - from.latitude, step),
            longitude: Sign::of(to.longitude - from.longitude, step),
        }
    }

    pub fn is_arrived(self) -> bool {
        self.latitude == Sign::Closed && self.longitude == Sign::Closed
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementParams {
    /// Degrees per axis and step.
    pub step: f64,
    /// Charge consumed per step.
    pub discharge: f64,
}

impl Default for MovementParams {
    fn default() -> Self {
        Self {
            step: 0.0001,
            discharge: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleState {
    pub id: VehicleId,
    pub position: Position,
    pub battery: f64,
    /// Station of the trip in progress.
    pub assigned_station: Option<StationId>,
}

impl VehicleState {
    pub const fn new(id: VehicleId, position: Position, battery: f64) -> Self {
        Self {
            id,
            position,
            battery,
            assigned_station: None,
        }
    }

    pub fn is_depleted(&self) -> bool {
        self.battery <= 0.0
    }

    pub const fn to_message(&self) -> ClientMessage {
        ClientMessage {
            id: self.id,
            latitude: self.position.latitude,
            longitude: self.position.longitude,
            battery_remain: self.battery,
        }
    }
}

/// Moves `state` one step along `heading` and discharges it. The battery
/// never goes below 0.
pub fn advance(state: &mut VehicleState, heading: Heading, params: &MovementParams) {
    state.position.latitude += params.step * heading.latitude.factor();
    state.position.longitude += params.step * heading.longitude.factor();
    state.battery = (state.battery - params.discharge).max(0.0);
}
