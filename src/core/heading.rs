//! Heading Arithmetic
//!
//! Player-facing headings are whole degrees in `[0, 360)`. Degrees increase
//! clockwise on screen (x right, y down), so 0° points right and 90° down.
//! Radians are only produced for the line-tracing projection.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Degrees in a full turn.
pub const FULL_TURN: i32 = 360;

/// Direction of an active rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationDirection {
    /// Counter-clockwise (heading decreases).
    Left,
    /// Clockwise (heading increases).
    Right,
}

impl RotationDirection {
    /// Parse the key name used by clients.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }

    /// Signed multiplier applied to a rotation step.
    #[inline]
    pub fn sign(self) -> i32 {
        match self {
            Self::Left => -1,
            Self::Right => 1,
        }
    }
}

/// A heading in whole degrees, always normalized to `[0, 360)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Heading(u16);

impl Heading {
    /// Heading pointing right (+x).
    pub const EAST: Heading = Heading(0);
    /// Heading pointing down (+y).
    pub const SOUTH: Heading = Heading(90);
    /// Heading pointing left (-x).
    pub const WEST: Heading = Heading(180);
    /// Heading pointing up (-y).
    pub const NORTH: Heading = Heading(270);

    /// Create a heading from any integer number of degrees.
    pub fn new(degrees: i32) -> Self {
        Self(degrees.rem_euclid(FULL_TURN) as u16)
    }

    /// Degrees in `[0, 360)`.
    #[inline]
    pub fn degrees(self) -> i32 {
        self.0 as i32
    }

    /// Radians, for the tracer's projection only.
    #[inline]
    pub fn radians(self) -> f64 {
        (self.0 as f64).to_radians()
    }

    /// Heading after one rotation step in `direction`.
    #[inline]
    pub fn rotated(self, direction: RotationDirection, step: i32) -> Self {
        Self::new(self.degrees() + direction.sign() * step)
    }

    /// Clockwise distance in degrees from `self` to `target`, in `[0, 360)`.
    #[inline]
    pub fn clockwise_delta_to(self, target: Heading) -> i32 {
        (target.degrees() - self.degrees()).rem_euclid(FULL_TURN)
    }

    /// Which way to turn to reach `target`, or `None` once within `tolerance`.
    ///
    /// Targets up to half a turn clockwise are reached by turning right.
    pub fn steer_towards(self, target: Heading, tolerance: i32) -> Option<RotationDirection> {
        let delta = self.clockwise_delta_to(target);
        if delta < tolerance || FULL_TURN - delta < tolerance {
            None
        } else if delta <= FULL_TURN / 2 {
            Some(RotationDirection::Right)
        } else {
            Some(RotationDirection::Left)
        }
    }
}

impl fmt::Display for Heading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.0)
    }
}
