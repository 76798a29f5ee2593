//! Core primitives.
//!
//! Seeded randomness and heading arithmetic shared by the game and network layers.

pub mod heading;
pub mod rng;

// Re-export core types
pub use heading::{Heading, RotationDirection, FULL_TURN};
pub use rng::DeterministicRng;
