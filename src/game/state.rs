//! Game State Definitions
//!
//! Plain data shared by the simulation: player identity, per-player
//! position state, and the phases of players and matches.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::heading::{Heading, RotationDirection};

// =============================================================================
// PLAYER ID
// =============================================================================

/// Player slot within a match (0 or 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u8);

impl PlayerId {
    /// Create from a slot index.
    pub const fn new(slot: u8) -> Self {
        Self(slot)
    }

    /// Slot index.
    #[inline]
    pub fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client id reported for players that never performed a handshake.
pub const NO_CLIENT_ID: i64 = -1;

// =============================================================================
// PLAYER KIND / PHASES
// =============================================================================

/// Who steers a player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerKind {
    /// Steered by a remote client's key presses.
    Human,
    /// Steered by the ray-scan heuristic.
    Bot,
}

/// Lifecycle of a single player actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActorPhase {
    /// Created, not yet placed on the arena.
    Initializing,
    /// Placed, waiting for the countdown to start movement.
    Idle,
    /// Movement loop running.
    Moving,
    /// Collided, disconnected, or destroyed.
    Dead,
}

/// Lifecycle of a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Accepting registrations.
    WaitingForPlayers,
    /// Both players registered, counting down.
    Countdown,
    /// Simulation running.
    Active,
    /// Winner decided or match abandoned.
    Ended,
}

impl MatchPhase {
    /// Whether movement ticks should advance players.
    #[inline]
    pub fn is_started(self) -> bool {
        matches!(self, MatchPhase::Active)
    }

    /// Whether the match is over.
    #[inline]
    pub fn is_ended(self) -> bool {
        matches!(self, MatchPhase::Ended)
    }
}

// =============================================================================
// POSITION STATE
// =============================================================================

/// Position, heading, and trail state of one player.
///
/// Owned by exactly one actor; the match only ever sees copies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PositionState {
    /// Cell column.
    pub x: i32,
    /// Cell row.
    pub y: i32,
    /// Current heading.
    pub rotation: Heading,
    /// Active rotation, if a turn key is held.
    pub rotation_dir: Option<RotationDirection>,
    /// Whether cells entered now become owned.
    pub trace: bool,
}

impl PositionState {
    /// Create a position state with trace on and no active rotation.
    pub fn new(x: i32, y: i32, rotation: Heading) -> Self {
        Self {
            x,
            y,
            rotation,
            rotation_dir: None,
            trace: true,
        }
    }

    /// Deterministic start cell for a player slot.
    ///
    /// Slot 0 starts one fifth down the arena, slot 1 four fifths down,
    /// both horizontally centred.
    pub fn spawn_point(id: PlayerId, width: i32, height: i32) -> (i32, i32) {
        let x = width / 2;
        let y = height / 5 + id.index() as i32 * 3 * height / 5;
        (x, y)
    }

    /// Create the initial state for a player slot.
    pub fn spawn(id: PlayerId, width: i32, height: i32, rotation: Heading) -> Self {
        let (x, y) = Self::spawn_point(id, width, height);
        Self::new(x, y, rotation)
    }

    /// Toggle trail marking.
    #[inline]
    pub fn toggle_trace(&mut self) {
        self.trace = !self.trace;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_points() {
        assert_eq!(PositionState::spawn_point(PlayerId::new(0), 500, 600), (250, 120));
        assert_eq!(PositionState::spawn_point(PlayerId::new(1), 500, 600), (250, 480));
        assert_eq!(PositionState::spawn_point(PlayerId::new(0), 300, 400), (150, 80));
        assert_eq!(PositionState::spawn_point(PlayerId::new(1), 300, 400), (150, 320));
    }

    #[test]
    fn test_spawn_defaults() {
        let state = PositionState::spawn(PlayerId::new(1), 500, 600, Heading::new(45));
        assert!(state.trace);
        assert_eq!(state.rotation_dir, None);
        assert_eq!(state.rotation.degrees(), 45);
    }

    #[test]
    fn test_toggle_trace() {
        let mut state = PositionState::new(1, 1, Heading::EAST);
        state.toggle_trace();
        assert!(!state.trace);
        state.toggle_trace();
        assert!(state.trace);
    }

    #[test]
    fn test_player_id_ordering() {
        assert!(PlayerId::new(0) < PlayerId::new(1));
        assert_eq!(PlayerId::new(1).to_string(), "1");
    }

    #[test]
    fn test_phase_flags() {
        assert!(!MatchPhase::Countdown.is_started());
        assert!(MatchPhase::Active.is_started());
        assert!(MatchPhase::Ended.is_ended());
    }
}
