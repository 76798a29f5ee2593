//! Game Logic Module
//!
//! Pure simulation code with no I/O: the arena grid, the movement engine,
//! per-player state, and the bot heuristic.
//!
//! ## Module Structure
//!
//! - `arena`: Cell ownership and step validity
//! - `movement`: Line tracing and per-tick advancement
//! - `state`: Player ids, position state, phases
//! - `bot`: Farthest-free-ray steering

pub mod arena;
pub mod bot;
pub mod movement;
pub mod state;

// Re-export key types
pub use arena::Arena;
pub use movement::{advance, AdvanceResult, LineTracer, Step};
pub use state::{ActorPhase, MatchPhase, PlayerId, PlayerKind, PositionState};
