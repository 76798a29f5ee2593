//! # Light-Cycle Duel Server
//!
//! Authoritative server for two-player light-cycle matches on a grid.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    LIGHTCYCLE SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── heading.rs  - Whole-degree headings, turn direction     │
//! │  └── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │                                                              │
//! │  game/           - Grid logic (no I/O)                       │
//! │  ├── arena.rs    - Cell ownership, step validity             │
//! │  ├── movement.rs - Line tracing, per-tick advancement        │
//! │  ├── state.rs    - Player and match state                    │
//! │  └── bot.rs      - Farthest-ray steering heuristic           │
//! │                                                              │
//! │  network/        - Async layer                               │
//! │  ├── server.rs   - WebSocket server, configuration           │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── session.rs  - Match loop and match directory            │
//! │  ├── actor.rs    - Per-player tasks                          │
//! │  └── lobby.rs    - Lobby pairing                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Every match is one event loop that owns its arena and player registry.
//! Player actors run as separate tasks and reach the loop only through
//! message passing, so arena writes, registry changes, and broadcasts are
//! serialized without locks.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::heading::{Heading, RotationDirection};
pub use crate::core::rng::DeterministicRng;
pub use game::arena::Arena;
pub use game::state::{MatchPhase, PlayerId, PositionState};
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Movement tick rate (Hz)
pub const TICK_RATE: u32 = 10;

/// Default arena width in cells
pub const ARENA_WIDTH: i32 = 500;

/// Default arena height in cells
pub const ARENA_HEIGHT: i32 = 600;

/// Players per match
pub const MAX_PLAYERS: usize = 2;
