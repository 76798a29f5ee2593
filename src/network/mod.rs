//! Network Layer
//!
//! WebSocket server, player actors, match loops, and matchmaking.
//! Timing and concurrency live here; all grid logic runs through `game/`.

pub mod actor;
pub mod lobby;
pub mod protocol;
pub mod session;
pub mod server;

pub use actor::{ActorCommand, PlayerActor};
pub use lobby::{Candidate, Lobby, LobbyHandle};
pub use protocol::{ClientCommand, MatchmakingReply, PlayerStatus, ServerMessage, SteerCommand};
pub use session::{
    DirectoryHandle, JoinError, MatchConfig, MatchDirectory, MatchError, MatchHandle, MatchId,
    MatchSession,
};
pub use server::{GameServer, GameServerError, ServerConfig};
