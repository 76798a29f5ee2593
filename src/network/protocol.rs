//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON text frame except the lobby liveness probe,
//! which is the bare text `ping`.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::heading::RotationDirection;
use crate::game::state::{PlayerId, PositionState};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Steering input from a human player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteerCommand {
    /// Turn key pressed: start rotating.
    Press(RotationDirection),
    /// Turn key released: stop rotating.
    Release,
}

/// Commands a player connection may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    /// Key down / key up.
    Steer(SteerCommand),
    /// Associates a reconnecting client session with this player.
    Handshake {
        /// Client-chosen session id.
        client_id: i64,
    },
}

/// Errors raised while decoding an inbound frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON of the expected shape.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// `dir` is neither `down` nor `up`.
    #[error("unknown direction: {0}")]
    UnknownDirection(String),
    /// Key-down without a `left`/`right` key.
    #[error("missing or unknown key: {0:?}")]
    UnknownKey(Option<String>),
    /// `clientId` is not an integer.
    #[error("invalid client id: {0}")]
    InvalidClientId(String),
    /// Frame carries none of the known fields.
    #[error("unrecognized command")]
    Unrecognized,
}

/// Raw inbound frame. Clients send loosely-typed string maps.
#[derive(Debug, Deserialize)]
struct RawClientMessage {
    #[serde(default)]
    dir: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default, rename = "clientId")]
    client_id: Option<ClientIdField>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClientIdField {
    Number(i64),
    Text(String),
}

impl ClientCommand {
    /// Key-down direction marker.
    pub const DIR_DOWN: &'static str = "down";
    /// Key-up direction marker.
    pub const DIR_UP: &'static str = "up";

    /// Decode an inbound text frame.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        let raw: RawClientMessage = serde_json::from_str(s)?;

        match raw.dir.as_deref() {
            Some(Self::DIR_DOWN) => {
                let direction = raw.key.as_deref()
                    .and_then(RotationDirection::from_key)
                    .ok_or(ProtocolError::UnknownKey(raw.key.clone()))?;
                Ok(ClientCommand::Steer(SteerCommand::Press(direction)))
            }
            Some(Self::DIR_UP) => Ok(ClientCommand::Steer(SteerCommand::Release)),
            Some(other) => Err(ProtocolError::UnknownDirection(other.to_string())),
            None => match raw.client_id {
                Some(ClientIdField::Number(client_id)) => Ok(ClientCommand::Handshake { client_id }),
                Some(ClientIdField::Text(text)) => text.trim().parse::<i64>()
                    .map(|client_id| ClientCommand::Handshake { client_id })
                    .map_err(|_| ProtocolError::InvalidClientId(text)),
                None => Err(ProtocolError::Unrecognized),
            },
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// One player's entry in a state broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStatus {
    /// Cell column.
    pub x: i32,
    /// Cell row.
    pub y: i32,
    /// Heading in degrees.
    pub rotation: i32,
    /// Whether the trail is currently being drawn.
    pub trace: bool,
    /// Client session id, `-1` until the handshake.
    #[serde(rename = "clientId")]
    pub client_id: i64,
}

impl PlayerStatus {
    /// Build from a position snapshot.
    pub fn from_position(position: &PositionState, client_id: i64) -> Self {
        Self {
            x: position.x,
            y: position.y,
            rotation: position.rotation.degrees(),
            trace: position.trace,
            client_id,
        }
    }
}

/// Messages broadcast to match participants.
///
/// Untagged: each variant serializes to the bare object clients expect,
/// e.g. `{"countdown":3}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Position table, keyed by player id.
    Players {
        /// Player id (as string) to status.
        players: BTreeMap<String, PlayerStatus>,
    },
    /// Pre-game countdown, 3 down to 0.
    Countdown {
        /// Seconds remaining.
        countdown: u8,
    },
    /// Match result, sent exactly once.
    Winner {
        /// Surviving player.
        winner: PlayerId,
    },
}

impl ServerMessage {
    /// State broadcast for a single player.
    pub fn player(id: PlayerId, status: PlayerStatus) -> Self {
        let mut players = BTreeMap::new();
        players.insert(id.to_string(), status);
        ServerMessage::Players { players }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// LOBBY / MATCHMAKING MESSAGES
// =============================================================================

/// Liveness probe text sent to lobby candidates.
pub const PING: &str = "ping";

/// Replies to lobby and matchmaking requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchmakingReply {
    /// Go to this match.
    Redirect {
        /// Opaque match identifier.
        #[serde(rename = "gameId")]
        game_id: String,
    },
    /// No match could be formed.
    Unavailable {
        /// Human-readable reason.
        error: String,
    },
}

impl MatchmakingReply {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::heading::Heading;

    #[test]
    fn test_parse_key_down() {
        let cmd = ClientCommand::from_json(r#"{"dir":"down","key":"left"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Steer(SteerCommand::Press(RotationDirection::Left)));

        let cmd = ClientCommand::from_json(r#"{"dir":"down","key":"right"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Steer(SteerCommand::Press(RotationDirection::Right)));
    }

    #[test]
    fn test_parse_key_up() {
        let cmd = ClientCommand::from_json(r#"{"dir":"up"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Steer(SteerCommand::Release));
    }

    #[test]
    fn test_parse_handshake() {
        let cmd = ClientCommand::from_json(r#"{"clientId":"42"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Handshake { client_id: 42 });

        let cmd = ClientCommand::from_json(r#"{"clientId":7}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Handshake { client_id: 7 });
    }

    #[test]
    fn test_malformed_commands() {
        assert!(matches!(ClientCommand::from_json("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(
            ClientCommand::from_json(r#"{"dir":"down","key":"jump"}"#),
            Err(ProtocolError::UnknownKey(Some(_)))
        ));
        assert!(matches!(
            ClientCommand::from_json(r#"{"dir":"down"}"#),
            Err(ProtocolError::UnknownKey(None))
        ));
        assert!(matches!(
            ClientCommand::from_json(r#"{"dir":"sideways"}"#),
            Err(ProtocolError::UnknownDirection(_))
        ));
        assert!(matches!(
            ClientCommand::from_json(r#"{"clientId":"abc"}"#),
            Err(ProtocolError::InvalidClientId(_))
        ));
        assert!(matches!(ClientCommand::from_json("{}"), Err(ProtocolError::Unrecognized)));
    }

    #[test]
    fn test_players_payload_shape() {
        let position = PositionState::new(250, 120, Heading::new(45));
        let msg = ServerMessage::player(PlayerId::new(0), PlayerStatus::from_position(&position, -1));
        let json = msg.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"players":{"0":{"x":250,"y":120,"rotation":45,"trace":true,"clientId":-1}}}"#
        );
    }

    #[test]
    fn test_countdown_and_winner_shape() {
        assert_eq!(ServerMessage::Countdown { countdown: 3 }.to_json().unwrap(), r#"{"countdown":3}"#);
        assert_eq!(
            ServerMessage::Winner { winner: PlayerId::new(1) }.to_json().unwrap(),
            r#"{"winner":1}"#
        );
    }

    #[test]
    fn test_server_message_parse_back() {
        let parsed = ServerMessage::from_json(r#"{"winner":0}"#).unwrap();
        assert_eq!(parsed, ServerMessage::Winner { winner: PlayerId::new(0) });

        let parsed = ServerMessage::from_json(r#"{"countdown":2}"#).unwrap();
        assert_eq!(parsed, ServerMessage::Countdown { countdown: 2 });
    }

    #[test]
    fn test_matchmaking_reply_shape() {
        let reply = MatchmakingReply::Redirect { game_id: "abcd".to_string() };
        assert_eq!(reply.to_json().unwrap(), r#"{"gameId":"abcd"}"#);

        let reply = MatchmakingReply::Unavailable { error: "no active games".to_string() };
        assert_eq!(reply.to_json().unwrap(), r#"{"error":"no active games"}"#);
    }
}
