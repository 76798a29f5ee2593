//! WebSocket Game Server
//!
//! Async WebSocket server for player connections. Requests are routed by
//! path:
//!
//! - `/ws/<matchId>`: play in an existing match
//! - `/lobby`: wait in the lobby queue for an opponent
//! - `/new`, `/join`, `/single-player`: one-shot matchmaking requests that
//!   answer with `{"gameId":..}` or `{"error":..}` and close

use std::fmt::Display;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::game::state::PlayerKind;
use crate::network::actor::ActorCommand;
use crate::network::lobby::{Candidate, Lobby, LobbyHandle};
use crate::network::protocol::{ClientCommand, MatchmakingReply};
use crate::network::session::{
    DirectoryHandle, JoinError, MatchConfig, MatchHandle, MatchId, Seat, OUTBOUND_CAPACITY,
};

type WsStream = WebSocketStream<TcpStream>;

/// How long a finished connection may take to flush its last frames.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Accepted arena side lengths, in cells.
const ARENA_SIDE: RangeInclusive<i32> = 20..=4000;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Poll period of the `/join` request.
    pub join_poll_interval: Duration,
    /// Settings applied to every match.
    pub match_config: MatchConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_connections: 1000,
            join_poll_interval: Duration::from_secs(1),
            match_config: MatchConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by environment variables.
    ///
    /// Recognized: `BIND_ADDR`, `PORT`, `MAX_CONNECTIONS`, `ARENA_WIDTH`,
    /// `ARENA_HEIGHT`, `JOIN_TIMEOUT_SECS`. Unparsable values are logged
    /// and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if lookup("BIND_ADDR").is_some() {
            config.bind_addr = parse_var(&lookup, "BIND_ADDR", config.bind_addr);
        } else if lookup("PORT").is_some() {
            let port = parse_var(&lookup, "PORT", config.bind_addr.port());
            config.bind_addr.set_port(port);
        }

        config.max_connections = parse_var(&lookup, "MAX_CONNECTIONS", config.max_connections);

        let mc = &mut config.match_config;
        mc.width = parse_bounded(&lookup, "ARENA_WIDTH", mc.width, ARENA_SIDE);
        mc.height = parse_bounded(&lookup, "ARENA_HEIGHT", mc.height, ARENA_SIDE);
        let join_secs = parse_var(&lookup, "JOIN_TIMEOUT_SECS", mc.join_timeout.as_secs());
        mc.join_timeout = Duration::from_secs(join_secs);

        config
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring {}={:?}: {}", key, raw, e);
                default
            }
        },
        None => default,
    }
}

fn parse_bounded<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T, range: RangeInclusive<T>) -> T
where
    T: FromStr + PartialOrd + Display + Copy,
    T::Err: Display,
{
    let value = parse_var(lookup, key, default);
    if range.contains(&value) {
        value
    } else {
        warn!("{} must be {}-{}, using default", key, range.start(), range.end());
        default
    }
}

// =============================================================================
// ERRORS AND ROUTES
// =============================================================================

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,
}

/// Where a connection was routed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Play(MatchId),
    Lobby,
    New,
    Join,
    SinglePlayer,
    Unknown(String),
}

impl Route {
    fn parse(path: &str) -> Self {
        let path = path.trim_end_matches('/');
        match path {
            "/lobby" => Route::Lobby,
            "/new" => Route::New,
            "/join" => Route::Join,
            "/single-player" => Route::SinglePlayer,
            _ => match path.strip_prefix("/ws/").and_then(MatchId::parse) {
                Some(id) => Route::Play(id),
                None => Route::Unknown(path.to_string()),
            },
        }
    }
}

/// Shared state handed to each connection task.
struct ConnectionContext {
    addr: SocketAddr,
    directory: DirectoryHandle,
    lobby: LobbyHandle,
    config: ServerConfig,
    shutdown: broadcast::Receiver<()>,
}

// =============================================================================
// SERVER
// =============================================================================

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    connections: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            connections: Arc::new(Semaphore::new(config.max_connections)),
            config,
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Stop accepting connections and close open ones.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, GameServerError> {
        Ok(TcpListener::bind(self.config.bind_addr).await?)
    }

    /// Bind and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    fn admit(&self) -> Result<OwnedSemaphorePermit, GameServerError> {
        Arc::clone(&self.connections)
            .try_acquire_owned()
            .map_err(|_| GameServerError::ConnectionLimitReached)
    }

    /// Accept connections on `listener` until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server v{} listening on {}", self.config.version, listener.local_addr()?);

        let directory = DirectoryHandle::spawn(self.config.match_config.clone());
        let lobby = Lobby::spawn(directory.clone(), self.config.match_config.probe_timeout);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let permit = match self.admit() {
                                Ok(permit) => permit,
                                Err(e) => {
                                    warn!("Rejecting {}: {}", addr, e);
                                    continue;
                                }
                            };

                            debug!("New connection from {}", addr);
                            let ctx = ConnectionContext {
                                addr,
                                directory: directory.clone(),
                                lobby: lobby.clone(),
                                config: self.config.clone(),
                                shutdown: self.shutdown_tx.subscribe(),
                            };
                            tokio::spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handle_connection(stream, ctx).await {
                                    debug!("Connection {} failed: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// CONNECTION HANDLING
// =============================================================================

async fn handle_connection(stream: TcpStream, mut ctx: ConnectionContext) -> Result<(), GameServerError> {
    let mut path = String::new();
    let ws = accept_hdr_async(stream, |request: &Request, response: Response| {
        path = request.uri().path().to_string();
        Ok::<Response, ErrorResponse>(response)
    })
    .await?;

    let route = Route::parse(&path);
    debug!(addr = %ctx.addr, ?route, "WebSocket connected");

    let (sink, frames) = ws.split();
    let (outbound, outbound_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
    let writer = tokio::spawn(write_frames(sink, outbound_rx));
    let writer_abort = writer.abort_handle();

    match route {
        Route::Play(id) => play(id, outbound, frames, &mut ctx).await,
        Route::Lobby => wait_in_lobby(outbound, frames, &mut ctx).await,
        Route::New => {
            let result = ctx.directory.create_and_wait(ctx.config.match_config.join_timeout).await;
            send_reply(outbound, result).await;
        }
        Route::Join => {
            let result = ctx.directory
                .find_and_join(ctx.config.match_config.join_timeout, ctx.config.join_poll_interval)
                .await;
            send_reply(outbound, result).await;
        }
        Route::SinglePlayer => {
            let result = ctx.directory.create_single_player().await;
            send_reply(outbound, result).await;
        }
        Route::Unknown(path) => {
            debug!(addr = %ctx.addr, %path, "Unknown route");
            send_reply(outbound, Err(JoinError::MatchNotFound)).await;
        }
    }

    // Writer exits once every sender is dropped; the lobby or a match may
    // still hold one, so don't wait forever
    if timeout(WRITER_GRACE, writer).await.is_err() {
        writer_abort.abort();
    }
    debug!("Client {} cleaned up", ctx.addr);
    Ok(())
}

/// Drain outbound frames into the socket, then close it.
async fn write_frames(mut sink: SplitSink<WsStream, Message>, mut frames: mpsc::Receiver<String>) {
    while let Some(text) = frames.recv().await {
        if sink.send(Message::Text(text)).await.is_err() {
            return;
        }
    }
    let _ = sink.close().await;
}

async fn send_reply(outbound: mpsc::Sender<String>, result: Result<MatchId, JoinError>) {
    let reply = match result {
        Ok(id) => MatchmakingReply::Redirect { game_id: id.to_string() },
        Err(e) => MatchmakingReply::Unavailable { error: e.to_string() },
    };
    match reply.to_json() {
        Ok(text) => {
            let _ = outbound.send(text).await;
        }
        Err(e) => error!("Failed to serialize reply: {}", e),
    }
}

/// Human player connection.
async fn play(id: MatchId, outbound: mpsc::Sender<String>, mut frames: SplitStream<WsStream>, ctx: &mut ConnectionContext) {
    let handle = match ctx.directory.get(&id).await {
        Some(handle) => handle,
        None => {
            send_reply(outbound, Err(JoinError::MatchNotFound)).await;
            return;
        }
    };

    let seat = match handle.register(PlayerKind::Human, outbound.clone()).await {
        Ok(seat) => seat,
        Err(e) => {
            debug!(addr = %ctx.addr, match_id = %id, "Registration refused: {}", e);
            send_reply(outbound, Err(e.into())).await;
            return;
        }
    };
    // The match now owns the only sender; it closes the socket on destroy
    drop(outbound);
    info!(addr = %ctx.addr, match_id = %id, player = %seat.id, "Player joined match");

    loop {
        tokio::select! {
            frame = frames.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => player_frame(&text, &handle, &seat, ctx.addr).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("WebSocket error for {}: {}", ctx.addr, e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            _ = ctx.shutdown.recv() => break,
        }
    }

    let _ = handle.disconnect(seat.id).await;
}

async fn player_frame(text: &str, handle: &MatchHandle, seat: &Seat, addr: SocketAddr) {
    match ClientCommand::from_json(text) {
        Ok(ClientCommand::Steer(command)) => {
            if seat.control.send(ActorCommand::Steer(command)).await.is_err() {
                debug!(player = %seat.id, "Steering after actor exit");
            }
        }
        Ok(ClientCommand::Handshake { client_id }) => {
            let _ = handle.set_client_id(seat.id, client_id).await;
        }
        Err(e) => debug!("Invalid message from {}: {}", addr, e),
    }
}

/// Lobby connection: forward every inbound frame as a probe reply.
async fn wait_in_lobby(outbound: mpsc::Sender<String>, mut frames: SplitStream<WsStream>, ctx: &mut ConnectionContext) {
    let (replies, replies_rx) = mpsc::channel(16);
    if !ctx.lobby.join(Candidate::new(ctx.addr.to_string(), outbound, replies_rx)).await {
        warn!("Lobby unavailable for {}", ctx.addr);
        return;
    }

    loop {
        tokio::select! {
            frame = frames.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let _ = replies.try_send(text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("WebSocket error for {}: {}", ctx.addr, e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            _ = ctx.shutdown.recv() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tokio_tungstenite::connect_async;
    use crate::network::protocol::ServerMessage;

    #[test]
    fn test_route_parse() {
        assert_eq!(Route::parse("/lobby"), Route::Lobby);
        assert_eq!(Route::parse("/new"), Route::New);
        assert_eq!(Route::parse("/join/"), Route::Join);
        assert_eq!(Route::parse("/single-player"), Route::SinglePlayer);

        let id = MatchId::generate();
        assert_eq!(Route::parse(&format!("/ws/{}", id)), Route::Play(id));
        assert!(matches!(Route::parse("/ws/zzz"), Route::Unknown(_)));
        assert!(matches!(Route::parse("/"), Route::Unknown(_)));
    }

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8000);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.match_config.width, 500);
        assert_eq!(config.match_config.height, 600);
        assert_eq!(config.match_config.join_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_config_overrides() {
        let env: BTreeMap<&str, &str> = [
            ("PORT", "9001"),
            ("MAX_CONNECTIONS", "12"),
            ("ARENA_WIDTH", "300"),
            ("ARENA_HEIGHT", "not-a-number"),
            ("JOIN_TIMEOUT_SECS", "5"),
        ].into_iter().collect();

        let config = ServerConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.bind_addr.port(), 9001);
        assert_eq!(config.max_connections, 12);
        assert_eq!(config.match_config.width, 300);
        assert_eq!(config.match_config.height, 600);
        assert_eq!(config.match_config.join_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_arena_size_out_of_range() {
        for (width, height) in [("0", "-600"), ("100000", "19")] {
            let config = ServerConfig::from_lookup(|key| match key {
                "ARENA_WIDTH" => Some(width.to_string()),
                "ARENA_HEIGHT" => Some(height.to_string()),
                _ => None,
            });
            assert_eq!(config.match_config.width, 500);
            assert_eq!(config.match_config.height, 600);
        }

        let config = ServerConfig::from_lookup(|key| match key {
            "ARENA_WIDTH" => Some("20".to_string()),
            "ARENA_HEIGHT" => Some("4000".to_string()),
            _ => None,
        });
        assert_eq!((config.match_config.width, config.match_config.height), (20, 4000));
    }

    #[test]
    fn test_bind_addr_wins_over_port() {
        let config = ServerConfig::from_lookup(|key| match key {
            "BIND_ADDR" => Some("127.0.0.1:7000".to_string()),
            "PORT" => Some("9001".to_string()),
            _ => None,
        });
        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 7000)));
    }

    #[test]
    fn test_connection_limit() {
        let server = GameServer::new(ServerConfig { max_connections: 1, ..Default::default() });
        let permit = server.admit().unwrap();
        assert!(matches!(server.admit(), Err(GameServerError::ConnectionLimitReached)));
        drop(permit);
        assert!(server.admit().is_ok());
    }

    async fn next_text(ws: &mut WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>) -> String {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text,
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_single_player_over_websocket() {
        let config = ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        };
        let server = Arc::new(GameServer::new(config));
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(listener).await });
        }

        let (mut ws, _) = connect_async(format!("ws://{}/single-player", addr)).await.unwrap();
        let reply: serde_json::Value = serde_json::from_str(&next_text(&mut ws).await).unwrap();
        let game_id = reply["gameId"].as_str().unwrap().to_string();
        assert!(MatchId::parse(&game_id).is_some());

        let (mut player, _) = connect_async(format!("ws://{}/ws/{}", addr, game_id)).await.unwrap();
        player.send(Message::Text(r#"{"clientId":"5"}"#.to_string())).await.unwrap();

        // Our registration sends the table with the bot and us
        match ServerMessage::from_json(&next_text(&mut player).await).unwrap() {
            ServerMessage::Players { players } => {
                assert!(players.contains_key("0"));
                assert!(players.contains_key("1"));
            }
            other => panic!("expected players table, got {:?}", other),
        }

        let (mut unknown, _) = connect_async(format!("ws://{}/ws/0000000000000000", addr)).await.unwrap();
        let reply: serde_json::Value = serde_json::from_str(&next_text(&mut unknown).await).unwrap();
        assert_eq!(reply["error"], "match not found");

        server.shutdown();
    }
}
