//! Match Session Management
//!
//! A match is a single event loop that owns the arena, the player registry,
//! and the winner. Actors and connections reach it only through a
//! [`MatchHandle`], so every arena write, registry change, and broadcast is
//! serialized by that one loop.
//!
//! Active matches are tracked by the [`MatchDirectory`] actor, which also
//! implements the "create and wait" / "find and join" matchmaking flows.

use std::collections::BTreeMap;
use std::fmt;
use std::future;
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval, interval_at, sleep, timeout, Instant, Interval};
use tracing::{debug, error, info, warn};

use crate::core::rng::DeterministicRng;
use crate::game::arena::Arena;
use crate::game::movement::{self, AdvanceResult};
use crate::game::state::{MatchPhase, PlayerId, PlayerKind, PositionState, NO_CLIENT_ID};
use crate::network::actor::{ActorCommand, PlayerActor};
use crate::network::protocol::{PlayerStatus, ServerMessage};
use crate::{ARENA_HEIGHT, ARENA_WIDTH, MAX_PLAYERS, TICK_RATE};

/// Capacity of each connection's outbound frame channel.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Capacity of each actor's control channel.
const CONTROL_CAPACITY: usize = 32;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Timing and sizing of a match.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Arena width in cells.
    pub width: i32,
    /// Arena height in cells.
    pub height: i32,
    /// Movement tick period.
    pub tick_period: Duration,
    /// Cells advanced per movement tick.
    pub steps_per_tick: usize,
    /// Rotation timer period.
    pub rotation_period: Duration,
    /// Degrees turned per rotation tick.
    pub rotation_step: i32,
    /// Shortest delay between trace toggles.
    pub trace_toggle_min: Duration,
    /// Longest delay between trace toggles (exclusive).
    pub trace_toggle_max: Duration,
    /// Initial headings are drawn from `[0, start_heading_range)` degrees.
    pub start_heading_range: u32,
    /// First countdown value.
    pub countdown_from: u8,
    /// Delay between countdown values.
    pub countdown_period: Duration,
    /// How long a match waits for its players before giving up.
    pub join_timeout: Duration,
    /// Lobby liveness probe timeout.
    pub probe_timeout: Duration,
    /// Match command channel capacity.
    pub command_capacity: usize,
    /// Fixed match seed; random when `None`.
    pub seed: Option<u64>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            width: ARENA_WIDTH,
            height: ARENA_HEIGHT,
            tick_period: Duration::from_millis(1000 / TICK_RATE as u64),
            steps_per_tick: movement::STEPS_PER_TICK,
            rotation_period: Duration::from_millis(30),
            rotation_step: 5,
            trace_toggle_min: Duration::from_millis(1000),
            trace_toggle_max: Duration::from_millis(2000),
            start_heading_range: 90,
            countdown_from: 3,
            countdown_period: Duration::from_secs(1),
            join_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_millis(200),
            command_capacity: 256,
            seed: None,
        }
    }
}

// =============================================================================
// IDENTIFIERS AND ERRORS
// =============================================================================

/// Opaque match identifier: 8 random bytes as 16 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MatchId(String);

impl MatchId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(hex::encode(rand::random::<[u8; 8]>()))
    }

    /// Parse an identifier received from a client.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == 16 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(s.to_string()))
    }

    /// The hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Match errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    /// Both player slots are taken.
    #[error("Match is full")]
    MatchFull,

    /// Registration after the countdown started.
    #[error("Match already started")]
    AlreadyStarted,

    /// The match loop is gone.
    #[error("Match has ended")]
    Closed,
}

/// Matchmaking errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// Nobody joined a waiting match in time.
    #[error("no active players to join")]
    NoActivePlayers,

    /// No open match appeared in time.
    #[error("no active games")]
    NoActiveGames,

    /// Unknown or finished match id.
    #[error("match not found")]
    MatchNotFound,

    /// The directory actor is gone.
    #[error("match directory unavailable")]
    DirectoryClosed,

    /// Registration into the match failed.
    #[error("{0}")]
    Match(#[from] MatchError),
}

// =============================================================================
// MATCH COMMANDS AND HANDLE
// =============================================================================

/// Requests processed by a match loop.
#[derive(Debug)]
pub enum MatchCommand {
    /// Add a player.
    Register {
        /// Human or bot.
        kind: PlayerKind,
        /// Where broadcasts for this player go.
        outbound: mpsc::Sender<String>,
        /// Assigned seat.
        reply: oneshot::Sender<Result<Seat, MatchError>>,
    },
    /// Run one movement tick for a player.
    Advance {
        /// Moving player.
        id: PlayerId,
        /// The actor's current position state.
        position: PositionState,
        /// Movement outcome.
        reply: oneshot::Sender<AdvanceResult>,
    },
    /// Position report while the match has not started.
    Heartbeat {
        /// Reporting player.
        id: PlayerId,
        /// The actor's current position state.
        position: PositionState,
    },
    /// Immutable copy of the arena for bot probes.
    Snapshot {
        /// Shared snapshot.
        reply: oneshot::Sender<Arc<Arena>>,
    },
    /// Client handshake.
    SetClientId {
        /// Player.
        id: PlayerId,
        /// Client session id.
        client_id: i64,
    },
    /// Send a message to every registered player.
    Broadcast {
        /// Message to send.
        message: ServerMessage,
    },
    /// A player crashed.
    EndGame {
        /// Crashed player.
        id: PlayerId,
    },
    /// A player's connection closed.
    Disconnect {
        /// Disconnected player.
        id: PlayerId,
    },
    /// Terminate the match without a winner.
    Abandon,
}

/// A registered player's slot and control channel.
#[derive(Debug, Clone)]
pub struct Seat {
    /// Assigned player id.
    pub id: PlayerId,
    /// Steering and lifecycle commands for the actor.
    pub control: mpsc::Sender<ActorCommand>,
}

/// Cloneable handle to a running match.
#[derive(Debug, Clone)]
pub struct MatchHandle {
    id: MatchId,
    commands: mpsc::Sender<MatchCommand>,
    phase: watch::Receiver<MatchPhase>,
}

impl MatchHandle {
    pub(crate) fn new(id: MatchId, commands: mpsc::Sender<MatchCommand>, phase: watch::Receiver<MatchPhase>) -> Self {
        Self { id, commands, phase }
    }

    /// Match identifier.
    pub fn id(&self) -> &MatchId {
        &self.id
    }

    /// Last published phase.
    pub fn phase(&self) -> MatchPhase {
        *self.phase.borrow()
    }

    /// Whether the match still accepts registrations.
    pub fn is_available(&self) -> bool {
        self.phase() == MatchPhase::WaitingForPlayers
    }

    /// Fresh phase receiver.
    pub fn subscribe(&self) -> watch::Receiver<MatchPhase> {
        self.phase.clone()
    }

    /// Wait until the match has ended.
    pub async fn closed(&self) {
        let mut phase = self.phase.clone();
        let _ = phase.wait_for(|p| p.is_ended()).await;
    }

    async fn send(&self, command: MatchCommand) -> Result<(), MatchError> {
        self.commands.send(command).await.map_err(|_| MatchError::Closed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> MatchCommand) -> Result<T, MatchError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| MatchError::Closed)
    }

    /// Register a player. Broadcasts for it go to `outbound`.
    pub async fn register(&self, kind: PlayerKind, outbound: mpsc::Sender<String>) -> Result<Seat, MatchError> {
        self.request(|reply| MatchCommand::Register { kind, outbound, reply }).await?
    }

    /// Advance a player by one movement tick.
    pub async fn advance(&self, id: PlayerId, position: PositionState) -> Result<AdvanceResult, MatchError> {
        self.request(|reply| MatchCommand::Advance { id, position, reply }).await
    }

    /// Report a position before the match has started.
    pub async fn heartbeat(&self, id: PlayerId, position: PositionState) -> Result<(), MatchError> {
        self.send(MatchCommand::Heartbeat { id, position }).await
    }

    /// Snapshot of the arena.
    pub async fn snapshot(&self) -> Result<Arc<Arena>, MatchError> {
        self.request(|reply| MatchCommand::Snapshot { reply }).await
    }

    /// Record a client handshake.
    pub async fn set_client_id(&self, id: PlayerId, client_id: i64) -> Result<(), MatchError> {
        self.send(MatchCommand::SetClientId { id, client_id }).await
    }

    /// Broadcast a message to all registered players.
    pub async fn broadcast(&self, message: ServerMessage) -> Result<(), MatchError> {
        self.send(MatchCommand::Broadcast { message }).await
    }

    /// Report a crash.
    pub async fn end_game(&self, id: PlayerId) -> Result<(), MatchError> {
        self.send(MatchCommand::EndGame { id }).await
    }

    /// Report a closed connection.
    pub async fn disconnect(&self, id: PlayerId) -> Result<(), MatchError> {
        self.send(MatchCommand::Disconnect { id }).await
    }

    /// Terminate the match.
    pub async fn abandon(&self) -> Result<(), MatchError> {
        self.send(MatchCommand::Abandon).await
    }
}

// =============================================================================
// MATCH SESSION
// =============================================================================

/// Registry entry for one player.
#[derive(Debug)]
struct RegisteredPlayer {
    kind: PlayerKind,
    alive: bool,
    client_id: i64,
    position: PositionState,
    outbound: mpsc::Sender<String>,
    control: mpsc::Sender<ActorCommand>,
}

/// What woke the match loop.
enum LoopEvent {
    Command(MatchCommand),
    Countdown,
    JoinTimeout,
    Closed,
}

/// A two-player match.
pub struct MatchSession {
    id: MatchId,
    config: MatchConfig,
    phase: MatchPhase,
    phase_tx: watch::Sender<MatchPhase>,
    arena: Arc<Arena>,
    players: BTreeMap<PlayerId, RegisteredPlayer>,
    winner: Option<PlayerId>,
    seed: u64,
    created_at: DateTime<Utc>,
    handle: MatchHandle,
}

impl MatchSession {
    /// Create a match and the receiving end of its command channel.
    pub fn new(id: MatchId, config: MatchConfig) -> (Self, mpsc::Receiver<MatchCommand>) {
        let (tx, rx) = mpsc::channel(config.command_capacity);
        let (phase_tx, phase_rx) = watch::channel(MatchPhase::WaitingForPlayers);
        let seed = config.seed.unwrap_or_else(rand::random);

        let session = Self {
            handle: MatchHandle::new(id.clone(), tx, phase_rx),
            id,
            arena: Arc::new(Arena::new(config.width, config.height)),
            config,
            phase: MatchPhase::WaitingForPlayers,
            phase_tx,
            players: BTreeMap::new(),
            winner: None,
            seed,
            created_at: Utc::now(),
        };
        (session, rx)
    }

    /// Match identifier.
    pub fn id(&self) -> &MatchId {
        &self.id
    }

    /// Current phase.
    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// Winner, once decided.
    pub fn winner(&self) -> Option<PlayerId> {
        self.winner
    }

    /// Registered player count.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Registered players still alive.
    pub fn alive_players(&self) -> Vec<PlayerId> {
        self.players.iter().filter(|(_, p)| p.alive).map(|(id, _)| *id).collect()
    }

    /// Whether the match accepts another player.
    pub fn is_available(&self) -> bool {
        self.phase == MatchPhase::WaitingForPlayers && self.players.len() < MAX_PLAYERS
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The arena.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Handle for talking to this match once its loop runs.
    pub fn handle(&self) -> MatchHandle {
        self.handle.clone()
    }

    /// Shared immutable arena snapshot.
    pub fn snapshot(&self) -> Arc<Arena> {
        Arc::clone(&self.arena)
    }

    fn set_phase(&mut self, phase: MatchPhase) {
        if self.phase != phase {
            debug!(match_id = %self.id, from = ?self.phase, to = ?phase, "Phase change");
            self.phase = phase;
            self.phase_tx.send_replace(phase);
        }
    }

    /// Add a player, spawn its actor, and broadcast every start position.
    ///
    /// The second registration moves the match into the countdown.
    pub fn register(&mut self, kind: PlayerKind, outbound: mpsc::Sender<String>) -> Result<Seat, MatchError> {
        if self.phase.is_ended() {
            return Err(MatchError::Closed);
        }
        if self.players.len() >= MAX_PLAYERS {
            return Err(MatchError::MatchFull);
        }
        if self.phase != MatchPhase::WaitingForPlayers {
            return Err(MatchError::AlreadyStarted);
        }

        let id = (0..MAX_PLAYERS as u8)
            .map(PlayerId::new)
            .find(|id| !self.players.contains_key(id))
            .ok_or(MatchError::MatchFull)?;

        let (control, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let mut actor = PlayerActor::new(
            id,
            kind,
            DeterministicRng::for_player(self.seed, id.index()),
            self.config.clone(),
            self.handle.clone(),
            control_rx,
        );
        let position = actor.init_player(Arc::make_mut(&mut self.arena));
        tokio::spawn(actor.run());

        self.players.insert(id, RegisteredPlayer {
            kind,
            alive: true,
            client_id: NO_CLIENT_ID,
            position,
            outbound,
            control: control.clone(),
        });
        info!(match_id = %self.id, player = %id, ?kind, "Player registered");

        self.broadcast_table();

        if self.players.len() == MAX_PLAYERS {
            self.set_phase(MatchPhase::Countdown);
        }
        Ok(Seat { id, control })
    }

    /// Tell every actor to start its movement loop.
    pub fn start_movement(&mut self) {
        for player in self.players.values() {
            if player.control.try_send(ActorCommand::StartMoving).is_err() {
                warn!(match_id = %self.id, "Actor did not accept start command");
            }
        }
    }

    /// Countdown finished: movement ticks now advance players.
    pub fn begin_playing(&mut self) {
        if self.phase == MatchPhase::Countdown {
            self.set_phase(MatchPhase::Active);
            info!(match_id = %self.id, "Match started");
        }
    }

    /// Run the movement engine for one player tick.
    ///
    /// Before the match starts, or for unknown and dead players, nothing
    /// moves and the reported position is echoed back.
    pub fn advance(&mut self, id: PlayerId, position: PositionState) -> AdvanceResult {
        let idle = AdvanceResult { x: position.x, y: position.y, steps: 0, collided: false };
        if !self.phase.is_started() {
            return idle;
        }
        match self.players.get(&id) {
            Some(player) if player.alive => {}
            _ => return idle,
        }

        let result = movement::advance(
            Arc::make_mut(&mut self.arena),
            id,
            position.x,
            position.y,
            position.rotation,
            position.trace,
            self.config.steps_per_tick,
        );

        if let Some(player) = self.players.get_mut(&id) {
            player.position = PositionState { x: result.x, y: result.y, ..position };
        }
        self.broadcast_position(id);
        result
    }

    /// Record a position reported before the match started.
    pub fn heartbeat(&mut self, id: PlayerId, position: PositionState) {
        if let Some(player) = self.players.get_mut(&id) {
            player.position = position;
            self.broadcast_position(id);
        }
    }

    /// Record a client handshake.
    pub fn set_client_id(&mut self, id: PlayerId, client_id: i64) {
        if let Some(player) = self.players.get_mut(&id) {
            debug!(match_id = %self.id, player = %id, client_id, "Client id set");
            player.client_id = client_id;
        }
    }

    /// Send the positions of all registered players in one message.
    fn broadcast_table(&mut self) {
        let players = self.players.iter()
            .map(|(id, player)| (id.to_string(), PlayerStatus::from_position(&player.position, player.client_id)))
            .collect();
        self.broadcast(&ServerMessage::Players { players });
    }

    fn broadcast_position(&mut self, id: PlayerId) {
        if let Some(player) = self.players.get(&id) {
            let status = PlayerStatus::from_position(&player.position, player.client_id);
            self.broadcast(&ServerMessage::player(id, status));
        }
    }

    /// Send a message to every registered player without blocking.
    ///
    /// A player whose channel is full or closed is dropped from the
    /// registry. Returns the number of players the message reached.
    pub fn broadcast(&mut self, message: &ServerMessage) -> usize {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!(match_id = %self.id, "Failed to serialize broadcast: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dropped = Vec::new();
        for (id, player) in &self.players {
            match player.outbound.try_send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(match_id = %self.id, player = %id, "Outbound channel full, dropping player");
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(match_id = %self.id, player = %id, "Outbound channel closed, dropping player");
                    dropped.push(*id);
                }
            }
        }

        for id in dropped {
            self.destroy_player(id);
        }
        delivered
    }

    /// A player crashed. Decides the winner once one player remains.
    ///
    /// Reports after the match has ended are ignored.
    pub fn report_death(&mut self, id: PlayerId) -> Option<PlayerId> {
        if self.phase.is_ended() {
            debug!(match_id = %self.id, player = %id, "Death report after match end ignored");
            return None;
        }
        if let Some(player) = self.players.get_mut(&id) {
            player.alive = false;
        }
        self.resolve()
    }

    /// End the match if at most one player is left alive.
    fn resolve(&mut self) -> Option<PlayerId> {
        match self.alive_players().as_slice() {
            [winner] => {
                let winner = *winner;
                self.declare_winner(winner);
                Some(winner)
            }
            [] => {
                info!(match_id = %self.id, "Match ended without survivors");
                self.finish();
                None
            }
            _ => None,
        }
    }

    fn declare_winner(&mut self, winner: PlayerId) {
        self.winner = Some(winner);
        info!(match_id = %self.id, winner = %winner, "Winner decided");
        self.broadcast(&ServerMessage::Winner { winner });
        self.finish();
    }

    fn finish(&mut self) {
        self.destroy_players();
        self.set_phase(MatchPhase::Ended);
    }

    /// A connection closed. Counts as a crash once the countdown started.
    pub fn disconnect(&mut self, id: PlayerId) {
        match self.phase {
            MatchPhase::WaitingForPlayers => {
                self.destroy_player(id);
            }
            MatchPhase::Countdown | MatchPhase::Active => {
                info!(match_id = %self.id, player = %id, "Player disconnected");
                self.report_death(id);
                self.destroy_player(id);
            }
            MatchPhase::Ended => {}
        }
    }

    /// Terminate the match without a winner.
    pub fn abandon(&mut self, reason: &str) {
        if !self.phase.is_ended() {
            info!(match_id = %self.id, "Match abandoned: {}", reason);
            self.finish();
        }
    }

    /// Declare a winner when players were lost to closed channels
    /// after the countdown started.
    fn settle(&mut self) {
        let running = matches!(self.phase, MatchPhase::Countdown | MatchPhase::Active);
        if running && self.players.len() < MAX_PLAYERS {
            self.resolve();
        }
    }

    /// Remove a player, release its outbound channel, and stop its actor.
    ///
    /// Returns `false` if the player was not registered.
    pub fn destroy_player(&mut self, id: PlayerId) -> bool {
        match self.players.remove(&id) {
            Some(player) => {
                let _ = player.control.try_send(ActorCommand::Destroy);
                debug!(match_id = %self.id, player = %id, kind = ?player.kind, "Player removed");
                true
            }
            None => false,
        }
    }

    /// Remove every player.
    pub fn destroy_players(&mut self) {
        let ids: Vec<PlayerId> = self.players.keys().copied().collect();
        for id in ids {
            self.destroy_player(id);
        }
    }

    fn handle_command(&mut self, command: MatchCommand) {
        match command {
            MatchCommand::Register { kind, outbound, reply } => {
                let result = self.register(kind, outbound);
                let _ = reply.send(result);
            }
            MatchCommand::Advance { id, position, reply } => {
                let result = self.advance(id, position);
                let _ = reply.send(result);
            }
            MatchCommand::Heartbeat { id, position } => self.heartbeat(id, position),
            MatchCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            MatchCommand::SetClientId { id, client_id } => self.set_client_id(id, client_id),
            MatchCommand::Broadcast { message } => {
                self.broadcast(&message);
            }
            MatchCommand::EndGame { id } => {
                self.report_death(id);
            }
            MatchCommand::Disconnect { id } => self.disconnect(id),
            MatchCommand::Abandon => self.abandon("terminated"),
        }
    }

    /// Run the match loop until the match ends, then leave the directory.
    pub async fn run(mut self, mut commands: mpsc::Receiver<MatchCommand>, directory: Option<DirectoryHandle>) {
        info!(match_id = %self.id, "Match created");

        let join_deadline = sleep(self.config.join_timeout);
        tokio::pin!(join_deadline);
        let mut countdown: Option<Interval> = None;
        let mut remaining = self.config.countdown_from;

        while !self.phase.is_ended() {
            let waiting = self.phase == MatchPhase::WaitingForPlayers;
            let event = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => LoopEvent::Command(command),
                    None => LoopEvent::Closed,
                },
                _ = &mut join_deadline, if waiting => LoopEvent::JoinTimeout,
                _ = wait_interval(&mut countdown) => LoopEvent::Countdown,
            };

            match event {
                LoopEvent::Command(command) => {
                    self.handle_command(command);
                    if self.phase == MatchPhase::Countdown && countdown.is_none() {
                        self.start_movement();
                        let period = self.config.countdown_period;
                        countdown = Some(interval_at(Instant::now() + period, period));
                    }
                }
                LoopEvent::Countdown => {
                    self.broadcast(&ServerMessage::Countdown { countdown: remaining });
                    if remaining == 0 {
                        countdown = None;
                        self.begin_playing();
                    } else {
                        remaining -= 1;
                    }
                }
                LoopEvent::JoinTimeout => self.abandon("no active players to join"),
                LoopEvent::Closed => self.abandon("command channel closed"),
            }

            self.settle();
        }

        if let Some(directory) = directory {
            directory.remove(self.id.clone()).await;
        }
        info!(match_id = %self.id, winner = ?self.winner, "Match loop finished");
    }
}

/// Resolve on the next tick; pending forever with no interval.
async fn wait_interval(slot: &mut Option<Interval>) {
    match slot {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

/// Spawn a match loop and return its handle.
pub fn spawn_match(id: MatchId, config: MatchConfig, directory: Option<DirectoryHandle>) -> MatchHandle {
    let (session, commands) = MatchSession::new(id, config);
    let handle = session.handle();
    tokio::spawn(session.run(commands, directory));
    handle
}

// =============================================================================
// MATCH DIRECTORY
// =============================================================================

/// Directory bookkeeping for one match.
struct DirectoryEntry {
    handle: MatchHandle,
    created_at: DateTime<Utc>,
    sequence: u64,
    /// Present while the creator waits for a polling joiner.
    waiter: Option<oneshot::Sender<()>>,
}

/// Requests processed by the directory actor.
enum DirectoryCommand {
    Create {
        waiter: Option<oneshot::Sender<()>>,
        reply: oneshot::Sender<MatchHandle>,
    },
    Get {
        id: MatchId,
        reply: oneshot::Sender<Option<MatchHandle>>,
    },
    Remove {
        id: MatchId,
    },
    ClaimOldest {
        reply: oneshot::Sender<Option<MatchHandle>>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Set of active matches.
pub struct MatchDirectory {
    matches: BTreeMap<MatchId, DirectoryEntry>,
    config: MatchConfig,
    next_sequence: u64,
    commands: mpsc::Receiver<DirectoryCommand>,
    handle: DirectoryHandle,
}

impl MatchDirectory {
    fn create(&mut self, waiter: Option<oneshot::Sender<()>>) -> MatchHandle {
        let id = MatchId::generate();
        let handle = spawn_match(id.clone(), self.config.clone(), Some(self.handle.clone()));

        self.next_sequence += 1;
        self.matches.insert(id, DirectoryEntry {
            handle: handle.clone(),
            created_at: Utc::now(),
            sequence: self.next_sequence,
            waiter,
        });
        handle
    }

    /// Hand the oldest waiting match to a polling joiner.
    fn claim_oldest(&mut self) -> Option<MatchHandle> {
        let mut open: Vec<(DateTime<Utc>, u64, MatchId)> = self.matches.iter()
            .filter(|(_, e)| e.waiter.is_some() && e.handle.is_available())
            .map(|(id, e)| (e.created_at, e.sequence, id.clone()))
            .collect();
        open.sort();

        for (_, _, id) in open {
            let Some(entry) = self.matches.get_mut(&id) else { continue };
            let Some(waiter) = entry.waiter.take() else { continue };
            if waiter.send(()).is_ok() {
                info!(match_id = %id, "Match claimed by joiner");
                return Some(entry.handle.clone());
            }
        }
        None
    }

    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                DirectoryCommand::Create { waiter, reply } => {
                    let handle = self.create(waiter);
                    let _ = reply.send(handle);
                }
                DirectoryCommand::Get { id, reply } => {
                    let _ = reply.send(self.matches.get(&id).map(|e| e.handle.clone()));
                }
                DirectoryCommand::Remove { id } => {
                    if self.matches.remove(&id).is_some() {
                        info!(match_id = %id, "Match removed");
                    }
                }
                DirectoryCommand::ClaimOldest { reply } => {
                    let _ = reply.send(self.claim_oldest());
                }
                DirectoryCommand::Count { reply } => {
                    let _ = reply.send(self.matches.len());
                }
            }
        }
    }
}

/// Cloneable handle to the match directory.
#[derive(Clone)]
pub struct DirectoryHandle {
    commands: mpsc::Sender<DirectoryCommand>,
}

impl DirectoryHandle {
    /// Spawn the directory actor.
    pub fn spawn(config: MatchConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.command_capacity);
        let handle = Self { commands: tx };
        let directory = MatchDirectory {
            matches: BTreeMap::new(),
            config,
            next_sequence: 0,
            commands: rx,
            handle: handle.clone(),
        };
        tokio::spawn(directory.run());
        handle
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> DirectoryCommand) -> Result<T, JoinError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await.map_err(|_| JoinError::DirectoryClosed)?;
        rx.await.map_err(|_| JoinError::DirectoryClosed)
    }

    /// Create a match reserved for its creator.
    pub async fn create(&self) -> Result<MatchHandle, JoinError> {
        self.request(|reply| DirectoryCommand::Create { waiter: None, reply }).await
    }

    /// Look up an active match.
    pub async fn get(&self, id: &MatchId) -> Option<MatchHandle> {
        let id = id.clone();
        self.request(|reply| DirectoryCommand::Get { id, reply }).await.ok().flatten()
    }

    /// Forget a match. Unknown ids are ignored.
    pub async fn remove(&self, id: MatchId) {
        let _ = self.commands.send(DirectoryCommand::Remove { id }).await;
    }

    /// Claim the oldest match waiting for a joiner.
    pub async fn claim_oldest_available(&self) -> Option<MatchHandle> {
        self.request(|reply| DirectoryCommand::ClaimOldest { reply }).await.ok().flatten()
    }

    /// Number of active matches.
    pub async fn active_count(&self) -> usize {
        self.request(|reply| DirectoryCommand::Count { reply }).await.unwrap_or(0)
    }

    /// Create a match and wait for a polling joiner to claim it.
    pub async fn create_and_wait(&self, wait: Duration) -> Result<MatchId, JoinError> {
        let (notify, claimed) = oneshot::channel();
        let handle = self.request(|reply| DirectoryCommand::Create { waiter: Some(notify), reply }).await?;
        let id = handle.id().clone();

        match timeout(wait, claimed).await {
            Ok(Ok(())) => Ok(id),
            _ => {
                info!(match_id = %id, "No player joined in time");
                self.remove(id).await;
                let _ = handle.abandon().await;
                Err(JoinError::NoActivePlayers)
            }
        }
    }

    /// Poll for a waiting match until one is claimed or `wait` elapses.
    pub async fn find_and_join(&self, wait: Duration, poll: Duration) -> Result<MatchId, JoinError> {
        let deadline = Instant::now() + wait;
        let mut ticker = interval(poll);

        loop {
            ticker.tick().await;
            if let Some(handle) = self.claim_oldest_available().await {
                return Ok(handle.id().clone());
            }
            if Instant::now() >= deadline {
                return Err(JoinError::NoActiveGames);
            }
        }
    }

    /// Create a match with a bot already registered as player 0.
    pub async fn create_single_player(&self) -> Result<MatchId, JoinError> {
        let handle = self.create().await?;

        // Bots ignore broadcasts
        let (outbound, mut sink) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        tokio::spawn(async move { while sink.recv().await.is_some() {} });

        handle.register(PlayerKind::Bot, outbound).await?;
        Ok(handle.id().clone())
    }
}
