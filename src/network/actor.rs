//! Player Actors
//!
//! Each player runs as its own task. The task owns the player's position
//! state and timers; the arena and the registry stay with the match loop,
//! which the actor talks to through its [`MatchHandle`].
//!
//! Timers driven by the actor:
//! - movement tick (10 Hz): heartbeat before the match starts, advance after
//! - trace toggle: re-armed with a fresh random delay after every toggle
//! - rotation: only while a turn is held, one timer at most

use std::future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::heading::{Heading, RotationDirection};
use crate::core::rng::DeterministicRng;
use crate::game::arena::Arena;
use crate::game::bot;
use crate::game::state::{ActorPhase, MatchPhase, PlayerId, PlayerKind, PositionState};
use crate::network::protocol::SteerCommand;
use crate::network::session::{MatchConfig, MatchError, MatchHandle};

/// Commands delivered to an actor by its match or its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorCommand {
    /// Countdown entered: start the movement loop.
    StartMoving,
    /// Key press or release from a human client.
    Steer(SteerCommand),
    /// Stop all timers and exit.
    Destroy,
}

/// The single rotation timer slot.
#[derive(Debug)]
struct RotationTimer {
    direction: RotationDirection,
    interval: Interval,
}

/// What woke the movement loop.
enum ActorEvent {
    Tick,
    Rotate,
    ToggleTrace,
    Control(Option<ActorCommand>),
    PhaseChanged(bool),
}

/// One player in one match.
pub struct PlayerActor {
    id: PlayerId,
    kind: PlayerKind,
    phase: ActorPhase,
    alive: bool,
    destroyed: bool,
    position: PositionState,
    rotation: Option<RotationTimer>,
    rng: DeterministicRng,
    config: MatchConfig,
    game: MatchHandle,
    match_phase: watch::Receiver<MatchPhase>,
    control: mpsc::Receiver<ActorCommand>,
}

impl PlayerActor {
    /// Create an actor. It is not on the arena until [`init_player`](Self::init_player).
    pub fn new(
        id: PlayerId,
        kind: PlayerKind,
        rng: DeterministicRng,
        config: MatchConfig,
        game: MatchHandle,
        control: mpsc::Receiver<ActorCommand>,
    ) -> Self {
        let match_phase = game.subscribe();
        Self {
            id,
            kind,
            phase: ActorPhase::Initializing,
            alive: true,
            destroyed: false,
            position: PositionState::new(0, 0, Heading::EAST),
            rotation: None,
            rng,
            config,
            game,
            match_phase,
            control,
        }
    }

    /// Place the player on its start cell with a random heading and mark
    /// the cell as owned.
    pub fn init_player(&mut self, arena: &mut Arena) -> PositionState {
        let heading = Heading::new(self.rng.next_int(self.config.start_heading_range) as i32);
        self.position = PositionState::spawn(self.id, arena.width(), arena.height(), heading);
        arena.set_used(self.position.x, self.position.y, self.id);
        self.phase = ActorPhase::Idle;

        debug!(
            player = %self.id,
            x = self.position.x,
            y = self.position.y,
            heading = %heading,
            "Player placed"
        );
        self.position
    }

    /// Player slot.
    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Current position snapshot.
    pub fn position(&self) -> PositionState {
        self.position
    }

    /// Lifecycle phase.
    pub fn phase(&self) -> ActorPhase {
        self.phase
    }

    /// Whether the player is still in the game.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Whether a rotation timer is currently running.
    pub fn is_rotating(&self) -> bool {
        self.rotation.is_some()
    }

    // =========================================================================
    // STEERING
    // =========================================================================

    /// Start rotating, replacing any running rotation timer.
    pub fn start_rotation(&mut self, direction: RotationDirection) {
        let period = self.config.rotation_period;
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Assigning the slot drops the previous timer
        self.rotation = Some(RotationTimer { direction, interval });
        self.position.rotation_dir = Some(direction);
    }

    /// Stop rotating. No-op when not rotating.
    pub fn stop_rotation(&mut self) {
        self.rotation = None;
        self.position.rotation_dir = None;
    }

    /// Apply one rotation step in the active direction.
    fn apply_rotation(&mut self) {
        if let Some(timer) = &self.rotation {
            self.position.rotation = self.position.rotation.rotated(timer.direction, self.config.rotation_step);
        }
    }

    /// Handle a key press or release.
    pub fn steer(&mut self, command: SteerCommand) {
        match command {
            SteerCommand::Press(direction) => self.start_rotation(direction),
            SteerCommand::Release => self.stop_rotation(),
        }
    }

    fn next_trace_delay(&mut self) -> Duration {
        let min = self.config.trace_toggle_min.as_millis() as u32;
        let max = self.config.trace_toggle_max.as_millis() as u32;
        Duration::from_millis(self.rng.next_in_range(min, max) as u64)
    }

    /// Point a bot at the longest free ray.
    async fn steer_bot(&mut self) -> Result<(), MatchError> {
        let arena = self.game.snapshot().await?;
        let target = bot::find_farthest_heading(arena, self.position.x, self.position.y).await;

        match bot::steer(self.position.rotation, target, self.config.rotation_step) {
            None => self.stop_rotation(),
            Some(direction) if self.position.rotation_dir != Some(direction) => {
                self.start_rotation(direction);
            }
            Some(_) => {}
        }
        Ok(())
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Stop all timers and mark the actor dead.
    ///
    /// Returns `false` if the actor was already destroyed.
    pub fn destroy(&mut self) -> bool {
        if self.destroyed {
            return false;
        }
        self.destroyed = true;
        self.alive = false;
        self.stop_rotation();
        self.phase = ActorPhase::Dead;
        debug!(player = %self.id, "Actor destroyed");
        true
    }

    /// Run until destroyed, dead, or the match ends.
    pub async fn run(mut self) {
        if self.wait_for_start().await {
            self.phase = ActorPhase::Moving;
            self.move_loop().await;
        }
        self.destroy();
    }

    /// Idle until the countdown starts. Returns `false` if the actor should exit.
    ///
    /// The last steering command received while idle takes effect on start.
    async fn wait_for_start(&mut self) -> bool {
        let mut held = None;
        loop {
            tokio::select! {
                command = self.control.recv() => match command {
                    Some(ActorCommand::StartMoving) => {
                        if let Some(command) = held {
                            self.steer(command);
                        }
                        return true;
                    }
                    Some(ActorCommand::Steer(command)) => {
                        if self.kind == PlayerKind::Human {
                            debug!(player = %self.id, ?command, "Steering held until countdown");
                            held = Some(command);
                        }
                    }
                    Some(ActorCommand::Destroy) | None => return false,
                },
                changed = self.match_phase.changed() => {
                    if changed.is_err() || self.match_phase.borrow().is_ended() {
                        return false;
                    }
                }
            }
        }
    }

    async fn move_loop(&mut self) {
        let mut tick = interval(self.config.tick_period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let first_toggle = self.next_trace_delay();
        let trace_toggle = sleep(first_toggle);
        tokio::pin!(trace_toggle);

        loop {
            let event = tokio::select! {
                _ = tick.tick() => ActorEvent::Tick,
                _ = wait_rotation(&mut self.rotation) => ActorEvent::Rotate,
                _ = &mut trace_toggle => ActorEvent::ToggleTrace,
                command = self.control.recv() => ActorEvent::Control(command),
                changed = self.match_phase.changed() => ActorEvent::PhaseChanged(changed.is_ok()),
            };

            match event {
                ActorEvent::Tick => {
                    if !self.on_tick().await {
                        break;
                    }
                }
                ActorEvent::Rotate => self.apply_rotation(),
                ActorEvent::ToggleTrace => {
                    self.position.toggle_trace();
                    let delay = self.next_trace_delay();
                    trace_toggle.as_mut().reset(Instant::now() + delay);
                }
                ActorEvent::Control(Some(ActorCommand::Steer(command))) => {
                    if self.kind == PlayerKind::Human {
                        self.steer(command);
                    }
                }
                ActorEvent::Control(Some(ActorCommand::StartMoving)) => {}
                ActorEvent::Control(Some(ActorCommand::Destroy)) | ActorEvent::Control(None) => break,
                ActorEvent::PhaseChanged(ok) => {
                    if !ok || self.match_phase.borrow().is_ended() {
                        break;
                    }
                }
            }
        }
    }

    /// One movement tick. Returns `false` when the loop should stop.
    async fn on_tick(&mut self) -> bool {
        let phase = *self.match_phase.borrow();
        if phase.is_ended() || !self.alive {
            return false;
        }

        if !phase.is_started() {
            return self.game.heartbeat(self.id, self.position).await.is_ok();
        }

        if self.kind == PlayerKind::Bot {
            if let Err(e) = self.steer_bot().await {
                debug!(player = %self.id, "Bot snapshot unavailable: {}", e);
                return false;
            }
        }

        let result = match self.game.advance(self.id, self.position).await {
            Ok(result) => result,
            Err(e) => {
                debug!(player = %self.id, "Advance rejected: {}", e);
                return false;
            }
        };

        self.position.x = result.x;
        self.position.y = result.y;

        if result.collided {
            info!(player = %self.id, x = result.x, y = result.y, "Player crashed");
            self.alive = false;
            self.phase = ActorPhase::Dead;
            if let Err(e) = self.game.end_game(self.id).await {
                warn!(player = %self.id, "Failed to report crash: {}", e);
            }
            return false;
        }
        true
    }
}

/// Resolve on the next rotation tick; pending forever with no timer.
async fn wait_rotation(slot: &mut Option<RotationTimer>) {
    match slot {
        Some(timer) => {
            timer.interval.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::game::movement::AdvanceResult;
    use crate::network::session::{MatchCommand, MatchId};

    struct Harness {
        actor: PlayerActor,
        commands: mpsc::Receiver<MatchCommand>,
        control: mpsc::Sender<ActorCommand>,
        phase: watch::Sender<MatchPhase>,
    }

    fn harness(kind: PlayerKind) -> Harness {
        let (tx, commands) = mpsc::channel(64);
        let (phase, phase_rx) = watch::channel(MatchPhase::WaitingForPlayers);
        let handle = MatchHandle::new(MatchId::generate(), tx, phase_rx);
        let (control, control_rx) = mpsc::channel(8);
        let actor = PlayerActor::new(
            PlayerId::new(0),
            kind,
            DeterministicRng::new(7),
            MatchConfig::default(),
            handle,
            control_rx,
        );
        Harness { actor, commands, control, phase }
    }

    #[tokio::test]
    async fn test_init_player() {
        let mut h = harness(PlayerKind::Human);
        let mut arena = Arena::new(500, 600);
        let position = h.actor.init_player(&mut arena);

        assert_eq!((position.x, position.y), (250, 120));
        assert!(position.rotation.degrees() < 90);
        assert!(position.trace);
        assert_eq!(arena.owner(250, 120), Some(PlayerId::new(0)));
        assert_eq!(h.actor.phase(), ActorPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_steps_every_period() {
        let mut h = harness(PlayerKind::Human);
        h.actor.position.rotation = Heading::new(10);

        let start = Instant::now();
        h.actor.steer(SteerCommand::Press(RotationDirection::Right));
        for i in 1..=6 {
            wait_rotation(&mut h.actor.rotation).await;
            h.actor.apply_rotation();
            assert_eq!(h.actor.position().rotation.degrees(), 10 + 5 * i);
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(180));
        assert!(elapsed < Duration::from_millis(210));

        // Switching direction replaces the timer
        h.actor.steer(SteerCommand::Press(RotationDirection::Left));
        for i in 1..=10i32 {
            wait_rotation(&mut h.actor.rotation).await;
            h.actor.apply_rotation();
            assert_eq!(h.actor.position().rotation.degrees(), (40 - 5 * i).rem_euclid(360));
        }
        assert_eq!(h.actor.position().rotation.degrees(), 350);
        assert_eq!(h.actor.position().rotation_dir, Some(RotationDirection::Left));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_stops_rotation() {
        let mut h = harness(PlayerKind::Human);
        h.actor.steer(SteerCommand::Press(RotationDirection::Left));
        assert!(h.actor.is_rotating());

        h.actor.steer(SteerCommand::Release);
        assert!(!h.actor.is_rotating());
        assert_eq!(h.actor.position().rotation_dir, None);

        let waited = tokio::time::timeout(Duration::from_millis(100), wait_rotation(&mut h.actor.rotation)).await;
        assert!(waited.is_err());

        // Releasing again is harmless
        h.actor.stop_rotation();
        assert!(!h.actor.is_rotating());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let mut h = harness(PlayerKind::Human);
        h.actor.start_rotation(RotationDirection::Right);

        assert!(h.actor.destroy());
        assert!(!h.actor.destroy());
        assert_eq!(h.actor.phase(), ActorPhase::Dead);
        assert!(!h.actor.is_rotating());
        assert!(!h.actor.is_alive());
    }

    #[tokio::test]
    async fn test_bot_turns_away_from_wall() {
        let Harness { mut actor, mut commands, control: _control, phase: _phase } = harness(PlayerKind::Bot);
        actor.position = PositionState::new(290, 300, Heading::EAST);

        let mut arena = Arena::new(500, 600);
        for y in 0..600 {
            arena.set_used(300, y, PlayerId::new(1));
        }
        let arena = Arc::new(arena);

        let server = tokio::spawn(async move {
            if let Some(MatchCommand::Snapshot { reply }) = commands.recv().await {
                let _ = reply.send(arena);
            }
        });

        actor.steer_bot().await.unwrap();
        server.await.unwrap();
        assert!(actor.is_rotating());
        assert!(actor.position().rotation_dir.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_reports_end_of_game() {
        let Harness { actor, mut commands, control, phase } = harness(PlayerKind::Human);

        phase.send_replace(MatchPhase::Active);
        let task = tokio::spawn(actor.run());
        control.send(ActorCommand::StartMoving).await.unwrap();

        match commands.recv().await {
            Some(MatchCommand::Advance { id, reply, .. }) => {
                assert_eq!(id, PlayerId::new(0));
                let _ = reply.send(AdvanceResult { x: 1, y: 1, steps: 0, collided: true });
            }
            other => panic!("expected advance, got {:?}", other),
        }

        match commands.recv().await {
            Some(MatchCommand::EndGame { id }) => assert_eq!(id, PlayerId::new(0)),
            other => panic!("expected end of game, got {:?}", other),
        }

        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_before_start() {
        let Harness { actor, mut commands, control, phase: _phase } = harness(PlayerKind::Human);

        let task = tokio::spawn(actor.run());
        control.send(ActorCommand::StartMoving).await.unwrap();

        match commands.recv().await {
            Some(MatchCommand::Heartbeat { id, .. }) => assert_eq!(id, PlayerId::new(0)),
            other => panic!("expected heartbeat, got {:?}", other),
        }

        control.send(ActorCommand::Destroy).await.unwrap();
        task.await.unwrap();
    }

    async fn next_heartbeat(commands: &mut mpsc::Receiver<MatchCommand>) -> PositionState {
        loop {
            match commands.recv().await {
                Some(MatchCommand::Heartbeat { position, .. }) => return position,
                Some(_) => continue,
                None => panic!("actor stopped"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_held_before_countdown_rotates_on_start() {
        let Harness { actor, mut commands, control, phase: _phase } = harness(PlayerKind::Human);

        let task = tokio::spawn(actor.run());
        control.send(ActorCommand::Steer(SteerCommand::Press(RotationDirection::Right))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        control.send(ActorCommand::StartMoving).await.unwrap();

        let first = next_heartbeat(&mut commands).await;
        assert_eq!(first.rotation_dir, Some(RotationDirection::Right));

        // Three rotation periods fit before the next tick
        let second = next_heartbeat(&mut commands).await;
        assert_eq!(first.rotation.clockwise_delta_to(second.rotation), 15);

        control.send(ActorCommand::Destroy).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_trace_toggles_at_random_intervals() {
        let Harness { actor, mut commands, control, phase: _phase } = harness(PlayerKind::Human);
        let tick = MatchConfig::default().tick_period;

        let task = tokio::spawn(actor.run());
        control.send(ActorCommand::StartMoving).await.unwrap();

        let start = Instant::now();
        let mut trace = next_heartbeat(&mut commands).await.trace;
        let mut flips = Vec::new();
        while start.elapsed() < Duration::from_secs(10) {
            let position = next_heartbeat(&mut commands).await;
            if position.trace != trace {
                trace = position.trace;
                flips.push(start.elapsed());
            }
        }
        control.send(ActorCommand::Destroy).await.unwrap();
        task.await.unwrap();

        assert!(flips.len() >= 4, "only {} toggles", flips.len());

        // Heartbeats observe a toggle up to one tick late
        for pair in flips.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap > Duration::from_millis(1000) - tick, "gap {:?}", gap);
            assert!(gap < Duration::from_millis(2000) + tick, "gap {:?}", gap);
        }
    }
}
