//! Lobby Matchmaking
//!
//! FIFO queue of waiting connections. Whenever two candidates are queued
//! the lobby probes them for liveness, discarding dead ones, and sends a
//! live pair to a freshly created match.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::network::protocol::{MatchmakingReply, PING};
use crate::network::session::{DirectoryHandle, MatchId};

/// A connection waiting in the lobby.
#[derive(Debug)]
pub struct Candidate {
    label: String,
    outbound: mpsc::Sender<String>,
    replies: mpsc::Receiver<String>,
}

impl Candidate {
    /// Wrap a connection's outbound frames and inbound replies.
    pub fn new(label: impl Into<String>, outbound: mpsc::Sender<String>, replies: mpsc::Receiver<String>) -> Self {
        Self { label: label.into(), outbound, replies }
    }

    /// Name used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Send `ping` and wait up to `wait` for any reply.
    pub async fn is_connected(&mut self, wait: Duration) -> bool {
        // Replies that arrived before this probe don't count
        loop {
            match self.replies.try_recv() {
                Ok(_) => continue,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return false,
            }
        }

        let probe = async {
            self.outbound.send(PING.to_string()).await.ok()?;
            self.replies.recv().await
        };
        matches!(timeout(wait, probe).await, Ok(Some(_)))
    }

    /// Tell the candidate which match to join.
    async fn redirect(&self, id: &MatchId) -> bool {
        let reply = MatchmakingReply::Redirect { game_id: id.to_string() };
        match reply.to_json() {
            Ok(text) => self.outbound.send(text).await.is_ok(),
            Err(e) => {
                error!("Failed to serialize redirect: {}", e);
                false
            }
        }
    }
}

/// The lobby queue.
pub struct Lobby {
    queue: VecDeque<Candidate>,
    directory: DirectoryHandle,
    probe_timeout: Duration,
}

impl Lobby {
    /// Create an empty lobby.
    pub fn new(directory: DirectoryHandle, probe_timeout: Duration) -> Self {
        Self { queue: VecDeque::new(), directory, probe_timeout }
    }

    /// Spawn the lobby task.
    pub fn spawn(directory: DirectoryHandle, probe_timeout: Duration) -> LobbyHandle {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(Self::new(directory, probe_timeout).run(rx));
        LobbyHandle { candidates: tx }
    }

    /// Candidates waiting.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Append a candidate.
    pub fn push(&mut self, candidate: Candidate) {
        debug!(candidate = %candidate.label, "Candidate queued");
        self.queue.push_back(candidate);
    }

    /// Pop candidates until one answers the probe.
    async fn next_live_candidate(&mut self) -> Option<Candidate> {
        while let Some(mut candidate) = self.queue.pop_front() {
            if candidate.is_connected(self.probe_timeout).await {
                return Some(candidate);
            }
            debug!(candidate = %candidate.label, "Discarding unresponsive candidate");
        }
        None
    }

    /// Try to pair the two oldest live candidates into a new match.
    ///
    /// Without a second live candidate, the first goes back to the front.
    pub async fn try_pair(&mut self) -> Option<MatchId> {
        let first = self.next_live_candidate().await?;
        let second = match self.next_live_candidate().await {
            Some(candidate) => candidate,
            None => {
                self.queue.push_front(first);
                return None;
            }
        };

        let handle = match self.directory.create().await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Lobby could not create match: {}", e);
                self.queue.push_front(second);
                self.queue.push_front(first);
                return None;
            }
        };
        let id = handle.id().clone();

        let delivered = first.redirect(&id).await & second.redirect(&id).await;
        if !delivered {
            warn!(match_id = %id, "Redirect not delivered to both candidates");
        }
        info!(match_id = %id, first = %first.label, second = %second.label, "Lobby paired players");
        Some(id)
    }

    async fn run(mut self, mut candidates: mpsc::Receiver<Candidate>) {
        while let Some(candidate) = candidates.recv().await {
            self.push(candidate);
            while self.queue.len() >= 2 {
                if self.try_pair().await.is_none() {
                    break;
                }
            }
        }
    }
}

/// Handle for enqueueing lobby candidates.
#[derive(Clone)]
pub struct LobbyHandle {
    candidates: mpsc::Sender<Candidate>,
}

impl LobbyHandle {
    /// Queue a candidate. Returns `false` if the lobby is gone.
    pub async fn join(&self, candidate: Candidate) -> bool {
        self.candidates.send(candidate).await.is_ok()
    }
}
