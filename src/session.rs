//! Session registry for the two peer slots.

use crate::games::tictactoe::{Player, Role};
use crate::protocol::ServerMessage;
use derive_more::{Display, Error};
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

/// Whether a session's connection is still usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Liveness {
    /// Connection open and queue accepting messages.
    #[display("connected")]
    Connected,
    /// Peer quit, dropped, or stopped draining its queue.
    #[display("disconnected")]
    Disconnected,
}

/// Registration refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum RegistryError {
    /// Both roles are already assigned.
    #[display("Game already has 2 players")]
    Full,
}

/// A message could not be queued for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum SendError {
    /// No live session holds this role.
    #[display("{} is not connected", _0)]
    Disconnected(#[error(not(source))] Player),
    /// The peer's outbound queue is full; it is not keeping up.
    #[display("{} outbound queue is full", _0)]
    QueueFull(#[error(not(source))] Player),
}

/// Server-side record of one connected peer. Its role is the registry
/// slot it occupies.
#[derive(Debug)]
pub struct PlayerSession {
    peer: SocketAddr,
    liveness: Liveness,
    outbound: Option<mpsc::Sender<ServerMessage>>,
}

impl PlayerSession {
    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Current liveness.
    pub fn liveness(&self) -> Liveness {
        self.liveness
    }
}

/// Tracks the (at most two) peers, their roles and liveness.
///
/// Roles are handed out in registration order: first X, then O.
/// Each session gets a bounded outbound queue; the connection task
/// drains it onto the socket.
#[derive(Debug)]
pub struct SessionRegistry {
    slots: Mutex<[Option<PlayerSession>; 2]>,
    registered: watch::Sender<usize>,
    queue_capacity: usize,
}

impl SessionRegistry {
    /// Creates an empty registry whose per-peer queues hold `queue_capacity` lines.
    pub fn new(queue_capacity: usize) -> Self {
        let (registered, _) = watch::channel(0);
        Self {
            slots: Mutex::new([None, None]),
            registered,
            queue_capacity: queue_capacity.max(1),
        }
    }

    fn slots(&self) -> MutexGuard<'_, [Option<PlayerSession>; 2]> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assigns the next free role to a new connection.
    ///
    /// Returns the role and the receiving end of its outbound queue.
    #[instrument(skip(self))]
    pub fn register(
        &self,
        peer: SocketAddr,
    ) -> Result<(Role, mpsc::Receiver<ServerMessage>), RegistryError> {
        let mut slots = self.slots();
        let Some(role) = Player::ALL
            .into_iter()
            .find(|role| slots[role.index()].is_none())
        else {
            warn!("Registry full, rejecting connection");
            return Err(RegistryError::Full);
        };

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        slots[role.index()] = Some(PlayerSession {
            peer,
            liveness: Liveness::Connected,
            outbound: Some(tx),
        });
        let count = slots.iter().flatten().count();
        drop(slots);

        self.registered.send_replace(count);
        info!(%role, count, "Player registered");
        Ok((role, rx))
    }

    /// Suspends until both roles have been registered.
    pub async fn await_peer(&self) {
        let mut rx = self.registered.subscribe();
        if rx.wait_for(|count| *count >= 2).await.is_err() {
            // Unreachable while `self` holds the sender.
            warn!("Registration channel closed");
        }
    }

    /// True once both roles are assigned.
    pub fn is_full(&self) -> bool {
        self.slots().iter().all(Option::is_some)
    }

    /// Number of registered sessions, connected or not.
    pub fn registered(&self) -> usize {
        self.slots().iter().flatten().count()
    }

    /// Liveness of the session holding `role`, if registered.
    pub fn liveness(&self, role: Role) -> Option<Liveness> {
        self.slots()[role.index()].as_ref().map(PlayerSession::liveness)
    }

    /// Remote address of the session holding `role`, if registered.
    pub fn peer_addr(&self, role: Role) -> Option<SocketAddr> {
        self.slots()[role.index()].as_ref().map(PlayerSession::peer)
    }

    /// Frees the slot held by `role` so a later connection can take it.
    ///
    /// Only meaningful before the game starts; once both roles are
    /// assigned they are never handed out again.
    #[instrument(skip(self))]
    pub fn release(&self, role: Role) -> Option<PlayerSession> {
        let mut slots = self.slots();
        let session = slots[role.index()].take();
        let count = slots.iter().flatten().count();
        drop(slots);

        if session.is_some() {
            self.registered.send_replace(count);
            info!(count, "Slot released");
        }
        session
    }

    /// Flags `role` as disconnected and closes its outbound queue.
    ///
    /// Returns the other role when this call performed the transition and
    /// that role is still connected; repeated calls return `None`.
    #[instrument(skip(self))]
    pub fn mark_disconnected(&self, role: Role) -> Option<Role> {
        let mut slots = self.slots();
        let session = slots[role.index()].as_mut()?;
        if session.liveness == Liveness::Disconnected {
            debug!("Already disconnected");
            return None;
        }
        session.liveness = Liveness::Disconnected;
        session.outbound = None;
        info!(peer = %session.peer, "Player disconnected");

        let other = role.opponent();
        slots[other.index()]
            .as_ref()
            .filter(|s| s.liveness == Liveness::Connected)
            .map(|_| other)
    }

    /// Queues `message` for `role` without waiting.
    pub fn send(&self, role: Role, message: ServerMessage) -> Result<(), SendError> {
        let slots = self.slots();
        let sender = slots[role.index()]
            .as_ref()
            .and_then(|s| s.outbound.as_ref())
            .ok_or(SendError::Disconnected(role))?;

        sender.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull(role),
            mpsc::error::TrySendError::Closed(_) => SendError::Disconnected(role),
        })
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(32)
    }
}
