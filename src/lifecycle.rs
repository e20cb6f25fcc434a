//! Game lifecycle: start, moves, termination, restart and teardown.
//!
//! Every operation here pairs one arbiter call with the notifications it
//! produces. Notifications are queued with `try_send`, so no socket I/O
//! happens while a lock is held; the `sequence` lock only keeps the queued
//! lines of two concurrent operations from interleaving.

use crate::arbiter::{
    AppliedMove, MoveOutcome, MoveResult, PhaseError, Rejection, Snapshot, TurnArbiter,
};
use crate::games::tictactoe::{GamePhase, Outcome, Player, Role};
use crate::protocol::ServerMessage;
use crate::session::{RegistryError, SendError, SessionRegistry};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Drives the phase machine and fans state changes out to both peers.
#[derive(Debug)]
pub struct LifecycleController {
    arbiter: Arc<TurnArbiter>,
    registry: Arc<SessionRegistry>,
    sequence: Mutex<()>,
}

/// Lines queued by one operation, flushed while `sequence` is held.
#[derive(Debug, Default)]
struct Outbox {
    lines: Vec<(Role, ServerMessage)>,
}

impl Outbox {
    fn to(&mut self, role: Role, message: ServerMessage) {
        self.lines.push((role, message));
    }

    fn both(&mut self, message: ServerMessage) {
        for role in Player::ALL {
            self.to(role, message.clone());
        }
    }

    fn start_sequence(&mut self, snapshot: &Snapshot) {
        for role in Player::ALL {
            self.to(role, ServerMessage::Start);
            self.to(role, ServerMessage::Symbol(role));
            self.to(role, ServerMessage::board(&snapshot.board));
        }
        self.to(snapshot.turn, ServerMessage::YourTurn);
    }
}

impl LifecycleController {
    /// Creates a controller over a shared arbiter and registry.
    pub fn new(arbiter: Arc<TurnArbiter>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            arbiter,
            registry,
            sequence: Mutex::new(()),
        }
    }

    /// The arbiter this controller drives.
    pub fn arbiter(&self) -> &Arc<TurnArbiter> {
        &self.arbiter
    }

    /// The registry this controller notifies through.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn sequence(&self) -> MutexGuard<'_, ()> {
        self.sequence.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues every line in order, then handles any peer that failed.
    fn deliver(&self, guard: MutexGuard<'_, ()>, outbox: Outbox) {
        let mut failed: Vec<Role> = Vec::new();
        for (role, message) in outbox.lines {
            if failed.contains(&role) {
                continue;
            }
            if let Err(err) = self.registry.send(role, message) {
                match err {
                    SendError::QueueFull(_) => warn!(%role, "Peer not draining, dropping it"),
                    SendError::Disconnected(_) => debug!(%role, "Send to departed peer"),
                }
                failed.push(role);
            }
        }
        drop(guard);

        for role in failed {
            self.peer_lost(role);
        }
    }

    /// Registers a new connection and, if it is the second one, starts
    /// the game.
    #[instrument(skip(self))]
    pub fn admit(
        &self,
        peer: SocketAddr,
    ) -> Result<(Role, mpsc::Receiver<ServerMessage>), RegistryError> {
        let guard = self.sequence();
        let (role, outbound) = self.registry.register(peer)?;

        if self.registry.is_full() {
            if let Err(err) = self.start(guard) {
                warn!(error = %err, "Second player registered but game could not start");
            }
        } else {
            debug!(%role, "Waiting for opponent");
        }
        Ok((role, outbound))
    }

    /// Enters play and sends the opening sequence. Runs once, under the
    /// same lock as the registration that filled the second slot.
    fn start(&self, guard: MutexGuard<'_, ()>) -> Result<(), PhaseError> {
        let snapshot = self.arbiter.begin()?;
        info!("Both players present, game starting");

        let mut outbox = Outbox::default();
        outbox.start_sequence(&snapshot);
        self.deliver(guard, outbox);
        Ok(())
    }

    /// Clears the board, gives X the turn and resends the opening sequence.
    #[instrument(skip(self))]
    pub fn reset(&self, requested_by: Role) -> Result<(), PhaseError> {
        let guard = self.sequence();
        let snapshot = self.arbiter.reset()?;
        info!(%requested_by, "Game restarted");

        let mut outbox = Outbox::default();
        outbox.start_sequence(&snapshot);
        self.deliver(guard, outbox);
        Ok(())
    }

    /// Submits a move for `role` and notifies both peers of the result.
    #[instrument(skip(self))]
    pub fn submit_move(&self, role: Role, raw_position: &str) -> MoveOutcome {
        let guard = self.sequence();
        let outcome = self.arbiter.attempt_move(role, raw_position);

        let mut outbox = Outbox::default();
        match &outcome {
            MoveOutcome::Rejected(rejection) => {
                debug!(%role, %rejection, "Move rejected");
                outbox.to(role, rejection_message(*rejection));
            }
            MoveOutcome::Applied(applied) => {
                announce_move(&mut outbox, applied);
                match applied.result {
                    MoveResult::NextTurn(next) => outbox.to(next, ServerMessage::YourTurn),
                    MoveResult::Win(winner) => {
                        terminate(&mut outbox, Outcome::Winner(winner));
                    }
                    MoveResult::Draw => terminate(&mut outbox, Outcome::Draw),
                }
            }
        }
        self.deliver(guard, outbox);
        outcome
    }

    /// Sends a single line to one peer, e.g. `INVALID` for a bad command.
    pub fn notify(&self, role: Role, message: ServerMessage) {
        let guard = self.sequence();
        let mut outbox = Outbox::default();
        outbox.to(role, message);
        self.deliver(guard, outbox);
    }

    /// Tears the game down after `role` quit or dropped.
    ///
    /// The remaining peer gets `OPPONENT_QUIT` and its queue is closed
    /// behind it, ending that connection too. Safe to call repeatedly.
    #[instrument(skip(self))]
    pub fn peer_lost(&self, role: Role) {
        let guard = self.sequence();
        if self.arbiter.phase() == GamePhase::WaitingForPeers {
            // Nobody to notify yet; free the slot for the next connection.
            self.registry.release(role);
            return;
        }
        let previous = self.arbiter.close();

        let Some(remaining) = self.registry.mark_disconnected(role) else {
            return;
        };
        info!(%role, %remaining, phase = %previous, "Player left, closing game");

        if let Err(err) = self.registry.send(remaining, ServerMessage::OpponentQuit) {
            debug!(%remaining, error = %err, "Could not notify remaining player");
        }
        self.registry.mark_disconnected(remaining);
        drop(guard);
    }
}

/// `MOVE_OK` to the mover, `UPDATE` to the other peer, board to both.
fn announce_move(outbox: &mut Outbox, applied: &AppliedMove) {
    outbox.to(applied.role, ServerMessage::MoveOk(applied.position, applied.role));
    outbox.to(
        applied.role.opponent(),
        ServerMessage::Update(applied.position, applied.role),
    );
    outbox.both(ServerMessage::board(&applied.board));
}

/// Win/lose/draw lines. The arbiter already moved the phase to
/// `Terminal` inside the same critical section that applied the move.
fn terminate(outbox: &mut Outbox, outcome: Outcome) {
    info!(%outcome, "Game over");
    match outcome {
        Outcome::Winner(winner) => {
            outbox.to(winner, ServerMessage::YouWin);
            outbox.to(winner.opponent(), ServerMessage::YouLose);
        }
        Outcome::Draw => outbox.both(ServerMessage::Draw),
    }
}

/// Protocol line for a refused move.
pub fn rejection_message(rejection: Rejection) -> ServerMessage {
    match rejection {
        Rejection::NotYourTurn => ServerMessage::NotYourTurn,
        Rejection::GameNotActive(_) | Rejection::InvalidPosition | Rejection::Occupied => {
            ServerMessage::Invalid
        }
    }
}
