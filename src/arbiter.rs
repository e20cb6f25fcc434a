//! Turn arbitration.
//!
//! [`TurnArbiter`] is the only owner of the board, the turn and the
//! game phase. Every read-then-write against them happens inside one
//! lock acquisition, so two connection tasks racing on the same square
//! can never both succeed.

use crate::games::tictactoe::{Board, BoardError, GamePhase, Outcome, PhaseEvent, Player, Position};
use derive_more::{Display, Error};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, warn};

/// Why a move was refused. None of these change any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Rejection {
    /// The game is not accepting moves (waiting, finished or closed).
    #[display("game not in progress ({_0})")]
    GameNotActive(GamePhase),
    /// Another role holds the turn.
    #[display("not your turn")]
    NotYourTurn,
    /// Position is not an integer in 1..=9.
    #[display("invalid position")]
    InvalidPosition,
    /// Square already holds a mark.
    #[display("square occupied")]
    Occupied,
}

/// What an applied move led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveResult {
    /// Game continues; the turn passed to this role.
    NextTurn(Player),
    /// The mover completed a line.
    Win(Player),
    /// The board filled with no line.
    Draw,
}

/// A move that passed every check and was written to the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    /// Square that was marked.
    pub position: Position,
    /// Role that moved.
    pub role: Player,
    /// Board after the move.
    pub board: Board,
    /// Continuation or terminal result.
    pub result: MoveResult,
}

/// Result of [`TurnArbiter::attempt_move`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Move applied.
    Applied(AppliedMove),
    /// Move refused; nothing changed.
    Rejected(Rejection),
}

impl MoveOutcome {
    /// True when the move was written to the board.
    pub fn is_applied(&self) -> bool {
        matches!(self, MoveOutcome::Applied(_))
    }

    /// The rejection reason, if any.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            MoveOutcome::Rejected(r) => Some(*r),
            MoveOutcome::Applied(_) => None,
        }
    }
}

/// A phase transition that the current phase does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
#[display("cannot apply {event} while {from}")]
pub struct PhaseError {
    /// Phase at the time of the request.
    pub from: GamePhase,
    /// Requested event.
    pub event: PhaseEvent,
}

/// Consistent copy of the arbitrated state, taken under the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Board contents.
    pub board: Board,
    /// Role allowed to move next.
    pub turn: Player,
    /// Current phase.
    pub phase: GamePhase,
    /// Moves applied since the last (re)start.
    pub moves: usize,
}

#[derive(Debug)]
struct ArbiterState {
    board: Board,
    turn: Player,
    phase: GamePhase,
    moves: usize,
}

impl ArbiterState {
    fn fresh(phase: GamePhase) -> Self {
        Self {
            board: Board::new(),
            turn: Player::X,
            phase,
            moves: 0,
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            board: self.board.clone(),
            turn: self.turn,
            phase: self.phase,
            moves: self.moves,
        }
    }

    fn advance(&mut self, event: PhaseEvent) -> Result<GamePhase, PhaseError> {
        let next = self.phase.transition(event).ok_or(PhaseError {
            from: self.phase,
            event,
        })?;
        debug!(from = %self.phase, to = %next, %event, "Phase transition");
        self.phase = next;
        Ok(next)
    }
}

/// Single source of truth for whose move is legal next.
#[derive(Debug)]
pub struct TurnArbiter {
    state: Mutex<ArbiterState>,
}

impl TurnArbiter {
    /// Creates an arbiter waiting for peers, with an empty board and X to move.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ArbiterState::fresh(GamePhase::WaitingForPeers)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ArbiterState> {
        // Mutations are plain assignments, so a poisoned guard is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates and applies one move as a single indivisible step.
    ///
    /// Checks run in order: phase, turn, position syntax/range, occupancy.
    /// On success the turn flips unless the move ended the game.
    #[instrument(skip(self))]
    pub fn attempt_move(&self, role: Player, raw_position: &str) -> MoveOutcome {
        let mut state = self.lock();

        if !state.phase.accepts_moves() {
            debug!(phase = %state.phase, "Move outside of play");
            return MoveOutcome::Rejected(Rejection::GameNotActive(state.phase));
        }

        if role != state.turn {
            debug!(expected = %state.turn, "Move out of turn");
            return MoveOutcome::Rejected(Rejection::NotYourTurn);
        }

        let Some(number) = parse_position(raw_position) else {
            debug!("Unparseable position");
            return MoveOutcome::Rejected(Rejection::InvalidPosition);
        };

        let position = match state.board.apply(number, role) {
            Ok(position) => position,
            Err(BoardError::OutOfRange) => {
                return MoveOutcome::Rejected(Rejection::InvalidPosition);
            }
            Err(BoardError::Occupied) => {
                return MoveOutcome::Rejected(Rejection::Occupied);
            }
        };
        state.moves += 1;
        debug_assert_eq!(
            state.board.count(Player::X) + state.board.count(Player::O),
            state.moves
        );

        let result = if let Some(winner) = state.board.winner() {
            MoveResult::Win(winner)
        } else if state.board.is_full() {
            MoveResult::Draw
        } else {
            state.turn = role.opponent();
            MoveResult::NextTurn(state.turn)
        };

        let outcome = match result {
            MoveResult::Win(winner) => Some(Outcome::Winner(winner)),
            MoveResult::Draw => Some(Outcome::Draw),
            MoveResult::NextTurn(_) => None,
        };
        if let Some(outcome) = outcome {
            // The phase check above guarantees InProgress, which always accepts this.
            let finished = state.advance(PhaseEvent::Finished(outcome));
            debug_assert!(finished.is_ok(), "{finished:?}");
        }

        info!(%role, %position, ?result, "Move applied");
        MoveOutcome::Applied(AppliedMove {
            position,
            role,
            board: state.board.clone(),
            result,
        })
    }

    /// Enters play once both peers are present. Fires at most once.
    #[instrument(skip(self))]
    pub fn begin(&self) -> Result<Snapshot, PhaseError> {
        let mut state = self.lock();
        state.advance(PhaseEvent::BothRegistered)?;
        Ok(state.snapshot())
    }

    /// Clears the board and hands the turn back to X.
    #[instrument(skip(self))]
    pub fn reset(&self) -> Result<Snapshot, PhaseError> {
        let mut state = self.lock();
        let phase = state.advance(PhaseEvent::Restart)?;
        *state = ArbiterState::fresh(phase);
        info!("Game reset");
        Ok(state.snapshot())
    }

    /// Marks the game closed after a peer left. Returns the prior phase.
    #[instrument(skip(self))]
    pub fn close(&self) -> GamePhase {
        let mut state = self.lock();
        let previous = state.phase;
        if state.advance(PhaseEvent::PeerLost).is_err() {
            warn!(phase = %previous, "Close refused by transition table");
        }
        previous
    }

    /// Current phase.
    pub fn phase(&self) -> GamePhase {
        self.lock().phase
    }

    /// Copy of the whole arbitrated state.
    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }
}

impl Default for TurnArbiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a bare digit string. Anything else, including signs, is rejected.
fn parse_position(raw: &str) -> Option<u8> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}
