//! Game phase state machine.
//!
//! The phase decides which commands are legal. Transitions are listed
//! in one table ([`GamePhase::transition`]) instead of being implied by
//! whichever message happens to arrive.

use super::Player;
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Outcome of a finished game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Player won the game.
    Winner(Player),
    /// Game ended in a draw.
    Draw,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Winner(player) => write!(f, "Player {} wins", player),
            Outcome::Draw => write!(f, "Draw"),
        }
    }
}

/// Lifecycle stage of the single game instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum GamePhase {
    /// Fewer than two peers registered.
    #[display("waiting-for-peers")]
    WaitingForPeers,
    /// Moves are being accepted.
    #[display("in-progress")]
    InProgress,
    /// Game finished; only `RESTART` or `QUIT` make sense.
    #[display("terminal({_0})")]
    Terminal(Outcome),
    /// A peer left; the game cannot continue.
    #[display("closed")]
    Closed,
}

/// Events that move the phase forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PhaseEvent {
    /// Second peer registered.
    #[display("both-registered")]
    BothRegistered,
    /// A move ended the game.
    #[display("finished")]
    Finished(Outcome),
    /// A peer asked for a new game.
    #[display("restart")]
    Restart,
    /// A peer quit or its connection dropped.
    #[display("peer-lost")]
    PeerLost,
}

impl GamePhase {
    /// Transition table. `None` means the event is illegal in this phase.
    pub fn transition(self, event: PhaseEvent) -> Option<GamePhase> {
        use GamePhase::*;
        use PhaseEvent::*;

        match (self, event) {
            (WaitingForPeers, BothRegistered) => Some(InProgress),
            (InProgress, Finished(outcome)) => Some(Terminal(outcome)),
            (InProgress | Terminal(_), Restart) => Some(InProgress),
            (_, PeerLost) => Some(Closed),
            _ => None,
        }
    }

    /// Whether moves may be submitted.
    pub fn accepts_moves(self) -> bool {
        self == GamePhase::InProgress
    }

    /// Whether `RESTART` is legal.
    pub fn accepts_restart(self) -> bool {
        self.transition(PhaseEvent::Restart).is_some()
    }
}
