mod phases;
mod position;
pub mod rules;
mod types;

pub use phases::{GamePhase, Outcome, PhaseEvent};
pub use position::Position;
pub use types::{Board, BoardError, Player, Square};

/// Alias for clarity in session management.
pub type Role = Player;
