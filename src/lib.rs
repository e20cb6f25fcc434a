//! Strictly Arena - authoritative two-player tic-tac-toe server.
//!
//! Two TCP peers connect, receive the roles X and O in connection order,
//! and play over a newline-terminated text protocol. The server owns the
//! board and the turn; clients only submit commands and render what they
//! are told.
//!
//! # Architecture
//!
//! - **Board**: 3x3 grid, win and draw detection ([`Board`])
//! - **Arbiter**: single lock around board, turn and phase ([`TurnArbiter`])
//! - **Registry**: the two peer slots and their queues ([`SessionRegistry`])
//! - **Lifecycle**: start, restart, game over, teardown ([`LifecycleController`])
//! - **Connection**: one task per peer ([`ConnectionHandler`])
//! - **Protocol**: line codec ([`ClientCommand`], [`ServerMessage`])
//!
//! # Example
//!
//! ```no_run
//! use strictly_arena::{GameServer, ServerConfig};
//!
//! # async fn example() -> Result<(), strictly_arena::ArenaError> {
//! let server = GameServer::bind(ServerConfig::new("127.0.0.1", 12345)).await?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod arbiter;
pub mod cli;
mod config;
mod connection;
mod error;
mod games;
mod lifecycle;
mod protocol;
mod server;
mod session;

// Crate-level exports - Arbitration
pub use arbiter::{
    AppliedMove, MoveOutcome, MoveResult, PhaseError, Rejection, Snapshot, TurnArbiter,
};

// Crate-level exports - Configuration and errors
pub use config::{ConfigError, ServerConfig};
pub use error::ArenaError;

// Crate-level exports - Networking
pub use connection::{ConnectionHandler, Exit};
pub use lifecycle::{LifecycleController, rejection_message};
pub use protocol::{ClientCommand, DecodeError, LineDecoder, ServerMessage};
pub use server::GameServer;
pub use session::{Liveness, PlayerSession, RegistryError, SendError, SessionRegistry};

// Crate-level exports - Game types (tic-tac-toe)
pub use games::tictactoe::{
    Board, BoardError, GamePhase, Outcome, PhaseEvent, Player, Position, Role, Square, rules,
};
