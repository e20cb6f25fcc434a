//! Line protocol codec.
//!
//! Inbound (client to server): `RESTART`, `QUIT`, or a single token
//! naming a square. Outbound: one [`ServerMessage`] per newline-terminated
//! line. Encoding and decoding are pure; [`LineDecoder`] only buffers
//! bytes until a full line is available.

use crate::games::tictactoe::{Board, Player, Position};
use derive_more::{Display, Error};
use tracing::instrument;

/// A decoded client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Single token naming a square. The arbiter checks the turn before
    /// it parses the token, so an off-turn `abc` is reported out of turn.
    Move(String),
    /// Ask for a fresh game.
    Restart,
    /// Leave the game.
    Quit,
    /// A line with more than one token.
    Unknown(String),
}

impl ClientCommand {
    /// Decodes one line. Surrounding whitespace is ignored; blank lines
    /// decode to `None`.
    #[instrument]
    pub fn decode(line: &str) -> Option<Self> {
        let token = line.trim();
        if token.is_empty() {
            return None;
        }
        let command = if token.eq_ignore_ascii_case("RESTART") {
            ClientCommand::Restart
        } else if token.eq_ignore_ascii_case("QUIT") {
            ClientCommand::Quit
        } else if token.contains(char::is_whitespace) {
            ClientCommand::Unknown(token.to_string())
        } else {
            ClientCommand::Move(token.to_string())
        };
        Some(command)
    }
}

/// A line sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ServerMessage {
    /// Role assignment.
    #[display("SYMBOL {_0}")]
    Symbol(Player),
    /// A game (re)starts on an empty board.
    #[display("START")]
    Start,
    /// Board contents, row-major, `.` for empty.
    #[display("BOARD {_0}")]
    Board(String),
    /// Recipient may move.
    #[display("YOUR_TURN")]
    YourTurn,
    /// Move refused: not the recipient's turn.
    #[display("NOT_YOUR_TURN")]
    NotYourTurn,
    /// Move or command refused as malformed, out of range, occupied or
    /// illegal in the current phase.
    #[display("INVALID")]
    Invalid,
    /// Acknowledgement to the mover.
    #[display("MOVE_OK {_0} {_1}")]
    MoveOk(Position, Player),
    /// Notification to the other peer.
    #[display("UPDATE {_0} {_1}")]
    Update(Position, Player),
    /// Recipient won.
    #[display("YOU_WIN")]
    YouWin,
    /// Recipient lost.
    #[display("YOU_LOSE")]
    YouLose,
    /// Nobody won.
    #[display("DRAW")]
    Draw,
    /// The other peer quit or dropped.
    #[display("OPPONENT_QUIT")]
    OpponentQuit,
}

impl ServerMessage {
    /// `BOARD` line for the given board.
    pub fn board(board: &Board) -> Self {
        ServerMessage::Board(board.cells())
    }

    /// Newline-terminated wire form.
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }

    /// Parses one outbound line. Used by clients and tests.
    pub fn decode(line: &str) -> Option<Self> {
        let mut parts = line.trim().split_whitespace();
        let head = parts.next()?;
        let args: Vec<&str> = parts.collect();

        let message = match (head, args.as_slice()) {
            ("SYMBOL", [role]) => ServerMessage::Symbol(Player::from_token(role)?),
            ("START", []) => ServerMessage::Start,
            ("BOARD", [cells]) if is_board_cells(cells) => ServerMessage::Board(cells.to_string()),
            ("YOUR_TURN", []) => ServerMessage::YourTurn,
            ("NOT_YOUR_TURN", []) => ServerMessage::NotYourTurn,
            ("INVALID", []) => ServerMessage::Invalid,
            ("MOVE_OK", [pos, role]) => {
                ServerMessage::MoveOk(parse_position(pos)?, Player::from_token(role)?)
            }
            ("UPDATE", [pos, role]) => {
                ServerMessage::Update(parse_position(pos)?, Player::from_token(role)?)
            }
            ("YOU_WIN", []) => ServerMessage::YouWin,
            ("YOU_LOSE", []) => ServerMessage::YouLose,
            ("DRAW", []) => ServerMessage::Draw,
            ("OPPONENT_QUIT", []) => ServerMessage::OpponentQuit,
            _ => return None,
        };
        Some(message)
    }
}

fn parse_position(token: &str) -> Option<Position> {
    token.parse().ok().and_then(Position::from_number)
}

fn is_board_cells(cells: &str) -> bool {
    cells.len() == 9 && cells.chars().all(|c| matches!(c, 'X' | 'O' | '.'))
}

/// Fatal framing errors. The connection is closed when one occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum DecodeError {
    /// A line (or an unterminated fragment) grew past the limit.
    #[display("line exceeds {_0} bytes")]
    LineTooLong(#[error(not(source))] usize),
}

/// Accumulates raw reads and yields complete lines.
///
/// Reads may split a line anywhere, including inside a multi-byte
/// character; nothing is returned until the `\n` arrives.
#[derive(Debug)]
pub struct LineDecoder {
    buf: Vec<u8>,
    max_len: usize,
}

impl LineDecoder {
    /// Creates a decoder rejecting lines longer than `max_len` bytes.
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_len,
        }
    }

    /// Appends bytes from a read.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete line without its terminator (`\n` or `\r\n`).
    ///
    /// Invalid UTF-8 is replaced rather than rejected so the line still
    /// decodes, as an unknown command.
    pub fn next_line(&mut self) -> Result<Option<String>, DecodeError> {
        match self.buf.iter().position(|b| *b == b'\n') {
            Some(end) => {
                if end > self.max_len {
                    return Err(DecodeError::LineTooLong(self.max_len));
                }
                let raw: Vec<u8> = self.buf.drain(..=end).collect();
                let mut line = &raw[..end];
                if let Some(stripped) = line.strip_suffix(b"\r") {
                    line = stripped;
                }
                Ok(Some(String::from_utf8_lossy(line).into_owned()))
            }
            None if self.buf.len() > self.max_len => Err(DecodeError::LineTooLong(self.max_len)),
            None => Ok(None),
        }
    }

    /// Bytes held for an incomplete line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
