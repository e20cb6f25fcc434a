//! Per-peer connection handler.
//!
//! One task per connected peer. The task owns both halves of the socket:
//! it decodes inbound lines into commands for the lifecycle controller and
//! writes whatever the registry queued for its role. It ends on `QUIT`,
//! end-of-stream, a read or write failure, an oversized line, the idle
//! timeout, or when the registry closes its queue. Commands are always
//! handed to the lifecycle controller, whose phase check refuses play
//! before both peers are in.

use crate::games::tictactoe::Role;
use crate::lifecycle::LifecycleController;
use crate::protocol::{ClientCommand, LineDecoder, ServerMessage};
use derive_more::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

const READ_CHUNK: usize = 1024;

/// Why a handler stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Exit {
    /// Peer sent `QUIT`.
    #[display("quit")]
    Quit,
    /// Peer closed its end.
    #[display("end of stream")]
    EndOfStream,
    /// Socket read or write failed.
    #[display("i/o failure")]
    Io,
    /// Peer sent an oversized line.
    #[display("decode failure")]
    Decode,
    /// No inbound line within the idle timeout.
    #[display("idle timeout")]
    Idle,
    /// The registry closed this session's queue.
    #[display("session closed")]
    Closed,
}

enum Flow {
    Continue,
    Leave,
}

/// Handles one peer from registration until it leaves.
#[derive(Debug)]
pub struct ConnectionHandler {
    role: Role,
    peer: SocketAddr,
    lifecycle: Arc<LifecycleController>,
    outbound: mpsc::Receiver<ServerMessage>,
    decoder: LineDecoder,
    idle_timeout: Option<Duration>,
    opponent_present: bool,
}

impl ConnectionHandler {
    /// Creates a handler for an admitted peer.
    pub fn new(
        role: Role,
        peer: SocketAddr,
        lifecycle: Arc<LifecycleController>,
        outbound: mpsc::Receiver<ServerMessage>,
        max_line_len: usize,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            role,
            peer,
            lifecycle,
            outbound,
            decoder: LineDecoder::new(max_line_len),
            idle_timeout,
            opponent_present: false,
        }
    }

    /// Runs until the peer leaves, then reports it and closes the socket.
    #[instrument(skip(self, stream), fields(role = %self.role, peer = %self.peer))]
    pub async fn run(mut self, stream: TcpStream) -> Exit {
        let (mut reader, mut writer) = stream.into_split();
        let mut chunk = [0u8; READ_CHUNK];
        let mut deadline = None;
        let registry = self.lifecycle.registry().clone();

        let exit = loop {
            tokio::select! {
                _ = registry.await_peer(), if !self.opponent_present => {
                    debug!("Opponent present, idle timer armed");
                    self.opponent_present = true;
                    deadline = self.next_deadline();
                }
                message = self.outbound.recv() => {
                    let Some(message) = message else {
                        break Exit::Closed;
                    };
                    if let Err(err) = write_line(&mut writer, &message).await {
                        debug!(error = %err, "Write failed");
                        break Exit::Io;
                    }
                }
                read = reader.read(&mut chunk) => {
                    let n = match read {
                        Ok(0) => break Exit::EndOfStream,
                        Ok(n) => n,
                        Err(err) => {
                            debug!(error = %err, "Read failed");
                            break Exit::Io;
                        }
                    };
                    deadline = self.next_deadline();
                    self.decoder.push(&chunk[..n]);
                    if let Some(exit) = self.drain_lines() {
                        break exit;
                    }
                }
                _ = sleep_until(deadline), if deadline.is_some() => {
                    break Exit::Idle;
                }
            }
        };

        info!(%exit, "Connection ending");
        self.lifecycle.peer_lost(self.role);

        if exit == Exit::Closed {
            // Everything queued before the close has been written.
            let _ = writer.flush().await;
        }
        let _ = writer.shutdown().await;
        exit
    }

    /// Dispatches every complete buffered line.
    fn drain_lines(&mut self) -> Option<Exit> {
        loop {
            let line = match self.decoder.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(err) => {
                    warn!(error = %err, "Dropping peer");
                    return Some(Exit::Decode);
                }
            };
            let Some(command) = ClientCommand::decode(&line) else {
                continue;
            };
            if let Flow::Leave = self.dispatch(command) {
                return Some(Exit::Quit);
            }
        }
    }

    fn dispatch(&self, command: ClientCommand) -> Flow {
        debug!(?command, "Command received");
        match command {
            ClientCommand::Quit => return Flow::Leave,
            ClientCommand::Move(raw) => {
                self.lifecycle.submit_move(self.role, &raw);
            }
            ClientCommand::Restart => {
                if let Err(err) = self.lifecycle.reset(self.role) {
                    debug!(error = %err, "Restart refused");
                    self.lifecycle.notify(self.role, ServerMessage::Invalid);
                }
            }
            ClientCommand::Unknown(_) => {
                self.lifecycle.notify(self.role, ServerMessage::Invalid);
            }
        }
        Flow::Continue
    }

    /// Idle deadline counted from now. Only runs once the opponent is
    /// present; a timeout too large to represent never fires.
    fn next_deadline(&self) -> Option<Instant> {
        if !self.opponent_present {
            return None;
        }
        self.idle_timeout.and_then(|timeout| Instant::now().checked_add(timeout))
    }
}

async fn write_line(
    writer: &mut OwnedWriteHalf,
    message: &ServerMessage,
) -> std::io::Result<()> {
    writer.write_all(message.encode().as_bytes()).await
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
