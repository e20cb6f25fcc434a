//! TCP listener for one game instance.

use crate::arbiter::TurnArbiter;
use crate::config::ServerConfig;
use crate::connection::{ConnectionHandler, Exit};
use crate::error::ArenaError;
use crate::games::tictactoe::Role;
use crate::lifecycle::LifecycleController;
use crate::session::SessionRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Accepts exactly two players and runs their game.
#[derive(Debug)]
pub struct GameServer {
    config: ServerConfig,
    listener: TcpListener,
    lifecycle: Arc<LifecycleController>,
}

impl GameServer {
    /// Binds the listener described by `config`.
    #[instrument(skip(config), fields(host = %config.host(), port = config.port()))]
    pub async fn bind(config: ServerConfig) -> Result<Self, ArenaError> {
        let addr = config.bind_addr()?;
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Server listening");
        Ok(Self::with_listener(config, listener))
    }

    /// Wraps an already bound listener.
    pub fn with_listener(config: ServerConfig, listener: TcpListener) -> Self {
        let arbiter = Arc::new(TurnArbiter::new());
        let registry = Arc::new(SessionRegistry::new(*config.outbound_queue()));
        Self {
            config,
            listener,
            lifecycle: Arc::new(LifecycleController::new(arbiter, registry)),
        }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ArenaError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared lifecycle controller, for inspection.
    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    /// Accepts peers until both roles are taken, then stops listening and
    /// waits for both connections to finish.
    #[instrument(skip(self))]
    pub async fn run(self) -> Result<(), ArenaError> {
        let Self {
            config,
            listener,
            lifecycle,
        } = self;
        let mut handlers: JoinSet<(Role, Exit)> = JoinSet::new();

        while !lifecycle.registry().is_full() {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(error = %err, "Accept failed");
                            continue;
                        }
                    };
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(error = %err, "Could not disable Nagle");
                    }

                    let (role, outbound) = match lifecycle.admit(peer) {
                        Ok(admitted) => admitted,
                        Err(err) => {
                            warn!(%peer, error = %err, "Connection rejected");
                            continue;
                        }
                    };
                    info!(%peer, %role, "Player connected");

                    let handler = ConnectionHandler::new(
                        role,
                        peer,
                        lifecycle.clone(),
                        outbound,
                        *config.max_line_len(),
                        config.idle_timeout(),
                    );
                    handlers.spawn(async move { (role, handler.run(stream).await) });
                }
                Some(joined) = handlers.join_next() => {
                    log_exit(joined);
                }
            }
        }

        drop(listener);
        info!("Both players connected, no longer accepting");

        while let Some(joined) = handlers.join_next().await {
            log_exit(joined);
        }
        info!("Game finished, all connections closed");
        Ok(())
    }
}

fn log_exit(joined: Result<(Role, Exit), tokio::task::JoinError>) {
    match joined {
        Ok((role, exit)) => debug!(%role, %exit, "Handler finished"),
        Err(err) => warn!(error = %err, "Handler task failed"),
    }
}
