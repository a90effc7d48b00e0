//! TCP Game Server
//!
//! Accept loop for tic-tac-toe clients. Each accepted socket gets its own
//! connection handler task; pairing, moves and disconnects are routed
//! through the shared [`Matchmaker`].

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::network::connection::{handle_connection, ConnectionId};
use crate::network::matchmaker::Matchmaker;
use crate::network::registry::Registry;

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8888";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound messages buffered per connection.
    pub outbound_buffer: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8888)),
            max_connections: 1000,
            outbound_buffer: 64,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// - `TICTACTOE_BIND_ADDR`
    /// - `TICTACTOE_MAX_CONNECTIONS`
    /// - `TICTACTOE_OUTBOUND_BUFFER`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("TICTACTOE_BIND_ADDR", defaults.bind_addr),
            max_connections: env_or("TICTACTOE_MAX_CONNECTIONS", defaults.max_connections),
            outbound_buffer: env_or("TICTACTOE_OUTBOUND_BUFFER", defaults.outbound_buffer),
            version: defaults.version,
        }
    }

    /// Override the bind address from a string such as `127.0.0.1:9000`.
    /// An unparsable value keeps the current address.
    pub fn with_bind_addr(mut self, addr: &str) -> Self {
        match addr.parse() {
            Ok(parsed) => self.bind_addr = parsed,
            Err(e) => warn!("Ignoring bind address {:?}: {}", addr, e),
        }
        self
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T>(key: &str, raw: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.trim().parse() {
        Ok(value) => value,
        Err(e) => {
            warn!("Invalid {}={:?} ({}), using default", key, raw, e);
            default
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Listener I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connected client bookkeeping.
struct ConnectedClient {
    /// Peer address.
    addr: SocketAddr,
    /// Connection time.
    connected_at: Instant,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Pairing and move routing.
    matchmaker: Arc<Matchmaker>,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<ConnectionId, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            matchmaker: Arc::new(Matchmaker::new(Arc::new(Registry::new()))),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GameServerError::Bind { addr, source })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let local_addr = listener.local_addr()?;
        info!(version = %self.config.version, "Game server listening on {}", local_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                drop(stream);
                                continue;
                            }
                            self.accept_connection(stream, addr).await;
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Register a new socket and spawn its handler.
    async fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let conn = ConnectionId::next();
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%conn, "Failed to set TCP_NODELAY: {}", e);
        }

        self.clients.write().await.insert(conn, ConnectedClient {
            addr,
            connected_at: Instant::now(),
        });
        info!(%conn, "New connection from {}", addr);

        let clients = self.clients.clone();
        let matchmaker = self.matchmaker.clone();
        let outbound_buffer = self.config.outbound_buffer;
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            handle_connection(conn, stream, matchmaker, outbound_buffer, shutdown_rx).await;

            if let Some(client) = clients.write().await.remove(&conn) {
                debug!(
                    %conn,
                    addr = %client.addr,
                    secs = client.connected_at.elapsed().as_secs(),
                    "Client cleaned up"
                );
            }
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.matchmaker.registry().session_count().await
    }

    /// Get matchmaking queue size.
    pub async fn queue_size(&self) -> usize {
        self.matchmaker.registry().queue_len().await
    }
}
