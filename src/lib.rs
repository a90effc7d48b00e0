//! # Tic-Tac-Toe Game Server
//!
//! Authoritative matchmaking and game server for two-player tic-tac-toe
//! over TCP, speaking newline-delimited JSON.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TIC-TAC-TOE SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/              - Game rules (pure, synchronous)         │
//! │  └── board.rs       - Board, roles, win/draw detection       │
//! │                                                              │
//! │  network/           - Networking (async)                     │
//! │  ├── protocol.rs    - Message types and framing              │
//! │  ├── session.rs     - One match: turn order and outcome      │
//! │  ├── registry.rs    - Waiting queue and live sessions        │
//! │  ├── matchmaker.rs  - Pairing, move and disconnect routing   │
//! │  ├── connection.rs  - Per-socket read loop and writer        │
//! │  └── server.rs      - TCP accept loop                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Every session sits behind its own `tokio::sync::Mutex`; a move is
//! validated, applied and broadcast inside one critical section, so both
//! participants observe the same sequence of states. Pairing happens in a
//! single registry critical section, so a waiting connection is matched at
//! most once.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::board::{Board, Role};
pub use network::protocol::{ClientMessage, ServerMessage, Winner};
pub use network::server::{GameServer, ServerConfig, GameServerError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
