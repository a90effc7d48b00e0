//! Network Layer
//!
//! TCP server for two-player matches. All game rules live in `game/`;
//! this layer only frames messages, pairs connections and serializes
//! access to each match.

pub mod protocol;
pub mod session;
pub mod registry;
pub mod matchmaker;
pub mod connection;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, ProtocolError, Winner};
pub use session::{MatchSession, SessionId, SessionState, SessionError, MoveOutcome};
pub use registry::Registry;
pub use matchmaker::{Matchmaker, MatchError};
pub use connection::{ConnectionId, Outbox};
pub use server::{GameServer, ServerConfig, GameServerError};
