//! Protocol Messages
//!
//! Wire format for client-server communication over TCP.
//! Every message is one UTF-8 JSON object terminated by a single `\n`
//! (a "frame"). The `type` field carries the message kind.

use std::fmt;
use serde::{Serialize, Deserialize, Deserializer};
use serde::de::{self, DeserializeOwned, Unexpected, Visitor};

use crate::game::board::{Board, Role, CELL_COUNT};

/// Frame terminator.
pub const FRAME_DELIMITER: char = '\n';

/// Longest accepted inbound frame in bytes, excluding the delimiter.
pub const MAX_FRAME_LEN: usize = 4096;

/// Flattened row-major board as sent on the wire.
pub type WireBoard = [u8; CELL_COUNT];

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Request to claim a cell.
    MakeMove {
        /// Cell index. Range is checked by the session, not the codec.
        /// Integers beyond `i64` saturate, so they still fail that check.
        #[serde(deserialize_with = "deserialize_cell")]
        cell: i64,
    },
}

/// Accept any JSON integer as a cell index. Fractions and non-numbers are
/// rejected.
fn deserialize_cell<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    struct CellVisitor;

    impl<'de> Visitor<'de> for CellVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer cell index")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            Ok(i64::try_from(v).unwrap_or(i64::MAX))
        }

        // serde_json hands integers outside the u64/i64 range over as floats.
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
            if v.is_finite() && v.fract() == 0.0 && v.abs() >= i64::MAX as f64 {
                Ok(if v > 0.0 { i64::MAX } else { i64::MIN })
            } else {
                Err(E::invalid_type(Unexpected::Float(v), &self))
            }
        }
    }

    deserializer.deserialize_any(CellVisitor)
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Enqueued, no opponent yet.
    Waiting {
        /// Human-readable status.
        message: String,
    },

    /// Match formed, role assigned.
    GameStart {
        /// Role of the recipient.
        player_id: Role,
        /// Human-readable status.
        message: String,
    },

    /// Authoritative state after a move.
    StateUpdate {
        /// Current board.
        board: WireBoard,
        /// Role expected to move next.
        current_turn: Role,
    },

    /// Rejected move, no state change.
    InvalidMove {
        /// Why the move was rejected.
        message: String,
    },

    /// Terminal state.
    GameOver {
        /// Final board.
        board: WireBoard,
        /// Winning role, or draw.
        winner: Winner,
    },

    /// Opponent left; the recipient wins.
    OpponentDisconnected,

    /// Malformed input or internal fault.
    Error {
        /// Human-readable description.
        message: String,
    },
}

/// Result of a finished match. Wire values: 0 draw, 1 A, 2 B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Winner {
    /// A role completed a line.
    Player(Role),
    /// Board filled with no line.
    Draw,
}

impl From<Winner> for u8 {
    fn from(winner: Winner) -> u8 {
        match winner {
            Winner::Player(role) => role.to_wire(),
            Winner::Draw => 0,
        }
    }
}

impl TryFrom<u8> for Winner {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Winner::Draw),
            other => Role::try_from(other).map(Winner::Player),
        }
    }
}

impl ServerMessage {
    /// WAITING with the standard text.
    pub fn waiting() -> Self {
        ServerMessage::Waiting {
            message: "Waiting for an opponent...".to_string(),
        }
    }

    /// GAME_START for the given role.
    pub fn game_start(role: Role) -> Self {
        ServerMessage::GameStart {
            player_id: role,
            message: format!("Game started. You are player {role}."),
        }
    }

    /// STATE_UPDATE for a board and the role to move.
    pub fn state_update(board: &Board, current_turn: Role) -> Self {
        ServerMessage::StateUpdate {
            board: board.to_wire(),
            current_turn,
        }
    }

    /// INVALID_MOVE with a reason.
    pub fn invalid_move(message: impl Into<String>) -> Self {
        ServerMessage::InvalidMove { message: message.into() }
    }

    /// GAME_OVER for a final board.
    pub fn game_over(board: &Board, winner: Winner) -> Self {
        ServerMessage::GameOver {
            board: board.to_wire(),
            winner,
        }
    }

    /// ERROR with a description.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { message: message.into() }
    }

    /// Whether this message ends the recipient's match.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerMessage::GameOver { .. } | ServerMessage::OpponentDisconnected)
    }
}

// =============================================================================
// FRAMING
// =============================================================================

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not valid JSON, unknown `type`, or missing fields.
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    /// Frame exceeds [`MAX_FRAME_LEN`].
    #[error("Frame too long: {len} bytes (max {})", MAX_FRAME_LEN)]
    FrameTooLong {
        /// Observed length.
        len: usize,
    },
}

/// Serialize a message into one newline-terminated frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut frame = serde_json::to_string(message)?;
    frame.push(FRAME_DELIMITER);
    Ok(frame)
}

/// Parse one frame. A trailing `\n` or `\r\n` is ignored.
pub fn decode_frame<T: DeserializeOwned>(frame: &str) -> Result<T, ProtocolError> {
    let body = frame.trim_end_matches(|c: char| c == '\n' || c == '\r');
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLong { len: body.len() });
    }
    Ok(serde_json::from_str(body)?)
}

impl ClientMessage {
    /// Serialize to a wire frame.
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        encode_frame(self)
    }

    /// Parse a wire frame.
    pub fn from_frame(frame: &str) -> Result<Self, ProtocolError> {
        decode_frame(frame)
    }
}

impl ServerMessage {
    /// Serialize to a wire frame.
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        encode_frame(self)
    }

    /// Parse a wire frame.
    pub fn from_frame(frame: &str) -> Result<Self, ProtocolError> {
        decode_frame(frame)
    }
}
