//! Match Session
//!
//! One match between two connections. The session owns the board, both
//! participant handles and the turn pointer, and is the only thing that
//! mutates them. Callers hold the session behind a `tokio::sync::Mutex`, so
//! every operation here runs inside that session's critical section.
//! Operations are synchronous and delivery goes through [`Outbox::push`],
//! so a participant that stops reading never holds the lock.

use std::time::Instant;
use tracing::{debug, info};

use crate::game::board::{to_coords, Board, Role, CELL_COUNT};
use crate::network::connection::{ConnectionId, Outbox};
use crate::network::protocol::{ServerMessage, Winner};

/// Unique session identifier.
pub type SessionId = uuid::Uuid;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but start messages not yet sent.
    AwaitingOpponent,
    /// Moves are being accepted.
    InProgress,
    /// Terminal. No further mutation.
    Completed,
}

/// A connection's seat in a session.
#[derive(Debug)]
pub struct Participant {
    /// Connection holding this seat.
    pub conn: ConnectionId,
    /// Role assigned for this match.
    pub role: Role,
    /// Outbound queue to the connection's writer.
    outbox: Outbox,
}

impl Participant {
    /// Create a participant handle.
    pub fn new(conn: ConnectionId, role: Role, outbox: Outbox) -> Self {
        Self { conn, role, outbox }
    }

    /// Queue a message for this participant. A dropped message means the
    /// connection is gone or faulted; its own handler reports the disconnect.
    fn send(&self, message: ServerMessage) {
        if !self.outbox.push(message) {
            debug!(conn = %self.conn, "Message dropped for departing connection");
        }
    }
}

/// Why a move was refused. The text is sent back in INVALID_MOVE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MoveRejection {
    /// Sender does not hold the turn.
    #[error("Not your turn.")]
    NotYourTurn,

    /// Cell index outside the board.
    #[error("Invalid cell index.")]
    InvalidCell,

    /// Cell already taken.
    #[error("Cell is already occupied or invalid.")]
    CellOccupied,
}

/// Result of a move that reached the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Refused; the sender got INVALID_MOVE and nothing changed.
    Rejected(MoveRejection),
    /// Applied; the match goes on with `next_turn` to move.
    Continued {
        /// Role now holding the turn.
        next_turn: Role,
    },
    /// Applied and ended the match.
    Finished(Winner),
}

impl MoveOutcome {
    /// Whether the session is now completed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MoveOutcome::Finished(_))
    }
}

/// Result of a participant dropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// Match was live; the remaining role wins.
    Forfeit {
        /// Role that stayed connected.
        winner: Role,
    },
    /// Nothing to do (already completed, or not a participant).
    Ignored,
}

/// Session errors. None of these mutate the session or message anyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Connection does not hold a seat in this session.
    #[error("Connection {0} is not a participant")]
    NotParticipant(ConnectionId),

    /// Session already finished.
    #[error("Session already completed")]
    SessionCompleted,

    /// Session not in the state the operation needs.
    #[error("Invalid session state: {0:?}")]
    InvalidState(SessionState),
}

/// A match between two participants.
pub struct MatchSession {
    /// Unique session identifier.
    pub id: SessionId,
    state: SessionState,
    board: Board,
    current_turn: Role,
    /// Seat 0 is role A, seat 1 is role B.
    players: [Participant; 2],
    created_at: Instant,
}

impl MatchSession {
    /// Create a session. `first` plays A and moves first.
    pub fn new(
        id: SessionId,
        first: (ConnectionId, Outbox),
        second: (ConnectionId, Outbox),
    ) -> Self {
        Self {
            id,
            state: SessionState::AwaitingOpponent,
            board: Board::initial(),
            current_turn: Role::A,
            players: [
                Participant::new(first.0, Role::A, first.1),
                Participant::new(second.0, Role::B, second.1),
            ],
            created_at: Instant::now(),
        }
    }

    /// Send GAME_START to each participant, then the initial STATE_UPDATE,
    /// and begin accepting moves.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::AwaitingOpponent {
            return Err(SessionError::InvalidState(self.state));
        }

        for player in &self.players {
            player.send(ServerMessage::game_start(player.role));
        }
        self.state = SessionState::InProgress;
        self.broadcast(ServerMessage::state_update(&self.board, self.current_turn));

        info!(
            session = %self.id,
            a = %self.players[0].conn,
            b = %self.players[1].conn,
            "Match started"
        );
        Ok(())
    }

    /// Validate and apply a move from `conn`.
    ///
    /// Precondition checks and the mutation run as one unit; the caller
    /// holds the session lock for the whole call.
    pub fn handle_move(
        &mut self,
        conn: ConnectionId,
        cell: i64,
    ) -> Result<MoveOutcome, SessionError> {
        match self.state {
            SessionState::InProgress => {}
            SessionState::Completed => return Err(SessionError::SessionCompleted),
            other => return Err(SessionError::InvalidState(other)),
        }

        let role = self.role_of(conn).ok_or(SessionError::NotParticipant(conn))?;

        if let Err(rejection) = self.validate(role, cell) {
            debug!(session = %self.id, %conn, %role, cell, %rejection, "Move rejected");
            self.send_to(role, ServerMessage::invalid_move(rejection.to_string()));
            return Ok(MoveOutcome::Rejected(rejection));
        }

        // validate() guarantees 0 <= cell < CELL_COUNT
        let cell = cell as usize;
        let board = match self.board.apply(cell, role) {
            Ok(board) => board,
            Err(_) => {
                let rejection = MoveRejection::CellOccupied;
                self.send_to(role, ServerMessage::invalid_move(rejection.to_string()));
                return Ok(MoveOutcome::Rejected(rejection));
            }
        };
        self.board = board;
        let (row, col) = to_coords(cell);
        info!(
            session = %self.id,
            %conn,
            %role,
            cell,
            row,
            col,
            moves = self.board.occupied(),
            "Move applied"
        );
        debug!("Session {} board:\n{}", self.id, self.board);

        if self.board.has_won(role) {
            return Ok(self.finish(Winner::Player(role)));
        }
        if self.board.is_draw() {
            return Ok(self.finish(Winner::Draw));
        }

        self.current_turn = role.next();
        self.broadcast(ServerMessage::state_update(&self.board, self.current_turn));
        Ok(MoveOutcome::Continued { next_turn: self.current_turn })
    }

    /// Handle `conn` dropping. A live match is forfeited to the other
    /// participant, who receives OPPONENT_DISCONNECTED.
    pub fn handle_disconnect(&mut self, conn: ConnectionId) -> DisconnectOutcome {
        if self.state != SessionState::InProgress {
            return DisconnectOutcome::Ignored;
        }
        let Some(role) = self.role_of(conn) else {
            return DisconnectOutcome::Ignored;
        };

        self.state = SessionState::Completed;
        let winner = role.next();
        self.send_to(winner, ServerMessage::OpponentDisconnected);

        info!(
            session = %self.id,
            %conn,
            %winner,
            duration_ms = self.created_at.elapsed().as_millis() as u64,
            "Participant disconnected, match forfeited"
        );
        DisconnectOutcome::Forfeit { winner }
    }

    /// Broadcast a message to both participants, seat A first.
    pub fn broadcast(&self, message: ServerMessage) {
        for player in &self.players {
            player.send(message.clone());
        }
    }

    /// Role held by `conn`, if it is a participant.
    pub fn role_of(&self, conn: ConnectionId) -> Option<Role> {
        self.players.iter().find(|p| p.conn == conn).map(|p| p.role)
    }

    /// Both participants' connections, A then B.
    pub fn connections(&self) -> [ConnectionId; 2] {
        [self.players[0].conn, self.players[1].conn]
    }

    /// Get session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Role expected to move next.
    pub fn current_turn(&self) -> Role {
        self.current_turn
    }

    /// Whether the session has reached its terminal state.
    pub fn is_completed(&self) -> bool {
        self.state == SessionState::Completed
    }

    fn validate(&self, role: Role, cell: i64) -> Result<(), MoveRejection> {
        if role != self.current_turn {
            return Err(MoveRejection::NotYourTurn);
        }
        if cell < 0 || cell >= CELL_COUNT as i64 {
            return Err(MoveRejection::InvalidCell);
        }
        if !self.board.is_open(cell as usize) {
            return Err(MoveRejection::CellOccupied);
        }
        Ok(())
    }

    fn finish(&mut self, winner: Winner) -> MoveOutcome {
        self.state = SessionState::Completed;
        self.broadcast(ServerMessage::game_over(&self.board, winner));
        info!(session = %self.id, ?winner, "Match over");
        MoveOutcome::Finished(winner)
    }

    fn send_to(&self, role: Role, message: ServerMessage) {
        let seat = match role {
            Role::A => 0,
            Role::B => 1,
        };
        self.players[seat].send(message);
    }
}
