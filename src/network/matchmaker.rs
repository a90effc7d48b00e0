//! Matchmaker
//!
//! The only surface connection handlers talk to. Pairs new connections
//! through the [`Registry`], routes moves to the owning session and turns
//! dropped connections into forfeits. Sessions that finish are removed from
//! the registry while their lock is still held, so a completed session is
//! never observable as live.

use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::network::connection::{ConnectionId, Outbox};
use crate::network::registry::{Lookup, Pairing, Registry};
use crate::network::session::{MoveOutcome, SessionError};

/// Errors surfaced to the connection handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    /// Connection is still waiting for an opponent.
    #[error("Not in a game.")]
    NotInGame,

    /// Connection references a session that no longer exists.
    #[error("Game not found.")]
    SessionNotFound,

    /// Session refused the operation without a reply.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Pairs connections into sessions and routes their traffic.
pub struct Matchmaker {
    registry: Arc<Registry>,
}

impl Matchmaker {
    /// Create a matchmaker over a registry.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Underlying registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// A new connection arrived: queue it, or pair it and start the match.
    #[instrument(skip(self, outbox))]
    pub async fn on_connect(&self, conn: ConnectionId, outbox: Outbox) {
        match self.registry.enqueue_or_pair(conn, outbox).await {
            Pairing::Waiting => {}
            Pairing::Paired(mut session) => {
                if let Err(e) = session.start() {
                    error!(session = %session.id, "Failed to start match: {}", e);
                }
            }
        }
    }

    /// Route a MAKE_MOVE from `conn` to its session.
    pub async fn on_move(&self, conn: ConnectionId, cell: i64) -> Result<MoveOutcome, MatchError> {
        let session = match self.registry.lookup(conn).await {
            Lookup::InSession(session) => session,
            Lookup::Waiting => return Err(MatchError::NotInGame),
            Lookup::Unknown => return Err(MatchError::SessionNotFound),
        };

        let mut session = session.lock().await;
        let outcome = match session.handle_move(conn, cell) {
            Ok(outcome) => outcome,
            // Finished between lookup and lock; the entry is already gone.
            Err(SessionError::SessionCompleted) => return Err(MatchError::SessionNotFound),
            Err(e) => return Err(e.into()),
        };

        if outcome.is_terminal() {
            self.registry.deregister(&session).await;
        }
        Ok(outcome)
    }

    /// `conn` went away. Leaves the queue, or forfeits its live match.
    #[instrument(skip(self))]
    pub async fn on_disconnect(&self, conn: ConnectionId) {
        if self.registry.remove_waiting(conn).await {
            info!("Left the waiting queue");
            return;
        }

        let Lookup::InSession(session) = self.registry.lookup(conn).await else {
            debug!("Not in a session");
            return;
        };

        let mut session = session.lock().await;
        let outcome = session.handle_disconnect(conn);
        if session.is_completed() {
            self.registry.deregister(&session).await;
        }
        debug!(?outcome, "Disconnect handled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::Role;
    use crate::network::protocol::{ServerMessage, Winner};
    use tokio::sync::mpsc;

    struct Client {
        conn: ConnectionId,
        rx: mpsc::Receiver<ServerMessage>,
    }

    impl Client {
        async fn connect(matchmaker: &Matchmaker, id: u64) -> Self {
            let conn = ConnectionId(id);
            let (tx, rx) = Outbox::new(64);
            matchmaker.on_connect(conn, tx).await;
            Self { conn, rx }
        }

        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }
    }

    fn matchmaker() -> Matchmaker {
        Matchmaker::new(Arc::new(Registry::new()))
    }

    async fn assert_no_orphans(matchmaker: &Matchmaker) {
        assert_eq!(matchmaker.registry().session_count().await, 0);
        assert_eq!(matchmaker.registry().tracked_connections().await, 0);
    }

    #[tokio::test]
    async fn test_fifo_pairing() {
        let mm = matchmaker();
        let mut c1 = Client::connect(&mm, 1).await;
        let mut c2 = Client::connect(&mm, 2).await;
        let mut c3 = Client::connect(&mm, 3).await;

        let initial = ServerMessage::state_update(&crate::game::board::Board::initial(), Role::A);
        assert_eq!(
            c1.drain(),
            vec![ServerMessage::waiting(), ServerMessage::game_start(Role::A), initial.clone()]
        );
        assert_eq!(c2.drain(), vec![ServerMessage::game_start(Role::B), initial]);
        assert_eq!(c3.drain(), vec![ServerMessage::waiting()]);
        assert_eq!(mm.registry().queue_len().await, 1);
    }

    #[tokio::test]
    async fn test_win_deregisters_session() {
        let mm = matchmaker();
        let mut a = Client::connect(&mm, 1).await;
        let mut b = Client::connect(&mm, 2).await;

        for (conn, cell) in [(a.conn, 0), (b.conn, 3), (a.conn, 1), (b.conn, 4)] {
            assert!(matches!(mm.on_move(conn, cell).await, Ok(MoveOutcome::Continued { .. })));
        }
        a.drain();
        b.drain();

        let outcome = mm.on_move(a.conn, 2).await.unwrap();
        assert_eq!(outcome, MoveOutcome::Finished(Winner::Player(Role::A)));
        assert_no_orphans(&mm).await;

        let over = ServerMessage::GameOver {
            board: [1, 1, 1, 2, 2, 0, 0, 0, 0],
            winner: Winner::Player(Role::A),
        };
        assert_eq!(a.drain(), vec![over.clone()]);
        assert_eq!(b.drain(), vec![over]);

        // Late moves hit a missing session.
        assert_eq!(mm.on_move(b.conn, 5).await, Err(MatchError::SessionNotFound));
        assert!(b.drain().is_empty());
    }

    #[tokio::test]
    async fn test_draw_deregisters_session() {
        let mm = matchmaker();
        let a = Client::connect(&mm, 1).await;
        let b = Client::connect(&mm, 2).await;
        let moves = [
            (a.conn, 0), (b.conn, 1), (a.conn, 2),
            (b.conn, 4), (a.conn, 3), (b.conn, 5),
            (a.conn, 7), (b.conn, 6),
        ];
        for (conn, cell) in moves {
            mm.on_move(conn, cell).await.unwrap();
        }

        assert_eq!(mm.on_move(a.conn, 8).await, Ok(MoveOutcome::Finished(Winner::Draw)));
        assert_no_orphans(&mm).await;
    }

    #[tokio::test]
    async fn test_wrong_turn_keeps_state() {
        let mm = matchmaker();
        let _a = Client::connect(&mm, 1).await;
        let mut b = Client::connect(&mm, 2).await;
        b.drain();

        let outcome = mm.on_move(b.conn, 4).await.unwrap();
        assert!(matches!(outcome, MoveOutcome::Rejected(_)));
        assert_eq!(b.drain(), vec![ServerMessage::invalid_move("Not your turn.")]);
        assert_eq!(mm.registry().session_count().await, 1);
    }

    #[tokio::test]
    async fn test_move_while_waiting() {
        let mm = matchmaker();
        let a = Client::connect(&mm, 1).await;
        assert_eq!(mm.on_move(a.conn, 0).await, Err(MatchError::NotInGame));
    }

    #[tokio::test]
    async fn test_disconnect_mid_game() {
        let mm = matchmaker();
        let a = Client::connect(&mm, 1).await;
        let mut b = Client::connect(&mm, 2).await;
        mm.on_move(a.conn, 4).await.unwrap();
        b.drain();

        mm.on_disconnect(a.conn).await;

        assert_eq!(b.drain(), vec![ServerMessage::OpponentDisconnected]);
        assert_no_orphans(&mm).await;
        assert_eq!(mm.on_move(b.conn, 0).await, Err(MatchError::SessionNotFound));

        // The survivor leaving afterwards changes nothing.
        mm.on_disconnect(b.conn).await;
        assert_no_orphans(&mm).await;
    }

    #[tokio::test]
    async fn test_disconnect_while_waiting() {
        let mm = matchmaker();
        let a = Client::connect(&mm, 1).await;
        mm.on_disconnect(a.conn).await;
        assert_eq!(mm.registry().queue_len().await, 0);

        // Next arrival waits instead of pairing with the departed connection.
        let mut b = Client::connect(&mm, 2).await;
        assert_eq!(b.drain(), vec![ServerMessage::waiting()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_connects_pair_exactly_once() {
        let mm = Arc::new(matchmaker());
        let mut handles = Vec::new();

        for id in 0..64 {
            let mm = mm.clone();
            handles.push(tokio::spawn(async move {
                let conn = ConnectionId(id);
                let (tx, rx) = Outbox::new(64);
                mm.on_connect(conn, tx).await;
                rx
            }));
        }

        let mut inboxes = Vec::new();
        for handle in handles {
            inboxes.push(handle.await.unwrap());
        }

        assert_eq!(mm.registry().session_count().await, 32);
        assert_eq!(mm.registry().queue_len().await, 0);
        assert_eq!(mm.registry().tracked_connections().await, 64);

        let mut starts = 0;
        for mut rx in inboxes {
            let mut game_starts = 0;
            while let Ok(msg) = rx.try_recv() {
                if matches!(msg, ServerMessage::GameStart { .. }) {
                    game_starts += 1;
                }
            }
            assert_eq!(game_starts, 1);
            starts += game_starts;
        }
        assert_eq!(starts, 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_moves_serialize() {
        let mm = Arc::new(matchmaker());
        let a = Client::connect(&mm, 1).await;
        let b = Client::connect(&mm, 2).await;

        // Both sides fire every cell at once; exactly one game's worth of
        // moves may land and the turn must alternate.
        let mut handles = Vec::new();
        for (conn, offset) in [(a.conn, 0), (b.conn, 1)] {
            let mm = mm.clone();
            handles.push(tokio::spawn(async move {
                let mut applied = Vec::new();
                for round in 0..20 {
                    let cell = (round * 2 + offset) % 9;
                    if let Ok(MoveOutcome::Continued { .. } | MoveOutcome::Finished(_)) =
                        mm.on_move(conn, cell).await
                    {
                        applied.push(cell);
                    }
                    tokio::task::yield_now().await;
                }
                applied
            }));
        }

        let mut total = 0;
        let mut counts = Vec::new();
        for handle in handles {
            let applied = handle.await.unwrap();
            total += applied.len();
            counts.push(applied.len());
        }

        assert!(total <= 9);
        // A moves first, so A has made the same number of moves as B or one more.
        assert!(counts[0] == counts[1] || counts[0] == counts[1] + 1);
    }
}
