//! Session Registry
//!
//! Process-wide lookup from connection to session, plus the FIFO queue of
//! connections waiting for an opponent. All state sits behind one mutex and
//! every mutating call is a single critical section, so pairing is atomic
//! with respect to concurrent connects.
//!
//! Lock order: the registry lock is only ever held while acquiring the lock
//! of a session created inside that same critical section. Code holding a
//! session lock may take the registry lock (to deregister) without risk.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::network::connection::{ConnectionId, Outbox};
use crate::network::protocol::ServerMessage;
use crate::network::session::{MatchSession, SessionId};

/// A session shared between its two connection handlers.
pub type SharedSession = Arc<Mutex<MatchSession>>;

/// A connection not yet paired.
struct WaitingEntry {
    conn: ConnectionId,
    outbox: Outbox,
    queued_at: Instant,
}

#[derive(Default)]
struct RegistryState {
    /// Unpaired connections, oldest first.
    waiting: VecDeque<WaitingEntry>,
    /// Live sessions.
    sessions: BTreeMap<SessionId, SharedSession>,
    /// Connection to session mapping.
    connections: BTreeMap<ConnectionId, SessionId>,
}

/// Result of [`Registry::enqueue_or_pair`].
pub enum Pairing {
    /// Queued; WAITING has already been sent.
    Waiting,
    /// Paired with the queue head. The new session is returned locked and
    /// not yet started, so no move can reach it before its start messages.
    Paired(OwnedMutexGuard<MatchSession>),
}

/// Where a connection currently stands.
pub enum Lookup {
    /// In the waiting queue.
    Waiting,
    /// Participant in a live session.
    InSession(SharedSession),
    /// Neither waiting nor in a session.
    Unknown,
}

/// Registry of waiting connections and live sessions.
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Pair `conn` with the oldest waiting connection, or enqueue it if
    /// nobody is waiting. The waiting connection becomes role A.
    pub async fn enqueue_or_pair(
        &self,
        conn: ConnectionId,
        outbox: Outbox,
    ) -> Pairing {
        let mut state = self.state.lock().await;

        let Some(head) = state.waiting.pop_front() else {
            // Queued before the entry is visible so WAITING cannot trail GAME_START.
            outbox.push(ServerMessage::waiting());
            state.waiting.push_back(WaitingEntry {
                conn,
                outbox,
                queued_at: Instant::now(),
            });
            info!(%conn, queue_len = state.waiting.len(), "Waiting for an opponent");
            return Pairing::Waiting;
        };

        let id = uuid::Uuid::new_v4();
        let session = Arc::new(Mutex::new(MatchSession::new(
            id,
            (head.conn, head.outbox),
            (conn, outbox),
        )));
        // Nobody else can see this session yet, so this never waits.
        let guard = session.clone().lock_owned().await;

        state.sessions.insert(id, session);
        state.connections.insert(head.conn, id);
        state.connections.insert(conn, id);

        info!(
            session = %id,
            a = %head.conn,
            b = %conn,
            waited_ms = head.queued_at.elapsed().as_millis() as u64,
            "Paired connections"
        );
        Pairing::Paired(guard)
    }

    /// Find where `conn` stands.
    pub async fn lookup(&self, conn: ConnectionId) -> Lookup {
        let state = self.state.lock().await;
        if let Some(session) = state
            .connections
            .get(&conn)
            .and_then(|id| state.sessions.get(id))
        {
            return Lookup::InSession(session.clone());
        }
        if state.waiting.iter().any(|e| e.conn == conn) {
            return Lookup::Waiting;
        }
        Lookup::Unknown
    }

    /// Drop `conn` from the waiting queue. Returns false if it was not there.
    pub async fn remove_waiting(&self, conn: ConnectionId) -> bool {
        let mut state = self.state.lock().await;
        let before = state.waiting.len();
        state.waiting.retain(|e| e.conn != conn);
        before != state.waiting.len()
    }

    /// Remove a session and both of its participants.
    pub async fn deregister(&self, session: &MatchSession) {
        let mut state = self.state.lock().await;
        state.sessions.remove(&session.id);
        for conn in session.connections() {
            if state.connections.get(&conn) == Some(&session.id) {
                state.connections.remove(&conn);
            }
        }
        debug!(session = %session.id, live = state.sessions.len(), "Session deregistered");
    }

    /// Live session count.
    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Waiting queue length.
    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.waiting.len()
    }

    /// Connections currently mapped to a session.
    pub async fn tracked_connections(&self) -> usize {
        self.state.lock().await.connections.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
