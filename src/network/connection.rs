//! Connection Handler
//!
//! One read loop and one writer task per connection. The read loop decodes
//! newline-delimited frames and hands moves to the [`Matchmaker`]; the writer
//! drains the connection's outbound channel into the socket in the order
//! messages were produced. Once the writer delivers a terminal message
//! (GAME_OVER or OPPONENT_DISCONNECTED) the connection is closed.
//!
//! Sessions queue messages through an [`Outbox`] without waiting. A
//! connection whose queue overflows is dropped and handled as a disconnect.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, error, info, warn};

use crate::network::matchmaker::{MatchError, Matchmaker};
use crate::network::protocol::{ClientMessage, ServerMessage, MAX_FRAME_LEN};

/// How long a closing connection waits for queued messages to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Process-unique connection identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate the next identifier.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// =============================================================================
// OUTBOUND QUEUE
// =============================================================================

#[derive(Debug, Default)]
struct Fault {
    tripped: AtomicBool,
    notify: Notify,
}

/// Outbound queue of one connection, shared with the session it plays in.
///
/// Pushing never waits. A push that finds the queue full trips the fault:
/// every later push is dropped and the owning handler closes the connection
/// as a disconnect.
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::Sender<ServerMessage>,
    fault: Arc<Fault>,
}

impl Outbox {
    /// Create a queue holding up to `capacity` undelivered messages.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (sender, rx) = mpsc::channel(capacity.max(1));
        let outbox = Self {
            sender,
            fault: Arc::new(Fault::default()),
        };
        (outbox, rx)
    }

    /// Queue a message. Returns false if it was dropped.
    pub fn push(&self, message: ServerMessage) -> bool {
        if self.is_faulted() {
            return false;
        }
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.fault.tripped.store(true, Ordering::Release);
                self.fault.notify.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Whether a push has overflowed the queue.
    pub fn is_faulted(&self) -> bool {
        self.fault.tripped.load(Ordering::Acquire)
    }

    /// Resolves once the queue has overflowed.
    pub async fn faulted(&self) {
        if self.is_faulted() {
            return;
        }
        self.fault.notify.notified().await;
    }
}

/// Errors that end the read loop.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Socket read failed.
    #[error("Read failed: {0}")]
    Io(#[from] std::io::Error),

    /// Line exceeded the frame limit without a delimiter.
    #[error("Frame exceeds {} bytes", MAX_FRAME_LEN)]
    TooLong,
}

/// What the read loop does after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Serve one connection until it closes, its match ends, or shutdown.
pub async fn handle_connection<S>(
    conn: ConnectionId,
    stream: S,
    matchmaker: Arc<Matchmaker>,
    outbound_buffer: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let (outbox, msg_rx) = Outbox::new(outbound_buffer);

    let mut sender_task = tokio::spawn(write_loop(conn, writer, msg_rx));
    let mut writer_done = false;

    matchmaker.on_connect(conn, outbox.clone()).await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                debug!(%conn, "Shutdown signal received");
                break;
            }
            _ = outbox.faulted() => {
                warn!(%conn, "Outbound buffer full, dropping connection");
                break;
            }
            _ = &mut sender_task => {
                writer_done = true;
                break;
            }
            frame = read_frame(&mut reader) => {
                match frame {
                    Ok(Some(frame)) => {
                        if frame.iter().all(u8::is_ascii_whitespace) {
                            continue;
                        }
                        if dispatch(conn, &frame, &matchmaker, &outbox).await == Flow::Close {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(%conn, "Client closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(%conn, "Dropping connection: {}", e);
                        break;
                    }
                }
            }
        }
    }

    matchmaker.on_disconnect(conn).await;

    // Let anything already queued (a final ERROR, say) reach the socket.
    drop(outbox);
    if !writer_done && tokio::time::timeout(CLOSE_GRACE, &mut sender_task).await.is_err() {
        sender_task.abort();
    }

    info!(%conn, "Connection closed");
}

/// Decode one frame and act on it.
async fn dispatch(conn: ConnectionId, frame: &[u8], matchmaker: &Matchmaker, outbox: &Outbox) -> Flow {
    let message = match std::str::from_utf8(frame) {
        Ok(text) => ClientMessage::from_frame(text).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    let message = match message {
        Ok(message) => message,
        Err(e) => {
            debug!(%conn, "Invalid message: {}", e);
            outbox.push(ServerMessage::error("Invalid message format."));
            return Flow::Continue;
        }
    };

    match message {
        ClientMessage::MakeMove { cell } => match matchmaker.on_move(conn, cell).await {
            Ok(outcome) => {
                debug!(%conn, cell, ?outcome, "Move handled");
                Flow::Continue
            }
            Err(e @ MatchError::NotInGame) => {
                outbox.push(ServerMessage::error(e.to_string()));
                Flow::Continue
            }
            Err(e @ MatchError::SessionNotFound) => {
                warn!(%conn, "Move for a missing session");
                outbox.push(ServerMessage::error(e.to_string()));
                Flow::Close
            }
            Err(MatchError::Session(e)) => {
                warn!(%conn, "Move ignored: {}", e);
                Flow::Continue
            }
        },
    }
}

/// Read one `\n`-terminated frame, delimiter included. `Ok(None)` on end of
/// stream, including a stream that ends partway through a frame.
async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(128);
    // +2 leaves room for "\r\n" after a maximum-length body.
    let limit = MAX_FRAME_LEN as u64 + 2;
    let read = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;

    if read == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if buf.len() as u64 >= limit {
            return Err(FrameError::TooLong);
        }
        return Ok(None);
    }
    Ok(Some(buf))
}

/// Drain the outbound channel into the socket.
async fn write_loop<W>(conn: ConnectionId, mut writer: W, mut rx: mpsc::Receiver<ServerMessage>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(%conn, "Failed to serialize message: {}", e);
                continue;
            }
        };
        if let Err(e) = writer.write_all(frame.as_bytes()).await {
            debug!(%conn, "Write failed: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            debug!(%conn, "Flush failed: {}", e);
            break;
        }
        if message.is_terminal() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}
