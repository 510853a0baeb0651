//! Connection plumbing shared by both ends of the chat.
//!
//! A [`Connection`] owns the write side of one socket through a writer task
//! fed by a bounded queue, plus the per-connection identity slot. Sending only
//! enqueues, so a peer that stops reading never stalls the sender. The read
//! side is driven by [`spawn_reader`], which turns inbound frames and
//! end-of-stream into [`ConnectionEvent`]s for whichever session owns the
//! connection.

use std::{
    fmt, io,
    sync::{Mutex, OnceLock},
    time::Duration,
};

use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt},
    select,
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::TransportError,
    frame::{read_frame, write_frame},
};

pub type ConnectionId = u64;

/// Frames that may wait for a slow peer before sends start failing.
pub const OUTBOX_CAPACITY: usize = 1024;

/// How long a closed connection keeps trying to deliver what was queued.
pub const CLOSE_LINGER: Duration = Duration::from_secs(1);

/// What the reader task observed on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Message(String),
    /// This side closed the connection.
    Closed,
    /// The peer went away, gracefully or not.
    Lost(LostCause),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LostCause {
    PeerClosed,
    Error(String),
}

impl fmt::Display for LostCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LostCause::PeerClosed => f.write_str("connection closed by peer"),
            LostCause::Error(cause) => f.write_str(cause),
        }
    }
}

pub struct Connection {
    id: ConnectionId,
    peer: String,
    identity: OnceLock<String>,
    outbox: mpsc::Sender<String>,
    writer: Mutex<Option<JoinHandle<Result<(), TransportError>>>>,
    closed: CancellationToken,
}

impl Connection {
    /// Spawns the writer task, so this must run inside a tokio runtime.
    ///
    /// `closed` is cancelled when this connection closes; pass a child of a
    /// shutdown token to have the connection follow it.
    pub fn new<W>(id: ConnectionId, peer: impl Into<String>, writer: W, closed: CancellationToken) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outbox, queued) = mpsc::channel(OUTBOX_CAPACITY);
        let writer = tokio::spawn(write_loop(id, writer, queued, closed.clone()));
        Self {
            id,
            peer: peer.into(),
            identity: OnceLock::new(),
            outbox,
            writer: Mutex::new(Some(writer)),
            closed,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.get().map(String::as_str)
    }

    /// Binds the login id. Succeeds at most once per connection; a later call
    /// hands the rejected value back.
    pub fn bind_identity(&self, identity: String) -> Result<(), String> {
        self.identity.set(identity)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Queues `text` for the writer task without waiting for the peer.
    pub fn send(&self, text: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::NotConnected);
        }
        self.outbox
            .try_send(text.to_string())
            .map_err(|error| match error {
                TrySendError::Full(_) => TransportError::Backlogged,
                TrySendError::Closed(_) => TransportError::NotConnected,
            })
    }

    /// Stops the reader and tells the writer to deliver what is already
    /// queued, then shut down the write side. Returns immediately; closing
    /// twice is a no-op.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Waits for the writer task and reports how it ended: an error means
    /// queued frames were lost or the write side did not shut down cleanly.
    /// After [`Connection::close`] this takes at most about two
    /// [`CLOSE_LINGER`] periods. Only the first call observes the outcome.
    pub async fn flushed(&self) -> Result<(), TransportError> {
        let task = match self.writer.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match task {
            Some(task) => task.await.map_err(io::Error::other)?,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("identity", &self.identity())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn write_loop<W>(
    id: ConnectionId,
    mut writer: W,
    mut queued: mpsc::Receiver<String>,
    closed: CancellationToken,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Send + Unpin,
{
    loop {
        let text = select! {
            biased;
            _ = closed.cancelled() => break,
            text = queued.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };

        if let Err(error) = write_or_linger(&mut writer, &text, &closed).await {
            // Dropping the queue makes later sends fail with `NotConnected`.
            debug!(connection = id, %error, "write failed");
            return Err(error);
        }
    }

    queued.close();
    let drain = async {
        while let Some(text) = queued.recv().await {
            write_frame(&mut writer, &text).await?;
        }
        Ok::<(), TransportError>(())
    };
    let drained = match timeout(CLOSE_LINGER, drain).await {
        Ok(drained) => drained,
        Err(_) => {
            debug!(connection = id, "peer not reading; dropping queued frames");
            Err(io::Error::from(io::ErrorKind::TimedOut).into())
        }
    };

    writer.shutdown().await?;
    drained
}

/// Writes one frame. Once `closed` fires the write gets [`CLOSE_LINGER`] to
/// finish, so a frame is never cut short unless the peer stopped reading.
async fn write_or_linger<W>(
    writer: &mut W,
    text: &str,
    closed: &CancellationToken,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Send + Unpin,
{
    let write = write_frame(writer, text);
    tokio::pin!(write);
    select! {
        biased;
        written = &mut write => written,
        _ = closed.cancelled() => match timeout(CLOSE_LINGER, &mut write).await {
            Ok(written) => written,
            Err(_) => Err(io::Error::from(io::ErrorKind::TimedOut).into()),
        },
    }
}

/// Forwards everything read from `reader` as events until the stream ends or
/// `closed` is cancelled. Exactly one terminal event (`Closed` or `Lost`) is
/// sent unless the receiver is already gone.
pub fn spawn_reader<R>(
    mut reader: R,
    closed: CancellationToken,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let frame = select! {
                biased;
                _ = closed.cancelled() => {
                    let _ = events.send(ConnectionEvent::Closed);
                    return;
                }
                frame = read_frame(&mut reader) => frame,
            };

            let event = match frame {
                Ok(Some(text)) => ConnectionEvent::Message(text),
                Ok(None) => {
                    let _ = events.send(ConnectionEvent::Lost(LostCause::PeerClosed));
                    return;
                }
                Err(err) => {
                    let _ = events.send(ConnectionEvent::Lost(LostCause::Error(err.to_string())));
                    return;
                }
            };

            if events.send(event).is_err() {
                return;
            }
        }
    })
}
