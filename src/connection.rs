//! Per-connection request/response lifecycle.
//!
//! Each accepted connection carries exactly one request and one response:
//! read and frame the request, decode it, queue it for the host thread, wait
//! for the reply, write it back, close. Malformed or oversized requests are
//! answered directly without touching the queue.

use crate::handoff::{HandoffQueue, PushError, QueueItem, ReplySlot};
use crate::protocol::{self, FrameStatus, Framing, Response, Status};
use bytes::{Buf, BytesMut};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

/// Bytes requested from the socket per read
const READ_CHUNK: usize = 4 * 1024;

pub const QUEUE_FULL_MESSAGE: &str = "server busy: command queue is full";
pub const DROPPED_MESSAGE: &str = "command was dropped before it could be executed";

/// Per-connection limits shared by all handlers.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub framing: Framing,
    pub max_request_bytes: usize,
    /// Deadline for receiving the whole request (None = wait forever)
    pub read_timeout: Option<Duration>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            framing: Framing::Json,
            max_request_bytes: 64 * 1024,
            read_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// The peer sent nothing before closing or timing out.
    PeerClosed,
    /// A response with this status was written.
    Responded(Status),
}

/// Transport failures on one connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),
}

enum ReadOutcome {
    /// Request payload with framing removed.
    Message(BytesMut),
    /// Nothing was received.
    Closed,
    /// Request exceeds the size limit.
    TooLarge,
    /// Length-prefixed frame cut short by close or timeout.
    Truncated,
}

/// Serve one connection to completion.
///
/// The stream is dropped (and so closed) when this returns, whatever the
/// outcome.
pub async fn handle_connection<S>(
    mut stream: S,
    queue: &HandoffQueue,
    settings: &ConnectionSettings,
) -> Result<ConnectionOutcome, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let response = match read_request(&mut stream, settings).await? {
        ReadOutcome::Closed => {
            trace!("Connection closed before sending a request");
            return Ok(ConnectionOutcome::PeerClosed);
        }
        ReadOutcome::TooLarge => {
            debug!(limit = settings.max_request_bytes, "Request too large");
            Response::error(format!(
                "request exceeds {} bytes",
                settings.max_request_bytes
            ))
        }
        ReadOutcome::Truncated => Response::error("truncated request"),
        ReadOutcome::Message(payload) => match protocol::decode(&payload) {
            Ok(command) => dispatch(command, queue).await,
            Err(e) => {
                debug!(error = %e, "Rejecting undecodable request");
                Response::error(e.to_string())
            }
        },
    };

    let status = response.status;
    stream
        .write_all(&protocol::encode(&response, settings.framing))
        .await?;
    stream.shutdown().await?;
    Ok(ConnectionOutcome::Responded(status))
}

/// Queue a command for the host thread and wait for its response.
async fn dispatch(command: protocol::Command, queue: &HandoffQueue) -> Response {
    trace!(action = %command.action, "Queueing command");
    let (slot, reply) = ReplySlot::channel();

    match queue.push(QueueItem::new(command, slot)) {
        Ok(()) => reply
            .await
            .unwrap_or_else(|_| Response::error(DROPPED_MESSAGE)),
        Err(PushError::Full { item, capacity }) => {
            warn!(
                action = %item.command.action,
                capacity,
                "Command queue full, rejecting request"
            );
            Response::error(QUEUE_FULL_MESSAGE)
        }
    }
}

async fn read_request<S>(
    stream: &mut S,
    settings: &ConnectionSettings,
) -> Result<ReadOutcome, ConnectionError>
where
    S: AsyncRead + Unpin,
{
    let deadline = settings.read_timeout.map(|t| Instant::now() + t);
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        match protocol::frame(&buf, settings.framing, settings.max_request_bytes) {
            FrameStatus::Complete(range) => {
                let mut message = buf.split_to(range.end);
                message.advance(range.start);
                return Ok(ReadOutcome::Message(message));
            }
            FrameStatus::TooLarge => return Ok(ReadOutcome::TooLarge),
            FrameStatus::Incomplete => {}
        }

        buf.reserve(READ_CHUNK);
        let read = match deadline {
            Some(deadline) => match timeout_at(deadline, stream.read_buf(&mut buf)).await {
                Ok(read) => read?,
                Err(_) => {
                    debug!(received = buf.len(), "Timed out reading request");
                    return Ok(unterminated(buf, settings.framing));
                }
            },
            None => stream.read_buf(&mut buf).await?,
        };

        if read == 0 {
            return Ok(unterminated(buf, settings.framing));
        }
    }
}

/// Whatever arrived before the peer stopped sending.
fn unterminated(buf: BytesMut, framing: Framing) -> ReadOutcome {
    if buf.is_empty() {
        ReadOutcome::Closed
    } else {
        match framing {
            Framing::Json => ReadOutcome::Message(buf),
            Framing::LengthPrefixed => ReadOutcome::Truncated,
        }
    }
}
