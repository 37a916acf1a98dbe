//! Per-socket plumbing: framed reads and coalesced writes.
//!
//! Each accepted socket is split into a reader task and a writer task. The
//! reader decodes length-prefixed frames and forwards them to the server
//! event loop; the writer drains an outgoing channel. All session state
//! stays in the event loop — the tasks here only move bytes.

use crate::ServerEvent;
use bytes::{Bytes, BytesMut};
use padlink_protocol::{ClientMessage, FrameDecoder, ServerMessage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle to one peer's reader and writer tasks
///
/// Dropping the handle stops the reader and closes the outgoing channel;
/// the writer flushes whatever is still queued (a QUIT broadcast, say) and
/// exits on its own, releasing the socket.
#[derive(Debug)]
pub(crate) struct Connection {
    outgoing: mpsc::UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Splits `stream` and spawns the reader and writer tasks
    ///
    /// Frames decoded from the socket arrive at the event loop as
    /// [`ServerEvent::Message`]; EOF, transport errors, and malformed
    /// packets all surface as a single [`ServerEvent::Closed`].
    pub(crate) fn spawn(stream: TcpStream, id: u32, events: mpsc::Sender<ServerEvent>) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(read_half, id, events));
        tokio::spawn(write_loop(write_half, id, outgoing_rx));

        Self { outgoing, reader }
    }

    /// Encodes `message` and queues it for the writer task
    ///
    /// Queued frames are flushed in order; frames queued while a write is in
    /// flight are merged into the next write.
    pub(crate) fn send(&self, message: &ServerMessage) {
        match message.encode().into_frame() {
            Ok(frame) => {
                // Fails only when the writer task is gone; the reader's
                // Closed event handles the cleanup.
                let _ = self.outgoing.send(frame);
            }
            Err(e) => {
                tracing::error!(error = %e, "dropping unencodable frame");
            }
        }
    }

    /// Stops reading immediately; queued outgoing frames still flush
    pub(crate) fn close(&self) {
        self.reader.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The outgoing sender drops with self, ending the writer once its
        // queue is flushed; the reader would otherwise outlive the session.
        self.reader.abort();
    }
}

/// Reads frames and forwards decoded messages to the event loop
async fn read_loop(mut read_half: OwnedReadHalf, id: u32, events: mpsc::Sender<ServerEvent>) {
    let mut decoder = FrameDecoder::new();

    'read: loop {
        match read_half.read_buf(decoder.buffer_mut()).await {
            Ok(0) => {
                tracing::debug!(session = id, "peer closed connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(session = id, error = %e, "read failed");
                break;
            }
        }

        while let Some(payload) = decoder.next_frame() {
            match ClientMessage::decode(payload) {
                Ok(message) => {
                    if events
                        .send(ServerEvent::Message { id, message })
                        .await
                        .is_err()
                    {
                        // Event loop is gone; nothing left to notify.
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(session = id, error = %e, "malformed packet");
                    break 'read;
                }
            }
        }
    }

    let _ = events.send(ServerEvent::Closed { id }).await;
}

/// Drains the outgoing channel, merging queued frames into single writes
///
/// At most one write is ever in flight. Everything queued while the
/// previous write was in progress is drained with `try_recv` and flushed
/// as one buffer, so a burst of sends costs one syscall.
async fn write_loop<W>(mut write_half: W, id: u32, mut outgoing: mpsc::UnboundedReceiver<Bytes>)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();

    while let Some(frame) = outgoing.recv().await {
        buf.extend_from_slice(&frame);
        while let Ok(more) = outgoing.try_recv() {
            buf.extend_from_slice(&more);
        }

        if let Err(e) = write_half.write_all(&buf).await {
            tracing::debug!(session = id, error = %e, "write failed");
            return;
        }
        buf.clear();
    }
}
