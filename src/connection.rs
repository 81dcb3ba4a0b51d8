//! Per-connection server session state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Notify;

use crate::codec::JsonCodec;
use crate::error::{Result, RpcError};
use crate::writer::{OutboundLine, WriterHandle};

/// One accepted client connection on the server.
///
/// Holds the write path, the connected flag, and the stop signal for the
/// connection's read loop. The flag flips false exactly once, on the first
/// write failure, on read-loop termination, or on an explicit
/// [`kill`](Self::kill), after which every further write is rejected with
/// `ConnectionClosed`. Registry removal and the disconnect hook are driven
/// by the read loop, which `kill` wakes through the stop signal.
pub struct ServerConnection {
    id: u64,
    address: String,
    writer: WriterHandle,
    connected: AtomicBool,
    stop: Arc<Notify>,
}

impl ServerConnection {
    pub(crate) fn new(id: u64, address: String, writer: WriterHandle, stop: Arc<Notify>) -> Self {
        Self {
            id,
            address,
            writer,
            connected: AtomicBool::new(true),
            stop,
        }
    }

    /// Server-assigned connection id (monotonically increasing).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer address as reported at accept time.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// False once the connection has begun tearing down.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Serialize a value as one JSON line and queue it for writing.
    ///
    /// A failure kills the connection: the flag flips and the error is
    /// returned; subsequent writes are rejected immediately.
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<()> {
        if !self.is_connected() {
            return Err(RpcError::ConnectionClosed);
        }
        let line = JsonCodec::encode_line(value)?;
        self.send_line(Bytes::from(line)).await
    }

    /// Write a raw pre-formatted message as one line.
    ///
    /// The text must not contain the frame delimiter.
    pub async fn write_string(&self, text: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(RpcError::ConnectionClosed);
        }
        if text.contains('\n') {
            return Err(RpcError::Protocol(
                "raw message may not contain a newline".into(),
            ));
        }
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(b'\n');
        self.send_line(Bytes::from(bytes)).await
    }

    async fn send_line(&self, line: Bytes) -> Result<()> {
        match self.writer.send(OutboundLine::new(line)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.kill();
                Err(e)
            }
        }
    }

    /// Begin teardown. Idempotent: returns true only for the call that
    /// performed the transition.
    ///
    /// Wakes the connection's read loop, which then runs the shared close
    /// path (registry removal, disconnect hook). The writer task exits
    /// once the last handle to this connection is gone, dropping the
    /// transport and signalling the peer.
    pub fn kill(&self) -> bool {
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        if was_connected {
            self.stop.notify_one();
            tracing::debug!(id = self.id, "connection killed");
        }
        was_connected
    }
}
