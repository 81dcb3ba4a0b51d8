//! Dedicated writer task for the outbound line path.
//!
//! Instead of sharing the write half behind a mutex, each connection owns
//! one writer task fed through an mpsc channel. Serialized lines from any
//! number of handler tasks funnel into the channel; the task drains it,
//! batching ready lines into a single vectored write followed by a flush.
//!
//! ```text
//! handler 1 ─┐
//! handler 2 ─┼─► mpsc::Sender<OutboundLine> ─► writer task ─► stream
//! handler N ─┘
//! ```
//!
//! When the channel closes (all handles dropped) the task flushes and
//! exits. When a write fails the task exits with the error and every later
//! `send` observes `ConnectionClosed`; the session layer turns that into
//! its unified teardown.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};

/// Default channel capacity for queued outbound lines.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum lines coalesced into one vectored write.
const MAX_BATCH_SIZE: usize = 64;

/// One encoded line, delimiter included.
#[derive(Debug, Clone)]
pub struct OutboundLine(pub Bytes);

impl OutboundLine {
    /// Wrap an already newline-terminated encoding.
    pub fn new(bytes: Bytes) -> Self {
        debug_assert_eq!(bytes.last(), Some(&b'\n'));
        Self(bytes)
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Capacity of the outbound line queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Cheaply cloneable handle for queueing lines to the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundLine>,
}

impl WriterHandle {
    /// Queue a line, waiting for channel capacity if necessary.
    pub async fn send(&self, line: OutboundLine) -> Result<()> {
        self.tx
            .send(line)
            .await
            .map_err(|_| RpcError::ConnectionClosed)
    }

    /// Queue a line without waiting; fails if the queue is full or closed.
    pub fn try_send(&self, line: OutboundLine) -> Result<()> {
        self.tx.try_send(line).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                RpcError::Protocol("outbound queue full".into())
            }
            mpsc::error::TrySendError::Closed(_) => RpcError::ConnectionClosed,
        })
    }
}

/// Spawn the writer task for one connection.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundLine>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(line) => line,
            None => return Ok(()), // All handles dropped; clean shutdown.
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(line) => batch.push(line),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::debug!("writer task exiting: {e}");
            return Err(e);
        }
    }
}

/// Write a batch of lines with a single vectored write where possible.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundLine]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = batch.iter().map(|l| l.0.len()).sum();
    let slices: Vec<IoSlice<'_>> = batch.iter().map(|l| IoSlice::new(&l.0)).collect();

    let mut written = writer.write_vectored(&slices).await?;
    if written == 0 && total > 0 {
        return Err(RpcError::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "write_vectored returned 0",
        )));
    }

    // Partial write: fall back to finishing each line sequentially.
    while written < total {
        let mut skip = written;
        let mut progressed = false;
        for line in batch {
            if skip >= line.0.len() {
                skip -= line.0.len();
                continue;
            }
            let n = writer.write(&line.0[skip..]).await?;
            if n == 0 {
                return Err(RpcError::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "write returned 0",
                )));
            }
            written += n;
            progressed = true;
            break;
        }
        if !progressed {
            break;
        }
    }

    writer.flush().await?;
    Ok(())
}
