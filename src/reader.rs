//! Line-framing reader.
//!
//! [`LineScanner`] accumulates partial reads in a `bytes::BytesMut` and
//! slices off complete `\n`-terminated frames, each copied into a buffer
//! rented from the connection's [`BufferPool`]. [`spawn_line_reader`] runs
//! the scanner as the single reader task of a connection: it is the sole
//! writer advancing the read cursor, frames are delivered in wire order,
//! and a failure while processing one frame never aborts the loop.
//!
//! Framing rules:
//! - the delimiter byte is excluded from the frame,
//! - an empty line is a valid (empty) frame and is delivered,
//! - a trailing unterminated line is discarded at end of stream,
//! - one read can yield many frames; one frame can span many reads.
//!
//! There is no flow control: the reader consumes bytes as fast as the
//! transport provides them.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};
use crate::pool::{BufferPool, PooledBuf};

/// Default cap on the length of a single line.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Default transport read chunk size.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Configuration for the reader task.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Lines longer than this abort the connection with a protocol error.
    pub max_line_length: usize,
    /// Size of the scratch buffer handed to `read()`.
    pub read_chunk_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

/// Receives frames and the terminal close event of one connection.
///
/// `on_frame` runs synchronously on the reader task; handlers that need to
/// do long-running work should hand off to another task rather than block
/// framing of subsequent lines. `on_close` is invoked exactly once, on
/// graceful EOF, read error, or framing violation.
pub trait FrameSink: Send + Sync + 'static {
    /// Process one frame. The pooled buffer is returned to the pool when
    /// the implementation drops it. An error is logged and the reader
    /// continues with the next frame.
    fn on_frame(&self, frame: PooledBuf) -> Result<()>;

    /// The stream is done; no further frames will be delivered.
    fn on_close(&self);
}

/// Splits a byte stream into newline-delimited frames.
pub struct LineScanner {
    buffer: BytesMut,
    max_line_length: usize,
}

impl LineScanner {
    /// Create a scanner with the default line length cap.
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a scanner with a custom line length cap.
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
            max_line_length,
        }
    }

    /// Append a chunk and extract every complete frame it finishes.
    ///
    /// Partial data is retained for the next push. Frames are backed by
    /// buffers rented from `pool`.
    pub fn push(&mut self, data: &[u8], pool: &BufferPool) -> Result<Vec<PooledBuf>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one(pool)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self, pool: &BufferPool) -> Result<Option<PooledBuf>> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if pos > self.max_line_length {
                    return Err(RpcError::Protocol(format!(
                        "line length {} exceeds maximum {}",
                        pos, self.max_line_length
                    )));
                }
                // Consume the line and its delimiter; the frame excludes
                // the delimiter itself.
                let line = self.buffer.split_to(pos + 1);
                Ok(Some(pool.rent_copy(&line[..pos])))
            }
            None => {
                if self.buffer.len() > self.max_line_length {
                    return Err(RpcError::Protocol(format!(
                        "unterminated line exceeds maximum length {}",
                        self.max_line_length
                    )));
                }
                Ok(None)
            }
        }
    }

    /// Bytes buffered for a not-yet-complete line.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the reader task for one connection.
///
/// Reads until EOF, error, or a `stop` notification, delivering each
/// complete frame to `sink.on_frame` in wire order, then fires
/// `sink.on_close` exactly once. The `stop` signal is how the local side
/// disconnects without waiting for the peer: teardown still funnels
/// through `on_close`, same as a transport close.
pub fn spawn_line_reader<R, S>(
    mut reader: R,
    pool: BufferPool,
    sink: Arc<S>,
    config: ReaderConfig,
    stop: Arc<Notify>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    S: FrameSink,
{
    tokio::spawn(async move {
        let mut scanner = LineScanner::with_max_line_length(config.max_line_length);
        let mut chunk = vec![0u8; config.read_chunk_size];

        loop {
            let read = tokio::select! {
                biased;
                _ = stop.notified() => {
                    tracing::debug!("reader stopped locally");
                    break;
                }
                read = reader.read(&mut chunk) => read,
            };
            let n = match read {
                Ok(0) => break, // Graceful close.
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("read failed: {e}");
                    break;
                }
            };

            let frames = match scanner.push(&chunk[..n], &pool) {
                Ok(frames) => frames,
                Err(e) => {
                    tracing::error!("framing violation: {e}");
                    break;
                }
            };

            for frame in frames {
                // One bad message must not kill the read loop.
                if let Err(e) = sink.on_frame(frame) {
                    tracing::error!("error processing frame: {e}");
                }
            }
        }

        // Any trailing unterminated line in the scanner is discarded here.
        sink.on_close();
    })
}
