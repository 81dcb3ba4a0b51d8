//! JSON-RPC client session.
//!
//! [`RpcClient`] owns one duplex transport: a reader task that correlates
//! inbound response lines against the [`PendingTable`], and a writer task
//! that serializes outbound requests. `invoke` races the pending slot
//! against a timer; whichever side loses, the resources of both branches
//! are released: a timed-out slot is removed from the table, and a late
//! response that finds no slot is dropped back into the buffer pool.
//!
//! # Example
//!
//! ```ignore
//! use linerpc::RpcClient;
//! use serde_json::json;
//!
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:9000").await?;
//! let client = RpcClient::connect(stream);
//! let sum: i64 = client.invoke("add", vec![json!(2), json!(3)]).await?;
//! client.notify("log", vec![json!("done")]).await?;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::codec::JsonCodec;
use crate::error::{Result, RpcError};
use crate::pending::PendingTable;
use crate::pool::{BufferPool, PoolConfig};
use crate::protocol::{Outcome, Request, Response, ResponseId};
use crate::reader::{spawn_line_reader, FrameSink, ReaderConfig};
use crate::writer::{spawn_writer_task, OutboundLine, WriterConfig};

/// Default invoke timeout.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Client tuning knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long `invoke` waits for the matching response.
    pub invoke_timeout: Duration,
    pub reader: ReaderConfig,
    pub writer: WriterConfig,
    pub pool: PoolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
            reader: ReaderConfig::default(),
            writer: WriterConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

/// Fluent builder for an [`RpcClient`].
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the invoke timeout.
    pub fn invoke_timeout(mut self, timeout: Duration) -> Self {
        self.config.invoke_timeout = timeout;
        self
    }

    /// Set the outbound channel capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    /// Cap the length of inbound lines.
    pub fn max_line_length(mut self, max: usize) -> Self {
        self.config.reader.max_line_length = max;
        self
    }

    /// Attach to a connected duplex transport and start the session.
    pub fn connect<IO>(self, io: IO) -> RpcClient
    where
        IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
    {
        RpcClient::with_config(io, self.config)
    }
}

/// A connected JSON-RPC client.
pub struct RpcClient {
    next_id: AtomicU64,
    pending: Arc<PendingTable>,
    writer: crate::writer::WriterHandle,
    pool: BufferPool,
    invoke_timeout: Duration,
    connected: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    stop: Arc<Notify>,
    _reader_task: JoinHandle<()>,
    _writer_task: JoinHandle<Result<()>>,
}

impl RpcClient {
    /// Create a client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Attach to a connected duplex transport with default configuration.
    pub fn connect<IO>(io: IO) -> Self
    where
        IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
    {
        Self::with_config(io, ClientConfig::default())
    }

    /// Attach with explicit configuration.
    pub fn with_config<IO>(io: IO, config: ClientConfig) -> Self
    where
        IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let pool = BufferPool::new(config.pool.clone());
        let pending = Arc::new(PendingTable::new());
        let connected = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());
        let stop = Arc::new(Notify::new());

        let (writer, writer_task) = spawn_writer_task(write_half, config.writer.clone());

        let sink = Arc::new(ClientSink {
            pending: Arc::clone(&pending),
            connected: Arc::clone(&connected),
            shutdown: Arc::clone(&shutdown),
        });
        let reader_task = spawn_line_reader(
            read_half,
            pool.clone(),
            sink,
            config.reader.clone(),
            Arc::clone(&stop),
        );

        Self {
            next_id: AtomicU64::new(0),
            pending,
            writer,
            pool,
            invoke_timeout: config.invoke_timeout,
            connected,
            shutdown,
            stop,
            _reader_task: reader_task,
            _writer_task: writer_task,
        }
    }

    /// True until the transport closes or [`close`](Self::close) is called.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Pool backing this client's inbound frames.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Call `method` and decode the `result` field into `T`.
    ///
    /// Suspends until the matching response arrives, the configured
    /// timeout elapses, or the connection closes. A void success decodes
    /// into `T = ()`.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T> {
        let result = self.invoke_raw(method, params).await?;
        Ok(serde_json::from_value(result.unwrap_or(Value::Null))?)
    }

    /// Call `method`, ignoring any `result` payload.
    pub async fn invoke_unit(&self, method: &str, params: Vec<Value>) -> Result<()> {
        self.invoke_raw(method, params).await.map(|_| ())
    }

    async fn invoke_raw(&self, method: &str, params: Vec<Value>) -> Result<Option<Value>> {
        if method.trim().is_empty() {
            return Err(RpcError::Config("method name can not be empty".into()));
        }

        // Ids are never reused while the connection lives.
        let id = self.next_id.fetch_add(1, Ordering::AcqRel) + 1;
        let slot = self.pending.register(id)?;

        let request = Request::call(id, method, params);
        let line = JsonCodec::encode_line(&request)?;
        if let Err(e) = self.writer.send(OutboundLine::new(Bytes::from(line))).await {
            self.pending.remove(id);
            return Err(e);
        }

        // Race the completion slot against the timer. The loser's
        // resources are still released: on timeout the slot is removed
        // here, and the eventual late response finds no entry and drops
        // its buffer back into the pool.
        let frame = match tokio::time::timeout(self.invoke_timeout, slot).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_closed)) => return Err(RpcError::ConnectionClosed),
            Err(_elapsed) => {
                self.pending.remove(id);
                return Err(RpcError::Timeout);
            }
        };

        let response: Response = JsonCodec::decode(&frame)?;
        drop(frame);

        // Structurally impossible given table-keyed lookup, checked anyway.
        if response.id != id {
            return Err(RpcError::Correlation(format!(
                "request/response id mismatch: expected {id}, got {}",
                response.id
            )));
        }

        match response.into_outcome() {
            Outcome::Success(result) => Ok(result),
            Outcome::Failure(body) => Err(RpcError::Remote {
                code: body.code,
                message: body.message,
            }),
        }
    }

    /// Send a notification: fire-and-forget, no pending entry, returns as
    /// soon as the line is queued.
    pub async fn notify(&self, method: &str, params: Vec<Value>) -> Result<()> {
        if method.trim().is_empty() {
            return Err(RpcError::Config("method name can not be empty".into()));
        }
        let request = Request::notification(method, params);
        let line = JsonCodec::encode_line(&request)?;
        self.writer.send(OutboundLine::new(Bytes::from(line))).await
    }

    /// Suspend until the connection has closed.
    pub async fn closed(&self) {
        loop {
            let notified = self.shutdown.notified();
            if !self.is_connected() {
                return;
            }
            notified.await;
        }
    }

    /// Tear the session down and fail every pending call. Idempotent.
    ///
    /// The reader task is stopped through its stop signal and runs the
    /// same close path as a peer disconnect; pending calls are failed
    /// immediately here rather than waiting for the task to wind down.
    pub fn close(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.stop.notify_one();
            self.pending.fail_all();
            self.shutdown.notify_waiters();
            tracing::debug!("client closed");
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Frame sink completing pending slots from inbound response lines.
struct ClientSink {
    pending: Arc<PendingTable>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl FrameSink for ClientSink {
    fn on_frame(&self, frame: crate::pool::PooledBuf) -> Result<()> {
        if frame.is_empty() {
            tracing::trace!("ignoring empty frame");
            return Ok(());
        }

        let probe: ResponseId = JsonCodec::decode(&frame)?;
        match probe.id {
            Some(id) => {
                // An unmatched id is a normal race outcome (timed-out
                // call); complete() logs it and releases the buffer.
                self.pending.complete(id, frame);
            }
            None => {
                tracing::warn!("response with no id; dropping");
            }
        }
        Ok(())
    }

    fn on_close(&self) {
        self.connected.store(false, Ordering::Release);
        self.pending.fail_all();
        self.shutdown.notify_waiters();
    }
}
