//! JSON-RPC server: accept loop, connection registry, dispatch wiring.
//!
//! Each attached connection gets its own reader task and writer task. The
//! reader's frame callback decodes the request envelope, returns the frame
//! buffer to the pool, and hands dispatch to a spawned task so a slow
//! handler never blocks framing of subsequent lines. Responses are written
//! in whatever order their handlers complete.
//!
//! # Example
//!
//! ```ignore
//! use linerpc::{DispatchTable, RpcServer};
//!
//! let mut table = DispatchTable::new();
//! table.bind("add", |(a, b): (i64, i64)| async move { Ok(a + b) })?;
//!
//! let server = RpcServer::new(table);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9000").await?;
//! server.serve(listener).await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::codec::JsonCodec;
use crate::connection::ServerConnection;
use crate::dispatch::DispatchTable;
use crate::error::Result;
use crate::pool::{BufferPool, PoolConfig};
use crate::protocol::Request;
use crate::reader::{spawn_line_reader, FrameSink, ReaderConfig};
use crate::writer::{spawn_writer_task, WriterConfig};

/// Observer of per-connection events, injected at construction.
///
/// `on_disconnect` is invoked exactly once per connection, after the
/// connection has left the registry.
pub trait ServerHook: Send + Sync + 'static {
    /// Called for every inbound frame, before it is decoded.
    fn on_message(&self, _client: &ServerConnection, _frame: &[u8]) {}

    /// Called once when a connection terminates.
    fn on_disconnect(&self, _client: &ServerConnection) {}
}

struct NoopHook;

impl ServerHook for NoopHook {}

/// Server tuning knobs.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub reader: ReaderConfig,
    pub writer: WriterConfig,
    pub pool: PoolConfig,
}

type Registry = Arc<Mutex<HashMap<u64, Arc<ServerConnection>>>>;

/// A JSON-RPC server over newline-delimited streams.
pub struct RpcServer {
    dispatch: Arc<DispatchTable>,
    connections: Registry,
    next_connection_id: AtomicU64,
    pool: BufferPool,
    hook: Arc<dyn ServerHook>,
    config: ServerConfig,
}

impl RpcServer {
    /// Create a server around a frozen dispatch table.
    pub fn new(dispatch: DispatchTable) -> Self {
        Self::with_config(dispatch, ServerConfig::default())
    }

    /// Create a server with custom tuning knobs.
    pub fn with_config(dispatch: DispatchTable, config: ServerConfig) -> Self {
        Self {
            dispatch: Arc::new(dispatch),
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_connection_id: AtomicU64::new(0),
            pool: BufferPool::new(config.pool.clone()),
            hook: Arc::new(NoopHook),
            config,
        }
    }

    /// Install an event hook. Replaces any previous hook.
    pub fn with_hook(mut self, hook: impl ServerHook) -> Self {
        self.hook = Arc::new(hook);
        self
    }

    /// Currently attached connections.
    pub fn connections(&self) -> Vec<Arc<ServerConnection>> {
        self.connections
            .lock()
            .expect("registry mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .expect("registry mutex poisoned")
            .len()
    }

    /// Pool backing this server's inbound frames.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Attach one duplex stream as a client connection.
    ///
    /// Assigns the next connection id, registers the connection, and
    /// spawns its reader and writer tasks. Used directly for in-memory or
    /// non-TCP transports; [`serve`](Self::serve) calls it per accept.
    pub fn attach<IO>(&self, io: IO, address: impl Into<String>) -> Arc<ServerConnection>
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let id = self.next_connection_id.fetch_add(1, Ordering::AcqRel) + 1;

        let (writer, _writer_task) = spawn_writer_task(write_half, self.config.writer.clone());
        let stop = Arc::new(Notify::new());
        let connection = Arc::new(ServerConnection::new(
            id,
            address.into(),
            writer,
            Arc::clone(&stop),
        ));

        self.connections
            .lock()
            .expect("registry mutex poisoned")
            .insert(id, Arc::clone(&connection));
        tracing::debug!(id, "client attached");

        let sink = Arc::new(ConnectionSink {
            connection: Arc::clone(&connection),
            dispatch: Arc::clone(&self.dispatch),
            connections: Arc::clone(&self.connections),
            hook: Arc::clone(&self.hook),
        });
        spawn_line_reader(
            read_half,
            self.pool.clone(),
            sink,
            self.config.reader.clone(),
            stop,
        );

        connection
    }

    /// Disconnect every attached client.
    ///
    /// Each connection's read loop is woken and runs the normal close
    /// path, so registry removal and disconnect hooks fire exactly as for
    /// a peer-initiated close. Idempotent; new connections may still be
    /// attached afterwards.
    pub fn shutdown(&self) {
        let connections = self.connections();
        if !connections.is_empty() {
            tracing::debug!(count = connections.len(), "shutting down connections");
        }
        for connection in connections {
            connection.kill();
        }
    }

    /// Accept loop: attach every incoming TCP connection until the
    /// listener fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            self.attach(stream, addr.to_string());
        }
    }
}

/// Frame sink wiring one connection's read loop to the dispatch table.
struct ConnectionSink {
    connection: Arc<ServerConnection>,
    dispatch: Arc<DispatchTable>,
    connections: Registry,
    hook: Arc<dyn ServerHook>,
}

impl FrameSink for ConnectionSink {
    fn on_frame(&self, frame: crate::pool::PooledBuf) -> Result<()> {
        self.hook.on_message(&self.connection, &frame);

        // Empty lines are valid frames; there is nothing to dispatch.
        if frame.is_empty() {
            tracing::trace!(id = self.connection.id(), "ignoring empty frame");
            return Ok(());
        }

        // Decode failures surface here: logged by the reader, the loop
        // continues, and no response can be sent (no id was recoverable).
        let mut request: Request = JsonCodec::decode(&frame)?;
        drop(frame); // Back to the pool before the handler runs.

        let args = request.take_params();
        let dispatch = Arc::clone(&self.dispatch);
        let connection = Arc::clone(&self.connection);
        tokio::spawn(async move {
            if let Some(response) = dispatch.dispatch(request.id, &request.method, args).await {
                if let Err(e) = connection.write_json(&response).await {
                    tracing::debug!(id = connection.id(), "failed to write response: {e}");
                }
            }
        });
        Ok(())
    }

    fn on_close(&self) {
        self.connection.kill();
        let removed = self
            .connections
            .lock()
            .expect("registry mutex poisoned")
            .remove(&self.connection.id());
        debug_assert!(removed.is_some(), "connection missing from registry");
        tracing::debug!(id = self.connection.id(), "client removed");
        self.hook.on_disconnect(&self.connection);
    }
}
