//! # linerpc
//!
//! Newline-delimited JSON-RPC 2.0 over any async byte stream.
//!
//! Every message is one JSON object on one line, terminated by `\n`.
//! The crate provides both sides of the wire:
//!
//! - **Server**: a [`DispatchTable`] of typed async handlers, an accept
//!   loop, and per-connection reader/writer tasks ([`RpcServer`]).
//! - **Client**: correlated request/response with per-call timeout, plus
//!   fire-and-forget notifications ([`RpcClient`]).
//!
//! Inbound lines are carried in pooled buffers ([`pool::BufferPool`])
//! that return to the pool when dropped, so a steady request load
//! allocates only on growth.
//!
//! ## Example
//!
//! ```ignore
//! use linerpc::{DispatchTable, RpcClient, RpcServer};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> linerpc::Result<()> {
//!     let mut table = DispatchTable::new();
//!     table.bind("add", |(a, b): (i64, i64)| async move { Ok(a + b) })?;
//!
//!     let server = RpcServer::new(table);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:9000").await?;
//!     tokio::spawn(async move { server.serve(listener).await });
//!
//!     let stream = tokio::net::TcpStream::connect("127.0.0.1:9000").await?;
//!     let client = RpcClient::connect(stream);
//!     let sum: i64 = client.invoke("add", vec![json!(2), json!(3)]).await?;
//!     assert_eq!(sum, 5);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod pending;
pub mod pool;
pub mod protocol;
pub mod reader;
pub mod writer;

mod client;
mod server;

pub use client::{ClientBuilder, ClientConfig, RpcClient, DEFAULT_INVOKE_TIMEOUT};
pub use connection::ServerConnection;
pub use dispatch::DispatchTable;
pub use error::{Result, RpcError};
pub use pool::{BufferPool, PoolConfig, PooledBuf};
pub use protocol::{ErrorBody, Outcome, Request, Response};
pub use server::{RpcServer, ServerConfig, ServerHook};
