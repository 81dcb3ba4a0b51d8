//! Client-side pending request table.
//!
//! Maps an outstanding request id to a single-fulfillment slot. The reader
//! task completes slots as responses arrive; caller tasks remove slots on
//! timeout; connection close fails every remaining slot at once. Each
//! operation is an atomic insert/remove under one coarse mutex; the table
//! is per-connection, so unrelated connections never contend.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::{Result, RpcError};
use crate::pool::PooledBuf;

/// Single-fulfillment completion slots keyed by request id.
///
/// `None` means the connection has closed and no further registrations are
/// accepted.
pub struct PendingTable {
    slots: Mutex<Option<HashMap<u64, oneshot::Sender<PooledBuf>>>>,
}

impl PendingTable {
    /// Create an open table.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Some(HashMap::new())),
        }
    }

    /// Register a slot for `id` and return the receiving end.
    ///
    /// Fails with `ConnectionClosed` once [`fail_all`](Self::fail_all) has
    /// run. Ids are unique per connection, so an existing entry is a caller
    /// defect; the old slot is dropped (its waiter observes closure).
    pub fn register(&self, id: u64) -> Result<oneshot::Receiver<PooledBuf>> {
        let mut guard = self.slots.lock().expect("pending mutex poisoned");
        let slots = guard.as_mut().ok_or(RpcError::ConnectionClosed)?;
        let (tx, rx) = oneshot::channel();
        if slots.insert(id, tx).is_some() {
            tracing::warn!(id, "pending slot overwritten; duplicate request id");
        }
        Ok(rx)
    }

    /// Complete the slot for `id` with the matched response frame.
    ///
    /// Returns false when no slot matches (timed out or never issued); the
    /// frame is dropped and its buffer returns to the pool. This is a normal
    /// occurrence, not a protocol violation.
    pub fn complete(&self, id: u64, frame: PooledBuf) -> bool {
        let sender = {
            let mut guard = self.slots.lock().expect("pending mutex poisoned");
            guard.as_mut().and_then(|slots| slots.remove(&id))
        };
        match sender {
            // send() fails only if the waiter raced away after we removed
            // the slot; the frame is dropped either way.
            Some(tx) => tx.send(frame).is_ok(),
            None => {
                tracing::trace!(id, "dropping response with no pending slot");
                false
            }
        }
    }

    /// Remove the slot for `id` without completing it (timeout path).
    pub fn remove(&self, id: u64) -> bool {
        let mut guard = self.slots.lock().expect("pending mutex poisoned");
        guard
            .as_mut()
            .map(|slots| slots.remove(&id).is_some())
            .unwrap_or(false)
    }

    /// Close the table and fail every outstanding slot.
    ///
    /// Dropping the senders wakes every waiter with a closed-channel error,
    /// which the client surfaces as `ConnectionClosed`. Idempotent.
    pub fn fail_all(&self) {
        let taken = self.slots.lock().expect("pending mutex poisoned").take();
        if let Some(slots) = taken {
            if !slots.is_empty() {
                tracing::debug!(count = slots.len(), "failing pending requests on close");
            }
        }
    }

    /// Number of outstanding slots.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .expect("pending mutex poisoned")
            .as_ref()
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// True if no calls are outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}
