//! Buffer pool with single-release rented buffers.
//!
//! Frames extracted by the line reader are handed to callbacks as
//! [`PooledBuf`] handles. A handle owns its byte region exclusively and
//! returns the storage to the pool exactly once, when dropped. Ownership
//! typing makes use-after-release and double-release unrepresentable:
//! there is no `release()` to forget and no way to read a returned buffer.
//!
//! # Example
//!
//! ```
//! use linerpc::pool::BufferPool;
//!
//! let pool = BufferPool::default();
//! let buf = pool.rent_copy(b"hello");
//! assert_eq!(&buf[..], b"hello");
//! assert_eq!(pool.outstanding(), 1);
//! drop(buf);
//! assert_eq!(pool.outstanding(), 0);
//! ```

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;

/// Default capacity of a freshly allocated pool buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4 * 1024;

/// Default maximum number of idle buffers retained for reuse.
pub const DEFAULT_MAX_FREE: usize = 64;

/// Configuration for a [`BufferPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum capacity of newly allocated buffers.
    pub buffer_capacity: usize,
    /// Idle buffers beyond this count are released to the allocator.
    pub max_free: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_free: DEFAULT_MAX_FREE,
        }
    }
}

struct PoolInner {
    free: Mutex<Vec<BytesMut>>,
    outstanding: AtomicUsize,
    config: PoolConfig,
}

/// A shared pool of reusable byte buffers.
///
/// Cloning is cheap; all clones share the same free list. Safe for
/// concurrent rent/return across all connection tasks. `rent` never
/// blocks on pool exhaustion, it allocates instead.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool with the given configuration.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::new()),
                outstanding: AtomicUsize::new(0),
                config,
            }),
        }
    }

    /// Rent an empty buffer with capacity at least `min_capacity`.
    pub fn rent(&self, min_capacity: usize) -> PooledBuf {
        let storage = self.take_free(min_capacity).unwrap_or_else(|| {
            BytesMut::with_capacity(min_capacity.max(self.inner.config.buffer_capacity))
        });
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        PooledBuf {
            storage: Some(storage),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Rent a buffer pre-filled with a copy of `data`.
    pub fn rent_copy(&self, data: &[u8]) -> PooledBuf {
        let mut buf = self.rent(data.len());
        buf.put(data);
        buf
    }

    /// Number of rented buffers not yet returned.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Number of idle buffers held for reuse.
    pub fn free_count(&self) -> usize {
        self.inner.free.lock().expect("pool mutex poisoned").len()
    }

    fn take_free(&self, min_capacity: usize) -> Option<BytesMut> {
        let mut free = self.inner.free.lock().expect("pool mutex poisoned");
        // Scan from the back so the common same-size case pops in O(1).
        let idx = free.iter().rposition(|b| b.capacity() >= min_capacity)?;
        Some(free.swap_remove(idx))
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl PoolInner {
    fn put_back(&self, mut storage: BytesMut) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        storage.clear();
        let mut free = self.free.lock().expect("pool mutex poisoned");
        if free.len() < self.config.max_free {
            free.push(storage);
        }
        // Otherwise the buffer is dropped and its memory freed.
    }
}

/// A rented byte buffer.
///
/// Exposes a read-only view of the bytes written so far and returns its
/// storage to the pool when dropped. Move-only; never shared.
pub struct PooledBuf {
    storage: Option<BytesMut>,
    pool: Arc<PoolInner>,
}

impl PooledBuf {
    /// Append bytes to the buffer.
    pub fn put(&mut self, data: &[u8]) {
        self.storage
            .as_mut()
            .expect("storage present until drop")
            .extend_from_slice(data);
    }

    /// The filled region of the buffer.
    pub fn as_slice(&self) -> &[u8] {
        self.storage.as_ref().expect("storage present until drop")
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// True if no bytes have been written.
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.take() {
            self.pool.put_back(storage);
        }
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.len())
            .finish()
    }
}
