//! # Buffer Pool
//!
//! Pool of fixed-capacity [`BitBuffer`]s for the receive paths, which would
//! otherwise allocate one buffer per inbound packet.
//!
//! ## Usage
//! ```rust
//! use double_socket::utils::buffer_pool::BitBufferPool;
//!
//! let pool = BitBufferPool::new(20, 1536);
//! let mut buffer = pool.acquire();
//! buffer.write_u32(7);
//! drop(buffer); // reset and returned to the pool
//! assert_eq!(pool.available(), 1);
//! ```

use crate::core::bit_buffer::BitBuffer;
use std::sync::{Arc, Mutex};

/// A pooled buffer that returns itself to the pool when dropped
pub struct PooledBitBuffer {
    buffer: BitBuffer,
    pool: Arc<Mutex<Vec<BitBuffer>>>,
    max_pooled: usize,
}

impl PooledBitBuffer {
    /// Take the buffer out of the pool for good
    pub fn into_inner(mut self) -> BitBuffer {
        std::mem::take(&mut self.buffer)
    }
}

impl Drop for PooledBitBuffer {
    fn drop(&mut self) {
        if self.buffer.capacity() == 0 {
            return;
        }
        if let Ok(mut pool) = self.pool.lock() {
            if pool.len() < self.max_pooled {
                let mut buffer = std::mem::take(&mut self.buffer);
                buffer.reset();
                pool.push(buffer);
            }
        }
    }
}

impl std::ops::Deref for PooledBitBuffer {
    type Target = BitBuffer;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl std::ops::DerefMut for PooledBitBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl std::fmt::Debug for PooledBitBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBitBuffer")
            .field("size", &self.buffer.size())
            .finish()
    }
}

/// Thread-safe pool of equally sized bit buffers
#[derive(Clone)]
pub struct BitBufferPool {
    pool: Arc<Mutex<Vec<BitBuffer>>>,
    max_pooled: usize,
    buffer_size: usize,
}

impl BitBufferPool {
    /// Create an empty pool retaining at most `max_pooled` buffers of `buffer_size` bytes
    pub fn new(max_pooled: usize, buffer_size: usize) -> Self {
        Self {
            pool: Arc::new(Mutex::new(Vec::with_capacity(max_pooled))),
            max_pooled,
            buffer_size,
        }
    }

    /// Acquire a reset buffer from the pool, allocating when it is empty
    pub fn acquire(&self) -> PooledBitBuffer {
        let buffer = self
            .pool
            .lock()
            .ok()
            .and_then(|mut pool| pool.pop())
            .unwrap_or_else(|| BitBuffer::with_capacity(self.buffer_size));

        PooledBitBuffer {
            buffer,
            pool: self.pool.clone(),
            max_pooled: self.max_pooled,
        }
    }

    /// Number of buffers waiting in the pool
    pub fn available(&self) -> usize {
        self.pool.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Capacity of every buffer this pool hands out
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}
