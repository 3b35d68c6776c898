//! Reusable buffer pool for the transport send path
//!
//! A mutex-protected stack of `Vec<u8>` buffers. Borrowers take a buffer,
//! fill it, and hand it back once the send (or decode) completed. The pool
//! never holds more than its configured capacity; releases beyond that drop
//! the buffer. All operations are O(1).

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Default number of pooled buffers
pub const DEFAULT_POOL_CAPACITY: usize = 1000;

/// Pool hit/miss statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    /// Acquisitions served from the pool
    pub hits: u64,
    /// Acquisitions that had to allocate
    pub misses: u64,
    /// Buffers currently held by the pool
    pub pooled: usize,
}

/// Mutex-protected stack of reusable byte buffers
#[derive(Debug)]
pub struct MemoryPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    capacity: Mutex<usize>,
    enabled: Mutex<bool>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl MemoryPool {
    /// Create an enabled pool with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            capacity: Mutex::new(capacity),
            enabled: Mutex::new(true),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Enable or disable buffer reuse
    ///
    /// Disabling drops the held buffers; acquire/release keep working but
    /// always allocate/free.
    pub fn set_enabled(&self, enabled: bool) {
        *self.enabled.lock() = enabled;
        if !enabled {
            self.buffers.lock().clear();
        }
    }

    /// Set the maximum number of buffers kept for reuse
    pub fn set_capacity(&self, capacity: usize) {
        *self.capacity.lock() = capacity;
        let mut buffers = self.buffers.lock();
        if buffers.len() > capacity {
            buffers.truncate(capacity);
        }
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        *self.capacity.lock()
    }

    /// Buffers currently held
    pub fn pooled_count(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Take a buffer, reusing a pooled one when available
    pub fn acquire(&self) -> Vec<u8> {
        if *self.enabled.lock() {
            if let Some(buf) = self.buffers.lock().pop() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return buf;
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Vec::new()
    }

    /// Return a buffer after use
    ///
    /// The buffer is cleared (capacity retained) and kept iff the pool is
    /// enabled and below capacity.
    pub fn release(&self, mut buf: Vec<u8>) {
        if !*self.enabled.lock() {
            return;
        }
        let capacity = *self.capacity.lock();
        let mut buffers = self.buffers.lock();
        if buffers.len() < capacity {
            buf.clear();
            buffers.push(buf);
        }
    }

    /// Hit/miss counters and current fill
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            pooled: self.buffers.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_reuses_buffers() {
        let pool = MemoryPool::new(10);

        let mut buf = pool.acquire();
        buf.extend_from_slice(&[1, 2, 3]);
        let ptr = buf.as_ptr();
        pool.release(buf);
        assert_eq!(pool.pooled_count(), 1);

        let buf = pool.acquire();
        // Same allocation comes back, cleared
        assert_eq!(buf.as_ptr(), ptr);
        assert!(buf.is_empty());

        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn pool_never_exceeds_capacity() {
        let pool = MemoryPool::new(2);

        for _ in 0..5 {
            pool.release(Vec::with_capacity(64));
        }
        assert_eq!(pool.pooled_count(), 2);
    }

    #[test]
    fn shrinking_capacity_drops_buffers() {
        let pool = MemoryPool::new(4);
        for _ in 0..4 {
            pool.release(Vec::new());
        }
        pool.set_capacity(1);
        assert_eq!(pool.pooled_count(), 1);
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn disabled_pool_always_allocates() {
        let pool = MemoryPool::new(10);
        pool.release(Vec::new());
        assert_eq!(pool.pooled_count(), 1);

        pool.set_enabled(false);
        assert_eq!(pool.pooled_count(), 0);

        let _ = pool.acquire();
        pool.release(Vec::new());
        assert_eq!(pool.pooled_count(), 0);
        assert_eq!(pool.stats().misses, 1);
    }
}
