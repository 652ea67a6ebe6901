//! Zero-copy buffer pool for recycling the `BytesMut` used to frame one
//! event-log record per write (§4.6).
//!
//! Event admission allocates and frees a framing buffer on every commit.
//! This pool recycles `BytesMut` instances across commits instead, backed by
//! `crossbeam_queue::ArrayQueue` for lock-free, bounded pooling. When the
//! pool is empty, `get()` allocates a fresh buffer; when it's full, `put()`
//! drops the buffer instead of returning it.

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;

/// A lock-free pool of `BytesMut` buffers for reuse across event commits.
pub struct BytesMutPool {
    pool: ArrayQueue<BytesMut>,
    default_capacity: usize,
}

impl BytesMutPool {
    /// # Panics
    /// Panics if `pool_size` or `default_capacity` is 0.
    pub fn new(pool_size: usize, default_capacity: usize) -> Self {
        assert!(pool_size > 0, "pool_size must be positive");
        assert!(default_capacity > 0, "default_capacity must be positive");
        Self { pool: ArrayQueue::new(pool_size), default_capacity }
    }

    /// Pops a recycled buffer, or allocates a fresh one at `default_capacity`.
    pub fn get(&self) -> BytesMut {
        self.pool.pop().unwrap_or_else(|| BytesMut::with_capacity(self.default_capacity))
    }

    /// Clears `buf` and returns it to the pool. Dropped instead if the pool
    /// is already full.
    pub fn put(&self, mut buf: BytesMut) {
        buf.clear();
        let _ = self.pool.push(buf);
    }

    pub fn available(&self) -> usize {
        self.pool.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycled_buffer_is_cleared_but_keeps_capacity() {
        let pool = BytesMutPool::new(4, 256);
        let mut buf = pool.get();
        buf.extend_from_slice(b"hello world");
        let capacity = buf.capacity();
        pool.put(buf);

        assert_eq!(pool.available(), 1);
        let recycled = pool.get();
        assert!(recycled.is_empty());
        assert_eq!(recycled.capacity(), capacity);
    }

    #[test]
    fn exhausted_pool_allocates_fresh() {
        let pool = BytesMutPool::new(1, 128);
        let a = pool.get();
        let b = pool.get();
        assert!(a.capacity() >= 128);
        assert!(b.capacity() >= 128);
    }

    #[test]
    fn excess_puts_are_dropped_at_capacity() {
        let pool = BytesMutPool::new(1, 64);
        pool.put(BytesMut::with_capacity(64));
        pool.put(BytesMut::with_capacity(64));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    #[should_panic(expected = "pool_size must be positive")]
    fn zero_pool_size_panics() {
        let _pool = BytesMutPool::new(0, 128);
    }
}
