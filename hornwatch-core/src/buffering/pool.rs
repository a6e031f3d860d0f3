//! Spare sample buffers handed back from the pipeline to the capture callback.
//!
//! Every completed chunk moves its `Vec<f32>` into the queue, so the callback
//! needs a fresh buffer for the next one. The pipeline returns each buffer
//! once it has been analysed and the callback takes it from here, so steady
//! state capture does not touch the allocator.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crossbeam_channel::{bounded, Receiver, Sender};

/// Spare buffers kept beyond those in flight.
pub const DEFAULT_SPARE_BUFFERS: usize = 4;

/// Bounded free list of sample buffers. Cloning shares the same list.
#[derive(Clone)]
pub struct BufferPool {
    tx: Sender<Vec<f32>>,
    rx: Receiver<Vec<f32>>,
    /// Largest length ever asked of [`BufferPool::take`].
    wanted: Arc<AtomicUsize>,
}

impl BufferPool {
    pub fn new(spares: usize) -> Self {
        let (tx, rx) = bounded(spares.max(1));
        Self {
            tx,
            rx,
            wanted: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pre-allocate buffers of `len` samples until the pool is full.
    ///
    /// Call this outside the audio callback, once the chunk size is known.
    pub fn fill(&self, len: usize) {
        self.wanted.fetch_max(len, Ordering::Relaxed);
        while self.tx.try_send(Vec::with_capacity(len)).is_ok() {}
    }

    /// An empty buffer with room for `len` samples.
    ///
    /// Allocates only when no spare of sufficient capacity is available.
    pub fn take(&self, len: usize) -> Vec<f32> {
        self.wanted.fetch_max(len, Ordering::Relaxed);
        match self.rx.try_recv() {
            Ok(buf) if buf.capacity() >= len => buf,
            _ => Vec::with_capacity(len),
        }
    }

    /// Return a buffer for reuse.
    ///
    /// Buffers too small for the chunks being assembled are dropped here, on
    /// the caller's thread, as are buffers that arrive while the pool is full.
    pub fn recycle(&self, mut buf: Vec<f32>) {
        if buf.capacity() < self.wanted.load(Ordering::Relaxed) {
            return;
        }
        buf.clear();
        let _ = self.tx.try_send(buf);
    }

    /// Spare buffers currently available.
    pub fn available(&self) -> usize {
        self.rx.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_SPARE_BUFFERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycled_buffer_is_reused() {
        let pool = BufferPool::new(2);
        let mut buf = pool.take(16);
        buf.extend_from_slice(&[0.5; 16]);
        let ptr = buf.as_ptr();
        pool.recycle(buf);
        assert_eq!(pool.available(), 1);

        let again = pool.take(16);
        assert_eq!(again.as_ptr(), ptr);
        assert!(again.is_empty());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn fill_stops_at_capacity() {
        let pool = BufferPool::new(3);
        pool.fill(8);
        assert_eq!(pool.available(), 3);
        assert!(pool.take(8).capacity() >= 8);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn undersized_buffers_are_not_kept() {
        let pool = BufferPool::new(2);
        let _ = pool.take(100);
        pool.recycle(Vec::with_capacity(10));
        assert_eq!(pool.available(), 0);
        pool.recycle(Vec::with_capacity(100));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn overflowing_pool_drops_extra_buffers() {
        let pool = BufferPool::new(1);
        pool.recycle(Vec::with_capacity(4));
        pool.recycle(Vec::with_capacity(4));
        assert_eq!(pool.available(), 1);
    }
}
