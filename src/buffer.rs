use bytes::BytesMut;
use std::sync::Mutex;

/// A shared source of reusable byte buffers.
///
/// Connections draw their scratch buffers from a pool when one is supplied
/// and hand them back on close. Implementations may return a buffer of any
/// size; callers grow what they are given rather than assuming capacity.
pub trait BufferPool: Send + Sync {
    fn get(&self) -> BytesMut;
    fn put(&self, buf: BytesMut);
}

/// A mutex-guarded stack of buffers, bounded in slot count.
pub struct SharedBufferPool {
    slots: Mutex<Vec<BytesMut>>,
    buf_capacity: usize,
    max_slots: usize,
}

impl SharedBufferPool {
    pub fn new(buf_capacity: usize, max_slots: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::with_capacity(max_slots)),
            buf_capacity,
            max_slots,
        }
    }
}

impl BufferPool for SharedBufferPool {
    fn get(&self) -> BytesMut {
        let buf = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        buf.unwrap_or_else(|| BytesMut::with_capacity(self.buf_capacity))
    }

    fn put(&self, mut buf: BytesMut) {
        buf.clear();
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slots.len() < self.max_slots {
            slots.push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_reuses_buffers() {
        let pool = SharedBufferPool::new(1024, 2);
        let mut buf = pool.get();
        buf.extend_from_slice(b"scribble");
        pool.put(buf);

        let buf = pool.get();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 1024);
    }

    #[test]
    fn test_pool_bounds_slots() {
        let pool = SharedBufferPool::new(16, 1);
        pool.put(BytesMut::with_capacity(16));
        pool.put(BytesMut::with_capacity(16));
        let _ = pool.get();
        // Second get allocates fresh, the pool held only one slot.
        let buf = pool.get();
        assert_eq!(buf.capacity(), 16);
    }

    #[test]
    fn test_undersized_buffers_are_tolerated() {
        let pool = SharedBufferPool::new(8, 4);
        pool.put(BytesMut::new());
        let mut buf = pool.get();
        buf.extend_from_slice(&[0u8; 64]);
        assert_eq!(buf.len(), 64);
    }
}
