//! Buffer allocation behind a trait, so callers can observe and inject
//! allocation failure.
//!
//! Inbound reassembly must keep working when a buffer cannot be obtained
//! (it drains and drops the packet instead of wedging the byte stream), so
//! unlike a plain pool the allocator is fallible.

/// Source of byte buffers for whole HCI packets.
///
/// Buffers are single-owner; whoever holds one last hands it back through
/// [`BufferAllocator::release`] so it can be recycled.
pub trait BufferAllocator: Send {
    /// Allocates a zero-filled buffer of exactly `size` bytes, or `None`
    /// under allocation pressure.
    fn allocate(&mut self, size: usize) -> Option<Vec<u8>>;

    /// Returns a buffer for reuse.
    fn release(&mut self, buffer: Vec<u8>);
}

/// A simple buffer allocator that reuses buffers.
pub struct PooledAllocator {
    /// Pool of reusable buffers
    pool: Vec<Vec<u8>>,
    /// Capacity to reserve when a fresh buffer is created
    buffer_size: usize,
    /// Maximum pool size
    max_pool_size: usize,
}

impl PooledAllocator {
    /// Creates a new pooled allocator.
    pub fn new(buffer_size: usize, max_pool_size: usize) -> Self {
        Self { pool: Vec::with_capacity(max_pool_size), buffer_size, max_pool_size }
    }

    /// Returns the number of buffers currently in the pool.
    pub fn available(&self) -> usize {
        self.pool.len()
    }
}

impl BufferAllocator for PooledAllocator {
    fn allocate(&mut self, size: usize) -> Option<Vec<u8>> {
        let mut buffer = self
            .pool
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_size.max(size)));
        buffer.resize(size, 0);
        Some(buffer)
    }

    fn release(&mut self, mut buffer: Vec<u8>) {
        if self.pool.len() < self.max_pool_size {
            buffer.clear();
            self.pool.push(buffer);
        }
    }
}

impl Default for PooledAllocator {
    fn default() -> Self {
        Self::new(1024, 64)
    }
}
