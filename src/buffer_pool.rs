use std::ops::{Deref, DerefMut};
use tokio::sync::Mutex;

const MAX_POOL_SIZE: usize = 256;

/// Size of each relay copy buffer
pub const BUFFER_SIZE: usize = 16_384;

/// Pool of relay copy buffers backed by an async-aware mutex
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Create a new buffer pool
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(MAX_POOL_SIZE)),
        }
    }

    /// Get a buffer from the pool or create a new one
    pub async fn get_buffer(&self) -> Vec<u8> {
        match self.buffers.lock().await.pop() {
            Some(buffer) => buffer,
            None => vec![0u8; BUFFER_SIZE],
        }
    }

    /// Return a buffer to the pool for reuse.
    ///
    /// Never waits: if the pool is busy or full the buffer is dropped.
    pub fn return_buffer(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() < BUFFER_SIZE || buffer.capacity() > BUFFER_SIZE * 2 {
            return;
        }

        // Zero the buffer on return to avoid leaking data between sessions
        buffer.clear();
        buffer.resize(BUFFER_SIZE, 0);

        if let Ok(mut pool) = self.buffers.try_lock() {
            if pool.len() < MAX_POOL_SIZE {
                pool.push(buffer);
            }
        }
    }

    /// Number of idle buffers held by the pool
    #[cfg(test)]
    pub async fn available(&self) -> usize {
        self.buffers.lock().await.len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Global buffer pool instance
static BUFFER_POOL: std::sync::OnceLock<BufferPool> = std::sync::OnceLock::new();

/// Get or initialize the global buffer pool
pub fn get_buffer_pool() -> &'static BufferPool {
    BUFFER_POOL.get_or_init(BufferPool::new)
}

/// RAII lease that returns the buffer to its pool on drop
#[derive(Debug)]
pub struct BufferLease {
    buffer: Vec<u8>,
    pool: &'static BufferPool,
}

impl BufferLease {
    /// Lease a buffer from the global pool
    pub async fn new() -> Self {
        Self::from_pool(get_buffer_pool()).await
    }

    pub async fn from_pool(pool: &'static BufferPool) -> Self {
        Self {
            buffer: pool.get_buffer().await,
            pool,
        }
    }
}

impl Deref for BufferLease {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buffer
    }
}

impl DerefMut for BufferLease {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.pool.return_buffer(std::mem::take(&mut self.buffer));
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool").finish_non_exhaustive()
    }
}
