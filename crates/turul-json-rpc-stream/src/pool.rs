//! Reusable frame buffers.

use parking_lot::Mutex;

/// Default expected message size in bytes
pub const DEFAULT_REQUEST_SIZE: usize = 4 * 1024;

/// Idle buffers kept for reuse; extra released buffers are freed
pub const MAX_IDLE: usize = 32;

/// A released buffer larger than this many times the configured size is
/// shrunk back before it is kept
const MAX_GROWTH: usize = 4;

/// A pool of byte buffers sized around the expected message length.
///
/// The pool limits allocation churn only: it never bounds how many buffers
/// are out at once. What it keeps is bounded: at most [`MAX_IDLE`] idle
/// buffers, each shrunk back after an oversized frame.
#[derive(Debug)]
pub struct BufferPool {
    size: usize,
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            buffers: Mutex::new(Vec::new()),
        }
    }

    /// Configured buffer capacity
    pub fn size(&self) -> usize {
        self.size
    }

    /// An empty buffer with at least the configured capacity
    pub fn acquire(&self) -> Vec<u8> {
        match self.buffers.lock().pop() {
            Some(buf) => buf,
            None => Vec::with_capacity(self.size),
        }
    }

    /// Return a buffer for reuse
    pub fn release(&self, mut buf: Vec<u8>) {
        if self.idle() >= MAX_IDLE {
            return;
        }
        buf.clear();
        if buf.capacity() > self.size.saturating_mul(MAX_GROWTH) {
            buf.shrink_to(self.size);
        } else if buf.capacity() < self.size {
            buf.reserve(self.size);
        }

        let mut buffers = self.buffers.lock();
        if buffers.len() < MAX_IDLE {
            buffers.push(buf);
        }
    }

    /// Number of idle buffers
    pub fn idle(&self) -> usize {
        self.buffers.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_SIZE)
    }
}
