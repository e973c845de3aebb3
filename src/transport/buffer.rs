//! Bounded receive buffer.
//!
//! Inbound bytes accumulate here until the frame decoder can extract complete
//! tags. Capacity is fixed at construction and never grows: when an
//! unterminated fragment fills the whole buffer, the buffer is cut back to the
//! next start-tag marker instead of being cleared outright.

use thiserror::Error;

/// Receive buffer errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Appending would exceed the configured capacity.
    #[error("receive buffer overflow: {requested} bytes requested, {available} available")]
    Overflow {
        /// Bytes the caller tried to append.
        requested: usize,
        /// Free space left in the buffer.
        available: usize,
    },
}

/// Result of cutting an overfull buffer back to a structural boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    /// Bytes before the next start-tag marker were dropped.
    Discarded(usize),
    /// No marker was found; the whole buffer was dropped. Anything that was
    /// being streamed at the time (such as a roster) must be requested again.
    Resynchronized(usize),
}

impl Truncation {
    /// Number of bytes dropped.
    pub fn dropped(self) -> usize {
        match self {
            Truncation::Discarded(n) | Truncation::Resynchronized(n) => n,
        }
    }

    /// Whether the stream lost its position entirely.
    pub fn is_resync(self) -> bool {
        matches!(self, Truncation::Resynchronized(_))
    }
}

/// Fixed-capacity byte accumulator for inbound protocol data.
#[derive(Debug)]
pub struct ReceiveBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl ReceiveBuffer {
    /// Create an empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append bytes at the write cursor.
    ///
    /// Nothing is appended when the bytes do not fit; the caller must drain
    /// through the decoder before retrying.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let available = self.available();
        if bytes.len() > available {
            return Err(BufferError::Overflow {
                requested: bytes.len(),
                available,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Append as much of `bytes` as fits and return how many were taken.
    pub fn fill(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.available());
        self.data.extend_from_slice(&bytes[..n]);
        n
    }

    /// Remove the first `n` bytes, keeping the remainder in order.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.data.len());
        self.data.drain(..n);
    }

    /// Cut the buffer back to the next start-tag marker after the first byte.
    ///
    /// Used when the buffer is full and the decoder still cannot find a
    /// complete tag at its front.
    pub fn truncate_to_boundary(&mut self) -> Truncation {
        let next = self
            .data
            .iter()
            .skip(1)
            .position(|&b| b == b'<')
            .map(|p| p + 1);

        match next {
            Some(at) => {
                self.data.drain(..at);
                Truncation::Discarded(at)
            }
            None => {
                let dropped = self.data.len();
                self.data.clear();
                Truncation::Resynchronized(dropped)
            }
        }
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Buffered bytes, oldest first.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether no more bytes can be appended.
    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free space left.
    pub fn available(&self) -> usize {
        self.capacity - self.data.len()
    }
}
