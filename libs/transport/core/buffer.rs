//! Growable byte buffer
//!
//! Accumulates response bodies and WebSocket message fragments. Capacity
//! starts at [`DEFAULT_CAPACITY`] and doubles until the incoming chunk fits,
//! and clearing keeps the allocation for the next message.

use thiserror::Error;

/// Capacity allocated on the first append
pub const DEFAULT_CAPACITY: usize = 16384;

/// Buffer growth could not be satisfied
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Failed to grow buffer to {requested} bytes")]
pub struct AllocationFailure {
    pub requested: usize,
}

#[derive(Debug, Default)]
pub struct GrowableBuffer {
    data: Vec<u8>,
}

impl GrowableBuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Append a chunk, growing capacity by doubling when needed
    ///
    /// On failure the existing content is left untouched.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), AllocationFailure> {
        let required = self
            .data
            .len()
            .checked_add(chunk.len())
            .ok_or(AllocationFailure {
                requested: usize::MAX,
            })?;

        if required > self.data.capacity() {
            let mut target = self.data.capacity().max(DEFAULT_CAPACITY);
            while target < required {
                target = target.checked_mul(2).ok_or(AllocationFailure {
                    requested: usize::MAX,
                })?;
            }
            self.data
                .try_reserve_exact(target - self.data.len())
                .map_err(|_| AllocationFailure { requested: target })?;
        }

        self.data.extend_from_slice(chunk);
        Ok(())
    }

    /// Drop the content, keep the allocation
    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }
}
