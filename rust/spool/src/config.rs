use shm_primitives::SEM_VALUE_MAX;
use spool_wire::MAX_FRAME_LEN;

use crate::error::QueueError;

/// Default transport chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Configuration for creating a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of items admitted but not yet delivered, across every
    /// process sharing the queue. Zero or negative means unbounded (the
    /// largest value the capacity semaphore can hold).
    pub capacity: i64,
    /// Largest frame written to the channel. Only affects write granularity;
    /// readers reject frames above it.
    pub chunk_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl QueueConfig {
    pub fn with_capacity(mut self, capacity: i64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Capacity as programmed into the capacity semaphore.
    pub fn effective_capacity(&self) -> Result<u32, QueueError> {
        if self.capacity <= 0 {
            return Ok(SEM_VALUE_MAX);
        }
        u32::try_from(self.capacity)
            .ok()
            .filter(|&capacity| capacity <= SEM_VALUE_MAX)
            .ok_or_else(|| {
                QueueError::Config(format!(
                    "capacity {} exceeds the maximum of {}",
                    self.capacity, SEM_VALUE_MAX
                ))
            })
    }

    /// Check every field.
    pub fn validate(&self) -> Result<(), QueueError> {
        self.effective_capacity()?;
        if self.chunk_size == 0 || self.chunk_size > MAX_FRAME_LEN {
            return Err(QueueError::Config(format!(
                "chunk size {} must be in 1..={}",
                self.chunk_size, MAX_FRAME_LEN
            )));
        }
        Ok(())
    }
}
