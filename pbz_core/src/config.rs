use std::num::NonZeroUsize;
use std::thread;

use crate::error::{PipelineError, Result};

/// Default raw bytes per block: 1 MiB.
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Default number of blocks each buffer may hold.
pub const DEFAULT_CAPACITY: usize = 10;

/// Threads kept back from the worker pool for the read and write stages.
const RESERVED_THREADS: usize = 2;

/// Tunables fixed when a [`Pipeline`](crate::Pipeline) is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Nominal raw bytes per block. The last block of a file may be shorter.
    pub block_size: usize,
    /// Maximum number of blocks held by each of the two buffers.
    pub capacity: usize,
    /// Transform worker count; `None` sizes the pool from available parallelism.
    pub workers: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            capacity: DEFAULT_CAPACITY,
            workers: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Reject settings the pipeline or the container cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(PipelineError::Config("block size must be at least 1 byte".into()));
        }
        if i32::try_from(self.block_size).is_err() {
            return Err(PipelineError::Config(format!(
                "block size {} exceeds the 32-bit record limit",
                self.block_size
            )));
        }
        if self.capacity == 0 {
            return Err(PipelineError::Config("buffer capacity must be at least 1 block".into()));
        }
        if self.workers == Some(0) {
            return Err(PipelineError::Config("worker count must be at least 1".into()));
        }
        Ok(())
    }

    /// Number of transform workers to spawn.
    ///
    /// Without an explicit count, two hardware threads are left for the read
    /// and write stages, never dropping below one worker.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) => n.max(1),
            None => thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
                .saturating_sub(RESERVED_THREADS)
                .max(1),
        }
    }

    /// Number of blocks a raw input of `len` bytes splits into.
    pub fn block_count(&self, len: u64) -> u64 {
        len.div_ceil(self.block_size as u64)
    }
}
