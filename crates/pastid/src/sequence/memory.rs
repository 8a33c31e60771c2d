use crate::{Result, SequenceSource};
use async_trait::async_trait;
use core::sync::atomic::{AtomicU64, Ordering};

/// An in-process [`SequenceSource`] backed by a single atomic counter.
///
/// Values start at `1`. Nothing is persisted, so a restarted process starts
/// over; use it only where identifiers do not outlive the process.
#[derive(Debug, Default)]
pub struct MemorySequence {
    last: AtomicU64,
}

impl MemorySequence {
    pub const fn new() -> Self {
        Self::starting_after(0)
    }

    /// Creates a counter whose first issued value is `last + 1`.
    pub const fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }
}

#[async_trait]
impl SequenceSource for MemorySequence {
    async fn ensure_exists(&self) -> Result<()> {
        Ok(())
    }

    async fn allocate_batch(&self, n: usize) -> Result<Vec<u64>> {
        // A single fetch_add reserves the whole range, so batches from
        // concurrent callers never interleave.
        let start = self.last.fetch_add(n as u64, Ordering::Relaxed) + 1;
        Ok((start..start + n as u64).collect())
    }
}
