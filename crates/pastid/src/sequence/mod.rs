//! Durable, monotonic sequence sources.
//!
//! A [`SequenceSource`] hands out integers that are strictly greater than
//! every integer it handed out before, across concurrent callers and process
//! restarts. Atomicity and durability are the backing store's job; this
//! module only adapts it.
//!
//! - [`MemorySequence`] - process-local counter for tests and single-node
//!   runs.
//! - [`PgSequence`] - a PostgreSQL `SEQUENCE` (requires the `postgres`
//!   feature).

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::*;
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
#[cfg(feature = "postgres")]
pub use postgres::*;

use crate::Result;
use async_trait::async_trait;

/// A crash-safe counter that issues never-repeating integers in batches.
#[async_trait]
pub trait SequenceSource: Send + Sync {
    /// Creates the counter if it does not exist yet. Calling this on an
    /// existing counter is a no-op.
    async fn ensure_exists(&self) -> Result<()>;

    /// Returns `n` fresh values in ascending order.
    ///
    /// Either all `n` values are returned or an error is; there are no
    /// partial batches.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SourceUnavailable`] if the backing store is
    /// unreachable.
    async fn allocate_batch(&self, n: usize) -> Result<Vec<u64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_counter_issues_consecutive_batches() {
        let source = MemorySequence::new();
        source.ensure_exists().await.unwrap();

        let first = source.allocate_batch(1000).await.unwrap();
        let second = source.allocate_batch(1000).await.unwrap();

        assert_eq!(first, (1..=1000).collect::<Vec<_>>());
        assert_eq!(second, (1001..=2000).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn ensure_exists_is_idempotent() {
        let source = MemorySequence::new();
        source.ensure_exists().await.unwrap();
        let _ = source.allocate_batch(3).await.unwrap();
        source.ensure_exists().await.unwrap();

        assert_eq!(source.allocate_batch(1).await.unwrap(), vec![4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_batches_never_overlap() {
        let source = std::sync::Arc::new(MemorySequence::new());
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let source = source.clone();
                tokio::spawn(async move {
                    let mut all = Vec::new();
                    for _ in 0..50 {
                        all.extend(source.allocate_batch(7).await.unwrap());
                    }
                    all
                })
            })
            .collect();

        let mut values: Vec<u64> = futures::future::try_join_all(tasks)
            .await
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        values.sort_unstable();

        assert_eq!(values, (1..=16 * 50 * 7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let source = MemorySequence::new();
        assert!(source.allocate_batch(0).await.unwrap().is_empty());
        assert_eq!(source.allocate_batch(1).await.unwrap(), vec![1]);
    }
}
