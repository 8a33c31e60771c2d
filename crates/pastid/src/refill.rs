//! Batch refills of the identifier pool.
//!
//! One refill cycle walks the following states:
//!
//! ```text
//! Idle -> LockAttempted -> LockHeld -> Refilling -> Released
//!                       \-> LockDenied -> Idle
//! ```
//!
//! The [`RefillLock`] is the only cross-process serialization point; it is
//! held for the duration of one batch fetch and push. Holders that crash are
//! superseded once the lock expires.

use crate::{
    Identifier, IdentifierPool, LockHolder, RefillLock, Result, RetryPolicy, SequenceSource,
};
use core::time::Duration;
use std::sync::Arc;

/// Thresholds and timing for refill cycles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefillConfig {
    /// Low-water mark: a cycle starts when the pool holds fewer identifiers.
    pub low_water: usize,
    /// High-water mark and batch size: a cycle that finds at least this many
    /// identifiers after taking the lock does nothing.
    pub batch_size: usize,
    /// Expiry of the refill lock.
    pub lock_timeout: Duration,
}

impl Default for RefillConfig {
    fn default() -> Self {
        Self {
            low_water: 100,
            batch_size: 1000,
            lock_timeout: Duration::from_millis(10_000),
        }
    }
}

/// How a refill cycle ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefillOutcome {
    /// The pool was above the low-water mark; the lock was not touched.
    NotNeeded,
    /// Another holder owns the lock. Not an error.
    LockDenied,
    /// The lock was taken but another holder had already refilled.
    AlreadyFilled,
    /// `count` identifiers were added to the pool.
    Refilled { count: usize },
}

impl RefillOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotNeeded => "not_needed",
            Self::LockDenied => "lock_denied",
            Self::AlreadyFilled => "already_filled",
            Self::Refilled { .. } => "refilled",
        }
    }
}

/// Tops the shared [`IdentifierPool`] up from a [`SequenceSource`].
///
/// Any number of coordinators, in any number of processes, may share the
/// same pool and lock; at most one of them refills at a time.
pub struct RefillCoordinator {
    source: Arc<dyn SequenceSource>,
    pool: Arc<dyn IdentifierPool>,
    lock: Arc<dyn RefillLock>,
    config: RefillConfig,
    retry: RetryPolicy,
}

impl RefillCoordinator {
    pub fn new(
        source: Arc<dyn SequenceSource>,
        pool: Arc<dyn IdentifierPool>,
        lock: Arc<dyn RefillLock>,
        config: RefillConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            pool,
            lock,
            config,
            retry,
        }
    }

    pub const fn config(&self) -> &RefillConfig {
        &self.config
    }

    /// Runs a cycle if the pool is below the low-water mark.
    ///
    /// # Errors
    ///
    /// Returns the first backend error encountered. The lock, if taken, is
    /// released before returning.
    pub async fn check(&self) -> Result<RefillOutcome> {
        let size = self.pool.size().await?;
        if size >= self.config.low_water {
            return Ok(RefillOutcome::NotNeeded);
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Pool size {size} below threshold {}, refilling",
            self.config.low_water
        );
        self.run_cycle().await
    }

    /// Runs one cycle unconditionally, starting at `LockAttempted`.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn run_cycle(&self) -> Result<RefillOutcome> {
        let holder = LockHolder::generate();
        if !self
            .lock
            .try_acquire(&holder, self.config.lock_timeout)
            .await?
        {
            #[cfg(feature = "tracing")]
            tracing::debug!("Refill lock held elsewhere, skipping cycle");
            return Ok(RefillOutcome::LockDenied);
        }

        let outcome = self.refill_locked().await;

        match self.lock.release(&holder).await {
            Ok(true) => {}
            Ok(false) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Refill lock expired before release ({:?} timeout)",
                    self.config.lock_timeout
                );
            }
            Err(_e) => {
                // The lock expires on its own.
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to release refill lock: {_e}");
            }
        }

        outcome
    }

    async fn refill_locked(&self) -> Result<RefillOutcome> {
        // Another holder may have finished a refill between our size check
        // and the lock acquisition.
        if self.pool.size().await? >= self.config.batch_size {
            return Ok(RefillOutcome::AlreadyFilled);
        }

        let batch_size = self.config.batch_size;
        let sequences = self
            .retry
            .run("fetch sequence batch", || self.source.allocate_batch(batch_size))
            .await?;
        let ids = sequences
            .into_iter()
            .map(Identifier::from_sequence)
            .collect::<Result<Vec<_>>>()?;
        let count = ids.len();

        // Not retried: a push that landed but lost its reply would be pushed
        // twice. The fetched values are simply never used on failure.
        self.pool.push_many(ids).await?;

        #[cfg(feature = "tracing")]
        tracing::info!("Added {count} identifiers to the pool");
        Ok(RefillOutcome::Refilled { count })
    }
}

#[cfg(test)]
mod tests;
