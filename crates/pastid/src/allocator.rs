//! Client-facing identifier allocation.
//!
//! Allocation is a two-step pipeline:
//!
//! 1. [`AllocationService::from_pool`] pops a pre-minted identifier (after
//!    giving the [`RefillCoordinator`] a chance to top the pool up).
//! 2. [`AllocationService::from_source`] mints a single identifier straight
//!    from the [`SequenceSource`] when the pool has nothing to give.
//!
//! The fallback never waits on the refill lock, so allocation latency is
//! bounded by one counter round trip even under heavy contention.

use crate::{
    Identifier, IdentifierPool, RefillCoordinator, RefillOutcome, Result, RetryPolicy,
    SequenceSource,
};
use std::sync::Arc;

/// Which step of the pipeline produced an identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocationPath {
    /// Popped from the shared pool.
    Pool,
    /// Minted directly from the sequence source.
    Source,
}

impl AllocationPath {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pool => "pool",
            Self::Source => "source",
        }
    }
}

/// A successfully allocated identifier and how it was obtained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub identifier: Identifier,
    pub path: AllocationPath,
}

/// Hands out unique identifiers, preferring the pool.
pub struct AllocationService {
    coordinator: Arc<RefillCoordinator>,
    pool: Arc<dyn IdentifierPool>,
    source: Arc<dyn SequenceSource>,
    retry: RetryPolicy,
}

impl AllocationService {
    pub fn new(
        coordinator: Arc<RefillCoordinator>,
        pool: Arc<dyn IdentifierPool>,
        source: Arc<dyn SequenceSource>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            coordinator,
            pool,
            source,
            retry,
        }
    }

    pub fn coordinator(&self) -> &Arc<RefillCoordinator> {
        &self.coordinator
    }

    /// Returns one identifier.
    ///
    /// # Errors
    ///
    /// Only fails if the direct mint from the sequence source fails; pool
    /// and refill failures are logged and routed to the fallback.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    pub async fn allocate(&self) -> Result<Allocation> {
        if let Some(identifier) = self.from_pool().await {
            return Ok(Allocation {
                identifier,
                path: AllocationPath::Pool,
            });
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Pool is empty, minting directly from the sequence source");
        let identifier = self.from_source().await?;
        Ok(Allocation {
            identifier,
            path: AllocationPath::Source,
        })
    }

    /// Step one: top up if needed, then pop.
    ///
    /// Returns `None` when the pool is empty or unreachable.
    pub async fn from_pool(&self) -> Option<Identifier> {
        match self.coordinator.check().await {
            Ok(RefillOutcome::Refilled { count: _count }) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Request-triggered refill added {_count} identifiers");
            }
            Ok(_) => {}
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Refill check failed: {_e}");
            }
        }

        match self.pool.try_pop().await {
            Ok(id) => id,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Pool pop failed: {_e}");
                None
            }
        }
    }

    /// Step two: mint a single identifier from the sequence source.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SourceUnavailable`] once the retry budget is
    /// spent, or [`crate::Error::IdentifierSpaceExhausted`].
    pub async fn from_source(&self) -> Result<Identifier> {
        let seqs = self
            .retry
            .run("mint single identifier", || self.source.allocate_batch(1))
            .await?;
        let seq = seqs.first().copied().ok_or_else(|| crate::Error::SourceUnavailable {
            context: "empty batch".to_string(),
        })?;
        Identifier::from_sequence(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Error, LockHolder, MemoryPool, MemoryRefillLock, MemorySequence, RefillConfig, RefillLock,
    };
    use async_trait::async_trait;
    use core::time::Duration;
    use std::collections::HashSet;

    struct DeniedLock;

    #[async_trait]
    impl RefillLock for DeniedLock {
        async fn try_acquire(&self, _: &LockHolder, _: Duration) -> Result<bool> {
            Ok(false)
        }

        async fn release(&self, _: &LockHolder) -> Result<bool> {
            Ok(false)
        }
    }

    struct BrokenPool;

    #[async_trait]
    impl IdentifierPool for BrokenPool {
        async fn try_pop(&self) -> Result<Option<Identifier>> {
            Err(Error::pool_unavailable("connection reset"))
        }

        async fn push_many(&self, _: Vec<Identifier>) -> Result<()> {
            Err(Error::pool_unavailable("connection reset"))
        }

        async fn size(&self) -> Result<usize> {
            Err(Error::pool_unavailable("connection reset"))
        }
    }

    struct DownSource;

    #[async_trait]
    impl SequenceSource for DownSource {
        async fn ensure_exists(&self) -> Result<()> {
            Ok(())
        }

        async fn allocate_batch(&self, _: usize) -> Result<Vec<u64>> {
            Err(Error::source_unavailable("no route to host"))
        }
    }

    fn service(
        source: Arc<dyn SequenceSource>,
        pool: Arc<dyn IdentifierPool>,
        lock: Arc<dyn RefillLock>,
    ) -> AllocationService {
        let config = RefillConfig {
            low_water: 10,
            batch_size: 100,
            lock_timeout: Duration::from_secs(10),
        };
        let coordinator = Arc::new(RefillCoordinator::new(
            source.clone(),
            pool.clone(),
            lock,
            config,
            RetryPolicy::none(),
        ));
        AllocationService::new(coordinator, pool, source, RetryPolicy::none())
    }

    #[tokio::test]
    async fn first_request_refills_and_pops() {
        let pool = Arc::new(MemoryPool::new());
        let svc = service(
            Arc::new(MemorySequence::new()),
            pool.clone(),
            Arc::new(MemoryRefillLock::new()),
        );

        let a = svc.allocate().await.unwrap();

        assert_eq!(a.path, AllocationPath::Pool);
        assert_eq!(pool.size().await.unwrap(), 99);
    }

    #[tokio::test]
    async fn empty_pool_and_denied_lock_fall_back_to_source() {
        let svc = service(
            Arc::new(MemorySequence::new()),
            Arc::new(MemoryPool::new()),
            Arc::new(DeniedLock),
        );

        let a = svc.allocate().await.unwrap();
        let b = svc.allocate().await.unwrap();

        assert_eq!(a.path, AllocationPath::Source);
        assert_eq!(b.path, AllocationPath::Source);
        assert_eq!(a.identifier, Identifier::from_sequence(1).unwrap());
        assert_eq!(b.identifier, Identifier::from_sequence(2).unwrap());
    }

    #[tokio::test]
    async fn unreachable_pool_falls_back_to_source() {
        let svc = service(
            Arc::new(MemorySequence::new()),
            Arc::new(BrokenPool),
            Arc::new(MemoryRefillLock::new()),
        );

        let a = svc.allocate().await.unwrap();
        assert_eq!(a.path, AllocationPath::Source);
    }

    #[tokio::test]
    async fn fails_only_when_fallback_fails() {
        let svc = service(
            Arc::new(DownSource),
            Arc::new(MemoryPool::new()),
            Arc::new(MemoryRefillLock::new()),
        );

        let err = svc.allocate().await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn pool_and_fallback_never_overlap() {
        let source: Arc<dyn SequenceSource> = Arc::new(MemorySequence::new());
        let pool = Arc::new(MemoryPool::new());
        let svc = service(source.clone(), pool.clone(), Arc::new(MemoryRefillLock::new()));
        let fallback = service(source, pool, Arc::new(DeniedLock));

        let mut seen = HashSet::new();
        for _ in 0..250 {
            assert!(seen.insert(svc.allocate().await.unwrap().identifier));
            assert!(seen.insert(fallback.from_source().await.unwrap()));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_allocations_are_distinct() {
        let svc = Arc::new(service(
            Arc::new(MemorySequence::new()),
            Arc::new(MemoryPool::new()),
            Arc::new(MemoryRefillLock::new()),
        ));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let svc = svc.clone();
                tokio::spawn(async move {
                    let mut out = Vec::with_capacity(200);
                    for _ in 0..200 {
                        out.push(svc.allocate().await.unwrap().identifier);
                    }
                    out
                })
            })
            .collect();

        let all: Vec<_> = futures::future::try_join_all(tasks)
            .await
            .unwrap()
            .into_iter()
            .flatten()
            .collect();

        let mut seen = HashSet::with_capacity(all.len());
        for id in &all {
            assert!(seen.insert(id), "Duplicate identifier found: {id}");
        }
        assert_eq!(seen.len(), 16 * 200);
    }
}
