use super::*;
use crate::{Error, MemoryPool, MemoryRefillLock, MemorySequence};
use async_trait::async_trait;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Wraps a source and records how many batch fetches overlap in time.
struct ObservedSource {
    inner: MemorySequence,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
}

impl ObservedSource {
    fn new() -> Self {
        Self {
            inner: MemorySequence::new(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SequenceSource for ObservedSource {
    async fn ensure_exists(&self) -> Result<()> {
        Ok(())
    }

    async fn allocate_batch(&self, n: usize) -> Result<Vec<u64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        // Hold the "Refilling" state long enough for other tasks to race.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let out = self.inner.allocate_batch(n).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

struct FailingSource;

#[async_trait]
impl SequenceSource for FailingSource {
    async fn ensure_exists(&self) -> Result<()> {
        Err(Error::source_unavailable("connection refused"))
    }

    async fn allocate_batch(&self, _n: usize) -> Result<Vec<u64>> {
        Err(Error::source_unavailable("connection refused"))
    }
}

/// A lock that always reports contention.
struct DeniedLock;

#[async_trait]
impl RefillLock for DeniedLock {
    async fn try_acquire(&self, _holder: &LockHolder, _ttl: Duration) -> Result<bool> {
        Ok(false)
    }

    async fn release(&self, _holder: &LockHolder) -> Result<bool> {
        Ok(false)
    }
}

/// Records whether release was attempted.
#[derive(Default)]
struct TrackingLock {
    inner: MemoryRefillLock,
    released: AtomicBool,
}

#[async_trait]
impl RefillLock for TrackingLock {
    async fn try_acquire(&self, holder: &LockHolder, ttl: Duration) -> Result<bool> {
        self.inner.try_acquire(holder, ttl).await
    }

    async fn release(&self, holder: &LockHolder) -> Result<bool> {
        self.released.store(true, Ordering::SeqCst);
        self.inner.release(holder).await
    }
}

fn config() -> RefillConfig {
    RefillConfig {
        low_water: 10,
        batch_size: 50,
        lock_timeout: Duration::from_secs(10),
    }
}

fn coordinator(
    source: Arc<dyn SequenceSource>,
    pool: Arc<dyn IdentifierPool>,
    lock: Arc<dyn RefillLock>,
) -> RefillCoordinator {
    RefillCoordinator::new(source, pool, lock, config(), RetryPolicy::none())
}

#[tokio::test]
async fn refills_when_below_low_water() {
    let pool = Arc::new(MemoryPool::new());
    let c = coordinator(
        Arc::new(MemorySequence::new()),
        pool.clone(),
        Arc::new(MemoryRefillLock::new()),
    );

    let outcome = c.check().await.unwrap();

    assert_eq!(outcome, RefillOutcome::Refilled { count: 50 });
    assert_eq!(pool.size().await.unwrap(), 50);
}

#[tokio::test]
async fn skips_when_above_low_water() {
    let pool = Arc::new(MemoryPool::new());
    pool.push_many(
        (1..=10)
            .map(|s| Identifier::from_sequence(s).unwrap())
            .collect(),
    )
    .await
    .unwrap();
    let source = Arc::new(ObservedSource::new());
    let c = coordinator(source.clone(), pool.clone(), Arc::new(MemoryRefillLock::new()));

    assert_eq!(c.check().await.unwrap(), RefillOutcome::NotNeeded);
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn lock_denied_is_not_an_error() {
    let pool = Arc::new(MemoryPool::new());
    let c = coordinator(Arc::new(MemorySequence::new()), pool.clone(), Arc::new(DeniedLock));

    assert_eq!(c.check().await.unwrap(), RefillOutcome::LockDenied);
    assert_eq!(pool.size().await.unwrap(), 0);
}

#[tokio::test]
async fn rechecks_occupancy_after_taking_the_lock() {
    let pool = Arc::new(MemoryPool::new());
    pool.push_many(
        (1..=50)
            .map(|s| Identifier::from_sequence(s).unwrap())
            .collect(),
    )
    .await
    .unwrap();
    let source = Arc::new(ObservedSource::new());
    let lock = Arc::new(TrackingLock::default());
    let c = coordinator(source.clone(), pool.clone(), lock.clone());

    assert_eq!(c.run_cycle().await.unwrap(), RefillOutcome::AlreadyFilled);
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    assert!(lock.released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn source_failure_ends_cycle_and_releases_lock() {
    let pool = Arc::new(MemoryPool::new());
    let lock = Arc::new(TrackingLock::default());
    let c = coordinator(Arc::new(FailingSource), pool.clone(), lock.clone());

    let err = c.check().await.unwrap_err();

    assert!(matches!(err, Error::SourceUnavailable { .. }));
    assert!(lock.released.load(Ordering::SeqCst));
    assert_eq!(pool.size().await.unwrap(), 0);

    // The lock is free again for the next cycle.
    let holder = LockHolder::generate();
    assert!(
        lock.try_acquire(&holder, Duration::from_secs(1))
            .await
            .unwrap()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn at_most_one_refill_runs_at_a_time() {
    let source = Arc::new(ObservedSource::new());
    let pool = Arc::new(MemoryPool::new());
    let lock = Arc::new(MemoryRefillLock::new());

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let c = coordinator(source.clone(), pool.clone(), lock.clone());
            tokio::spawn(async move { c.check().await.unwrap() })
        })
        .collect();

    let outcomes = futures::future::try_join_all(tasks).await.unwrap();

    assert_eq!(source.max_active.load(Ordering::SeqCst), 1);
    let refills = outcomes
        .iter()
        .filter(|o| matches!(o, RefillOutcome::Refilled { .. }))
        .count();
    assert!(refills >= 1);
    assert_eq!(refills, source.calls.load(Ordering::SeqCst));

    // No identifier appears twice no matter how many refills ran.
    let mut seen = std::collections::HashSet::new();
    while let Some(id) = pool.try_pop().await.unwrap() {
        assert!(seen.insert(id), "duplicate identifier in pool");
    }
    assert_eq!(seen.len(), refills * 50);
}
