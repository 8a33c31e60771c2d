use crate::{ContentStore, DeletionJob, Error, RedeliveryPolicy};
use core::time::Duration;
use std::sync::Arc;

/// What the consumer must do with a delivery once it has been processed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The post was deleted, or was already gone. Acknowledge.
    Deleted { existed: bool },
    /// Publish the job again with `attempt` after `delay`, then acknowledge
    /// the current delivery.
    Retry { attempt: u32, delay: Duration },
    /// Reject without requeue. Set for malformed jobs and for jobs that
    /// exhausted their delete attempts.
    Drop { reason: String },
}

impl Disposition {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deleted { existed: true } => "deleted",
            Self::Deleted { existed: false } => "already_absent",
            Self::Retry { .. } => "retry",
            Self::Drop { .. } => "dropped",
        }
    }
}

type Observer = Arc<dyn Fn(&Disposition) + Send + Sync>;

/// Turns deletion job deliveries into deletes against a [`ContentStore`].
///
/// The worker is transport agnostic: consumers hand it the raw payload and
/// the delivery attempt and act on the returned [`Disposition`].
#[derive(Clone)]
pub struct ExpiryWorker {
    store: Arc<dyn ContentStore>,
    policy: RedeliveryPolicy,
    observer: Option<Observer>,
}

impl ExpiryWorker {
    pub fn new(store: Arc<dyn ContentStore>, policy: RedeliveryPolicy) -> Self {
        Self {
            store,
            policy,
            observer: None,
        }
    }

    /// Registers a callback invoked with every disposition, for metrics.
    #[must_use]
    pub fn with_observer(mut self, observer: impl Fn(&Disposition) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub const fn policy(&self) -> &RedeliveryPolicy {
        &self.policy
    }

    /// Processes one delivery.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self, payload)))]
    pub async fn process(&self, payload: &[u8], attempt: u32) -> Disposition {
        let disposition = self.handle(payload, attempt.max(1)).await;
        if let Some(observer) = &self.observer {
            observer(&disposition);
        }
        disposition
    }

    async fn handle(&self, payload: &[u8], attempt: u32) -> Disposition {
        let job = match DeletionJob::from_slice(payload) {
            Ok(job) => job,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Dropping deletion job: {e}");
                return Disposition::Drop {
                    reason: e.to_string(),
                };
            }
        };

        match self.store.delete(&job.hash).await {
            Ok(existed) => {
                #[cfg(feature = "tracing")]
                if existed {
                    tracing::info!("Deleted expired post {}", job.hash);
                } else {
                    tracing::debug!("Post {} was already gone", job.hash);
                }
                Disposition::Deleted { existed }
            }
            Err(e) => self.on_failure(&job, attempt, e),
        }
    }

    fn on_failure(&self, job: &DeletionJob, attempt: u32, err: Error) -> Disposition {
        if attempt >= self.policy.max_attempts {
            #[cfg(feature = "tracing")]
            tracing::error!(
                "Giving up on deleting {} after {attempt} attempts: {err}",
                job.hash
            );
            return Disposition::Drop {
                reason: format!("{} after {attempt} attempts: {err}", job.hash),
            };
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(
            "Delete of {} failed (attempt {attempt}/{}), retrying in {:?}: {err}",
            job.hash,
            self.policy.max_attempts,
            self.policy.retry_delay
        );
        #[cfg(not(feature = "tracing"))]
        let _ = (job, err);
        Disposition::Retry {
            attempt: attempt + 1,
            delay: self.policy.retry_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Content, ExpiryScheduler, Identifier, MemoryContentStore, MemoryDelayQueue, Result,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    fn id(seq: u64) -> Identifier {
        Identifier::from_sequence(seq).unwrap()
    }

    fn payload(seq: u64) -> Vec<u8> {
        DeletionJob::new(id(seq)).to_vec()
    }

    /// Fails the first `failures` deletes, then delegates.
    struct FlakyStore {
        inner: MemoryContentStore,
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryContentStore::new(),
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ContentStore for FlakyStore {
        async fn put(&self, content: &Content) -> Result<()> {
            self.inner.put(content).await
        }

        async fn get(&self, id: &Identifier) -> Result<Option<Content>> {
            self.inner.get(id).await
        }

        async fn delete(&self, id: &Identifier) -> Result<bool> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(Error::DeleteFailed {
                    identifier: id.to_string(),
                    context: "connection reset".into(),
                });
            }
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn deletes_and_tolerates_duplicates() {
        let store = Arc::new(MemoryContentStore::new());
        store
            .put(&Content::new(id(1), "x".into(), 60))
            .await
            .unwrap();
        let worker = ExpiryWorker::new(store.clone(), RedeliveryPolicy::default());

        assert_eq!(
            worker.process(&payload(1), 1).await,
            Disposition::Deleted { existed: true }
        );
        assert_eq!(
            worker.process(&payload(1), 1).await,
            Disposition::Deleted { existed: false }
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn malformed_jobs_are_dropped() {
        let worker = ExpiryWorker::new(
            Arc::new(MemoryContentStore::new()),
            RedeliveryPolicy::default(),
        );
        assert!(matches!(
            worker.process(br#"{"nope":1}"#, 1).await,
            Disposition::Drop { .. }
        ));
    }

    #[tokio::test]
    async fn failures_retry_until_the_attempt_budget() {
        let policy = RedeliveryPolicy {
            max_attempts: 3,
            retry_delay: Duration::from_secs(7),
        };
        let worker = ExpiryWorker::new(Arc::new(FlakyStore::new(u32::MAX)), policy);

        assert_eq!(
            worker.process(&payload(1), 1).await,
            Disposition::Retry {
                attempt: 2,
                delay: Duration::from_secs(7)
            }
        );
        assert_eq!(
            worker.process(&payload(1), 2).await,
            Disposition::Retry {
                attempt: 3,
                delay: Duration::from_secs(7)
            }
        );
        assert!(matches!(
            worker.process(&payload(1), 3).await,
            Disposition::Drop { .. }
        ));
    }

    #[tokio::test]
    async fn observer_sees_every_disposition() {
        let seen = Arc::new(AtomicU32::new(0));
        let counter = seen.clone();
        let worker = ExpiryWorker::new(
            Arc::new(MemoryContentStore::new()),
            RedeliveryPolicy::default(),
        )
        .with_observer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        worker.process(&payload(1), 1).await;
        worker.process(b"garbage", 1).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_redelivered_through_the_queue() {
        let store = Arc::new(FlakyStore::new(2));
        store
            .put(&Content::new(id(4), "x".into(), 1))
            .await
            .unwrap();
        let policy = RedeliveryPolicy {
            max_attempts: 5,
            retry_delay: Duration::from_secs(30),
        };
        let worker = ExpiryWorker::new(store.clone(), policy);
        let (queue, deliveries) = MemoryDelayQueue::new();
        let token = CancellationToken::new();
        let consumer = tokio::spawn(deliveries.consume(worker, queue.clone(), token.clone()));

        queue.schedule_expiry(&id(4), 1).await.unwrap();

        // First delivery at 1s fails, the retry at 31s fails, the one at 61s
        // succeeds.
        tokio::time::sleep(Duration::from_secs(32)).await;
        assert!(store.get(&id(4)).await.unwrap().is_some());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(store.get(&id(4)).await.unwrap().is_none());
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);

        token.cancel();
        consumer.await.unwrap();
    }
}
