//! Broker-driven deletion of expired posts.
//!
//! When a post is written to the durable store, an [`ExpiryScheduler`]
//! publishes one [`DeletionJob`] whose delivery is withheld for the post's
//! TTL. An [`ExpiryWorker`] consumes due jobs and deletes the post.
//!
//! ```text
//! PostService --schedule_expiry--> delay exchange --(ttl)--> queue --> ExpiryWorker --delete--> ContentStore
//! ```
//!
//! Failed deletes are republished with an incremented attempt counter until
//! [`RedeliveryPolicy::max_attempts`] is reached, after which the job is
//! dropped.

#[cfg(feature = "amqp")]
mod amqp;
mod memory;
mod worker;

#[cfg_attr(docsrs, doc(cfg(feature = "amqp")))]
#[cfg(feature = "amqp")]
pub use amqp::*;
pub use memory::*;
pub use worker::*;

use crate::{Error, Identifier, Result};
use async_trait::async_trait;
use core::time::Duration;
use serde::{Deserialize, Serialize};

/// Header carrying the delivery delay in milliseconds.
pub const DELAY_HEADER: &str = "x-delay";
/// Header carrying the 1-based delivery attempt of a job.
pub const ATTEMPT_HEADER: &str = "x-attempt";

/// The payload of a deletion message: `{"hash": "<identifier>"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionJob {
    pub hash: Identifier,
}

impl DeletionJob {
    pub const fn new(hash: Identifier) -> Self {
        Self { hash }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        // Serializing a struct with one string field cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parses a message body. Anything that is not a JSON object with a
    /// well-formed `hash` is a [`Error::MalformedJob`].
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::MalformedJob {
            reason: e.to_string(),
        })
    }
}

/// Publishes deletion jobs with a delivery delay.
#[async_trait]
pub trait ExpiryScheduler: Send + Sync {
    /// Publishes `job` for delivery after `delay`. `attempt` is 1 for a
    /// freshly stored post and grows with every redelivery.
    async fn schedule(&self, job: &DeletionJob, delay: Duration, attempt: u32) -> Result<()>;

    /// Schedules deletion of `id` once `ttl_secs` have elapsed.
    ///
    /// Call only after the post has been durably written.
    async fn schedule_expiry(&self, id: &Identifier, ttl_secs: u32) -> Result<()> {
        let job = DeletionJob::new(id.clone());
        self.schedule(&job, Duration::from_secs(u64::from(ttl_secs)), 1)
            .await
    }
}

/// Bounded redelivery of failed deletes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    /// Deliveries a job gets before it is dropped.
    pub max_attempts: u32,
    /// Delay before a failed job is delivered again.
    pub retry_delay: Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Content, ContentStore, MemoryContentStore};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn id(seq: u64) -> Identifier {
        Identifier::from_sequence(seq).unwrap()
    }

    #[test]
    fn job_wire_format() {
        let job = DeletionJob::new(id(1));
        assert_eq!(job.to_vec(), br#"{"hash":"AAAAAAAB"}"#.to_vec());
        assert_eq!(DeletionJob::from_slice(&job.to_vec()).unwrap(), job);
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        for payload in [
            &b"not json"[..],
            br#"{}"#,
            br#"{"text":"AAAAAAAB"}"#,
            br#"{"hash":null}"#,
            br#"{"hash":"short"}"#,
            br#"{"hash":"AAAAAA+/"}"#,
        ] {
            assert!(
                matches!(
                    DeletionJob::from_slice(payload),
                    Err(Error::MalformedJob { .. })
                ),
                "{}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stored_post_is_deleted_after_its_ttl() {
        let store = Arc::new(MemoryContentStore::new());
        let (queue, deliveries) = MemoryDelayQueue::new();
        let worker = ExpiryWorker::new(store.clone(), RedeliveryPolicy::default());
        let token = CancellationToken::new();
        let consumer = tokio::spawn(deliveries.consume(worker, queue.clone(), token.clone()));

        store
            .put(&Content::new(id(9), "bye".into(), 5))
            .await
            .unwrap();
        queue.schedule_expiry(&id(9), 5).await.unwrap();

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert!(store.get(&id(9)).await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.get(&id(9)).await.unwrap().is_none());

        token.cancel();
        consumer.await.unwrap();
    }
}
