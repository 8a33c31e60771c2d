use crate::{DeletionJob, Disposition, ExpiryScheduler, ExpiryWorker, Result};
use async_trait::async_trait;
use core::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A delivered message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub payload: Vec<u8>,
    pub attempt: u32,
}

/// An in-process delay exchange backed by tokio timers.
///
/// Every scheduled job is held by a sleeping task and handed to the paired
/// [`MemoryDeliveries`] once its delay has elapsed.
#[derive(Clone, Debug)]
pub struct MemoryDelayQueue {
    tx: mpsc::UnboundedSender<Delivery>,
}

/// Receiving half of a [`MemoryDelayQueue`].
#[derive(Debug)]
pub struct MemoryDeliveries {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl MemoryDelayQueue {
    pub fn new() -> (Self, MemoryDeliveries) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, MemoryDeliveries { rx })
    }

    /// Delivers `payload` after `delay` without inspecting it.
    pub fn publish(&self, payload: Vec<u8>, delay: Duration, attempt: u32) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver is gone once the consumer has shut down.
            let _ = tx.send(Delivery { payload, attempt });
        });
    }
}

#[async_trait]
impl ExpiryScheduler for MemoryDelayQueue {
    async fn schedule(&self, job: &DeletionJob, delay: Duration, attempt: u32) -> Result<()> {
        self.publish(job.to_vec(), delay, attempt);
        Ok(())
    }
}

impl MemoryDeliveries {
    /// Waits for the next due delivery.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Feeds due deliveries to `worker` one at a time until `token` is
    /// cancelled. Retries are published back onto `queue`.
    pub async fn consume(
        mut self,
        worker: ExpiryWorker,
        queue: MemoryDelayQueue,
        token: CancellationToken,
    ) {
        loop {
            let delivery = tokio::select! {
                () = token.cancelled() => break,
                next = self.recv() => match next {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            match worker.process(&delivery.payload, delivery.attempt).await {
                Disposition::Retry { attempt, delay } => {
                    queue.publish(delivery.payload, delay, attempt);
                }
                Disposition::Deleted { .. } | Disposition::Drop { .. } => {}
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("In-memory deletion consumer stopped");
    }
}
