use crate::{
    ATTEMPT_HEADER, DELAY_HEADER, DeletionJob, Disposition, Error, ExpiryScheduler, ExpiryWorker,
    Result, RetryPolicy,
};
use async_trait::async_trait;
use core::time::Duration;
use futures::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable},
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Names of the delay exchange, the deletion queue and the routing key that
/// binds them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AmqpTopology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl Default for AmqpTopology {
    fn default() -> Self {
        Self {
            exchange: "delayed_exchange".to_string(),
            queue: "delete_queue".to_string(),
            routing_key: "delete_key".to_string(),
        }
    }
}

struct AmqpSession {
    // Dropping the connection closes the channel.
    connection: Connection,
    channel: Channel,
    topology: AmqpTopology,
}

impl AmqpSession {
    async fn open(url: &str, topology: AmqpTopology) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(Error::broker_unavailable)?;
        let channel = connection
            .create_channel()
            .await
            .map_err(Error::broker_unavailable)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(Error::broker_unavailable)?;

        let mut args = FieldTable::default();
        args.insert("x-delayed-type".into(), AMQPValue::LongString("direct".into()));
        channel
            .exchange_declare(
                &topology.exchange,
                ExchangeKind::Custom("x-delayed-message".to_string()),
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                args,
            )
            .await
            .map_err(Error::broker_unavailable)?;

        #[cfg(feature = "tracing")]
        tracing::info!("Declared delay exchange '{}'", topology.exchange);

        Ok(Self {
            connection,
            channel,
            topology,
        })
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    /// Publishes and waits for the broker's confirm. Only an `Ack` counts as
    /// delivered.
    async fn publish(&self, payload: &[u8], delay: Duration, attempt: u32) -> Result<()> {
        let delay_ms = i64::try_from(delay.as_millis()).map_err(Error::broker_unavailable)?;
        let confirmation = self
            .send(payload, delay_ms, attempt)
            .await
            .map_err(Error::broker_unavailable)?;
        confirmed(confirmation)
    }

    async fn send(
        &self,
        payload: &[u8],
        delay_ms: i64,
        attempt: u32,
    ) -> core::result::Result<Confirmation, lapin::Error> {
        let mut headers = FieldTable::default();
        headers.insert(DELAY_HEADER.into(), AMQPValue::LongLongInt(delay_ms));
        headers.insert(ATTEMPT_HEADER.into(), AMQPValue::LongUInt(attempt));
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2)
            .with_headers(headers);

        self.channel
            .basic_publish(
                &self.topology.exchange,
                &self.topology.routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?
            .await
    }
}

fn confirmed(confirmation: Confirmation) -> Result<()> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(Error::broker_unavailable("broker nacked the message")),
        Confirmation::NotRequested => Err(Error::broker_unavailable(
            "publisher confirms are not enabled on the channel",
        )),
    }
}

/// Whether `err` leaves the channel or connection unusable, so the session
/// has to be opened again.
fn needs_reopen(err: &lapin::Error) -> bool {
    matches!(
        err,
        lapin::Error::InvalidChannel(_)
            | lapin::Error::InvalidChannelState(_)
            | lapin::Error::InvalidConnectionState(_)
            | lapin::Error::IOError(_)
            | lapin::Error::ProtocolError(_)
            | lapin::Error::MissingHeartbeatError
    )
}

/// An [`ExpiryScheduler`] publishing to a RabbitMQ delayed-message exchange.
///
/// The broker session is reopened with `retry` when the connection or
/// channel is found closed, or when a publish fails in a way that closes
/// it. A publish that failed that way is sent once more on the new session.
pub struct AmqpExpiryScheduler {
    url: String,
    topology: AmqpTopology,
    retry: RetryPolicy,
    session: Mutex<Option<Arc<AmqpSession>>>,
}

impl AmqpExpiryScheduler {
    /// Connects and declares the delay exchange.
    pub async fn connect(url: &str, topology: AmqpTopology, retry: RetryPolicy) -> Result<Self> {
        let session = AmqpSession::open(url, topology.clone()).await?;
        Ok(Self {
            url: url.to_string(),
            topology,
            retry,
            session: Mutex::new(Some(Arc::new(session))),
        })
    }

    /// Returns the current session, opening a new one if there is none or
    /// the broker closed it.
    async fn session(&self) -> Result<Arc<AmqpSession>> {
        let mut current = self.session.lock().await;
        if let Some(session) = current.as_ref().filter(|s| s.is_open()) {
            return Ok(session.clone());
        }

        #[cfg(feature = "tracing")]
        tracing::warn!("Broker session closed, reopening");
        *current = None;
        let session = Arc::new(
            self.retry
                .run("reopen broker session", || {
                    AmqpSession::open(&self.url, self.topology.clone())
                })
                .await?,
        );
        *current = Some(session.clone());
        Ok(session)
    }

    /// Forgets `failed` unless another caller already replaced it.
    async fn discard(&self, failed: &Arc<AmqpSession>) {
        let mut current = self.session.lock().await;
        if current.as_ref().is_some_and(|s| Arc::ptr_eq(s, failed)) {
            *current = None;
        }
    }
}

#[async_trait]
impl ExpiryScheduler for AmqpExpiryScheduler {
    async fn schedule(&self, job: &DeletionJob, delay: Duration, attempt: u32) -> Result<()> {
        let payload = job.to_vec();
        let delay_ms = i64::try_from(delay.as_millis()).map_err(Error::broker_unavailable)?;

        let session = self.session().await?;
        let confirmation = match session.send(&payload, delay_ms, attempt).await {
            Ok(confirmation) => confirmation,
            Err(e) if needs_reopen(&e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Publish failed on a broken session: {e}");
                self.discard(&session).await;
                self.session()
                    .await?
                    .send(&payload, delay_ms, attempt)
                    .await
                    .map_err(Error::broker_unavailable)?
            }
            Err(e) => return Err(Error::broker_unavailable(e)),
        };
        confirmed(confirmation)?;

        #[cfg(feature = "tracing")]
        tracing::debug!("Scheduled deletion of {} in {delay:?}", job.hash);
        Ok(())
    }
}

/// Consumes deletion jobs from the queue bound to the delay exchange.
pub struct AmqpExpiryConsumer {
    session: AmqpSession,
}

impl AmqpExpiryConsumer {
    /// Connects, declares the exchange and queue, binds them and limits
    /// unacknowledged deliveries to one.
    pub async fn connect(url: &str, topology: AmqpTopology) -> Result<Self> {
        let session = AmqpSession::open(url, topology).await?;
        let channel = &session.channel;
        let topology = &session.topology;

        channel
            .queue_declare(
                &topology.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(Error::broker_unavailable)?;
        channel
            .queue_bind(
                &topology.queue,
                &topology.exchange,
                &topology.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(Error::broker_unavailable)?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(Error::broker_unavailable)?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Queue '{}' bound to '{}' with key '{}'",
            topology.queue,
            topology.exchange,
            topology.routing_key
        );
        Ok(Self { session })
    }

    /// Processes deliveries one at a time until `token` is cancelled or the
    /// broker closes the consumer. A lost session ends the run with
    /// `BrokerUnavailable`; unacknowledged deliveries go back to the queue and
    /// the caller may connect again.
    pub async fn run(self, worker: &ExpiryWorker, token: CancellationToken) -> Result<()> {
        let mut consumer = self
            .session
            .channel
            .basic_consume(
                &self.session.topology.queue,
                "pastid-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(Error::broker_unavailable)?;

        #[cfg(feature = "tracing")]
        tracing::info!("Waiting for deletion jobs on '{}'", self.session.topology.queue);

        loop {
            let delivery = tokio::select! {
                () = token.cancelled() => break,
                next = consumer.next() => match next {
                    Some(delivery) => delivery.map_err(Error::broker_unavailable)?,
                    None => {
                        return Err(Error::broker_unavailable("consumer stream closed"));
                    }
                },
            };
            self.settle(worker, delivery).await?;
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Deletion consumer stopped");
        Ok(())
    }

    async fn settle(&self, worker: &ExpiryWorker, delivery: Delivery) -> Result<()> {
        let attempt = attempt_of(&delivery);
        match worker.process(&delivery.data, attempt).await {
            Disposition::Deleted { .. } => {
                delivery
                    .ack(BasicAckOptions::default())
                    .await
                    .map_err(Error::broker_unavailable)?;
            }
            Disposition::Retry { attempt, delay } => {
                // Republish first: a crash before the ack duplicates the job
                // rather than losing it.
                self.session.publish(&delivery.data, delay, attempt).await?;
                delivery
                    .ack(BasicAckOptions::default())
                    .await
                    .map_err(Error::broker_unavailable)?;
            }
            Disposition::Drop { .. } => {
                delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await
                    .map_err(Error::broker_unavailable)?;
            }
        }
        Ok(())
    }
}

/// Reads the attempt header, defaulting to the first attempt.
fn attempt_of(delivery: &Delivery) -> u32 {
    delivery
        .properties
        .headers()
        .as_ref()
        .and_then(|headers| {
            headers
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == ATTEMPT_HEADER)
                .and_then(|(_, value)| header_u32(value))
        })
        .unwrap_or(1)
}

fn header_u32(value: &AMQPValue) -> Option<u32> {
    match value {
        AMQPValue::ShortShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::ShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::LongUInt(v) => Some(*v),
        AMQPValue::ShortShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::ShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::LongInt(v) => u32::try_from(*v).ok(),
        AMQPValue::LongLongInt(v) => u32::try_from(*v).ok(),
        _ => None,
    }
}
