use std::{
    sync::atomic::{AtomicU8, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions,
    },
    types::{AMQPValue, FieldTable, ShortString},
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{
    error::{QueueError, QueueResult},
    utils::with_timeout,
};

pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Where and how patiently to reach the broker.
#[derive(Clone, Debug)]
pub struct BrokerSettings {
    pub url: String,
    pub connect_timeout: Duration,
    pub health_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct QueueNames {
    pub notifications: String,
    pub retry_router: String,
    pub retry_router_dlq: String,
    pub retry_short: String,
    pub retry_long: String,
    pub dead_letter: String,
}

/// One connection and its single channel, owned by exactly one component.
pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
}

impl RabbitMqClient {
    pub async fn connect(broker: &BrokerSettings) -> QueueResult<Self> {
        debug!("Connecting to RabbitMQ...");

        with_timeout("connect", broker.connect_timeout, async {
            let connection = Connection::connect(&broker.url, ConnectionProperties::default())
                .await
                .map_err(|e| QueueError::broker("connect", e))?;

            let channel = connection
                .create_channel()
                .await
                .map_err(|e| QueueError::broker("create channel", e))?;

            Ok(Self { connection, channel })
        })
        .await
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub async fn set_prefetch(&self, prefetch_count: u16) -> QueueResult<()> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::broker("set prefetch", e))?;

        debug!(prefetch_count, "Prefetch count set");

        Ok(())
    }

    pub async fn enable_confirms(&self) -> QueueResult<()> {
        self.channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| QueueError::broker("enable publisher confirms", e))
    }

    pub async fn consume(&self, queue: &str, consumer_tag: &str) -> QueueResult<Consumer> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::broker("consume", e))?;

        info!(queue, consumer_tag, "Consumer created for queue");

        Ok(consumer)
    }

    /// Closes the channel, then the connection. Both steps are attempted even
    /// if the first one fails.
    pub async fn close(&self) -> QueueResult<()> {
        let channel_result = self
            .channel
            .close(200, "shutdown")
            .await
            .map_err(|e| QueueError::broker("close channel", e));

        if let Err(e) = &channel_result {
            warn!(error = %e, "Failed to close RabbitMQ channel cleanly");
        }

        self.connection
            .close(200, "shutdown")
            .await
            .map_err(|e| QueueError::broker("close connection", e))?;

        channel_result
    }

    /// Opens and closes a throwaway connection. Never touches a live one.
    pub async fn check_reachable(broker: &BrokerSettings) -> QueueResult<()> {
        with_timeout("health check", broker.health_timeout, async {
            let connection = Connection::connect(&broker.url, ConnectionProperties::default())
                .await
                .map_err(|e| QueueError::broker("health check connect", e))?;

            connection
                .close(200, "health check")
                .await
                .map_err(|e| QueueError::broker("health check close", e))
        })
        .await
    }
}

pub fn persistent_properties(retry_count: Option<u32>) -> BasicProperties {
    let properties = BasicProperties::default()
        .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        .with_content_type(ShortString::from("application/json"));

    match retry_count {
        Some(count) => {
            let mut headers = FieldTable::default();
            headers.insert(
                ShortString::from(RETRY_COUNT_HEADER),
                AMQPValue::LongLongInt(i64::from(count)),
            );
            properties.with_headers(headers)
        }
        None => properties,
    }
}

/// Reads `x-retry-count`. Anything that is not a non-negative integer, in
/// numeric or string form, counts as zero.
pub fn read_retry_count(headers: Option<&FieldTable>) -> u32 {
    headers
        .and_then(|table| {
            table
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == RETRY_COUNT_HEADER)
                .map(|(_, value)| value)
        })
        .and_then(retry_count_from_value)
        .unwrap_or(0)
}

fn retry_count_from_value(value: &AMQPValue) -> Option<u32> {
    match value {
        AMQPValue::ShortShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::ShortShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::ShortInt(v) => u32::try_from(*v).ok(),
        AMQPValue::ShortUInt(v) => Some(u32::from(*v)),
        AMQPValue::LongInt(v) => u32::try_from(*v).ok(),
        AMQPValue::LongUInt(v) => Some(*v),
        AMQPValue::LongLongInt(v) => u32::try_from(*v).ok(),
        AMQPValue::Float(v) => integral_float(f64::from(*v)),
        AMQPValue::Double(v) => integral_float(*v),
        AMQPValue::ShortString(v) => v.as_str().trim().parse().ok(),
        AMQPValue::LongString(v) => std::str::from_utf8(v.as_bytes())
            .ok()
            .and_then(|s| s.trim().parse().ok()),
        _ => None,
    }
}

fn integral_float(value: f64) -> Option<u32> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= f64::from(u32::MAX) {
        Some(value as u32)
    } else {
        None
    }
}

/// Publishes onto a queue through the default exchange.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        retry_count: Option<u32>,
    ) -> QueueResult<()>;
}

#[async_trait]
impl MessagePublisher for Channel {
    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        retry_count: Option<u32>,
    ) -> QueueResult<()> {
        let confirmation = self
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                persistent_properties(retry_count),
            )
            .await
            .map_err(|e| QueueError::broker("publish", e))?
            .await
            .map_err(|e| QueueError::broker("publish confirm", e))?;

        if confirmation.is_nack() {
            return Err(QueueError::PublishRejected {
                queue: queue.to_string(),
            });
        }

        Ok(())
    }
}

/// Positive/negative acknowledgement of one consumed message.
#[async_trait]
pub trait MessageAcker: Send + Sync {
    async fn ack(&self) -> QueueResult<()>;

    /// Negative acknowledgement without requeue, so the broker dead-letters it.
    async fn nack(&self) -> QueueResult<()>;
}

#[async_trait]
impl MessageAcker for Acker {
    async fn ack(&self) -> QueueResult<()> {
        Acker::ack(self, BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| QueueError::broker("ack", e))
    }

    async fn nack(&self) -> QueueResult<()> {
        Acker::nack(
            self,
            BasicNackOptions {
                requeue: false,
                ..Default::default()
            },
        )
        .await
        .map(|_| ())
        .map_err(|e| QueueError::broker("nack", e))
    }
}

const STOPPED: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const SHUTTING_DOWN: u8 = 3;

/// Start/shutdown guard shared by producers and consumers.
///
/// Start and shutdown each hold the transition lock for their whole sequence,
/// so a shutdown issued during start waits for the start to finish and then
/// stops the component, and a second shutdown returns only after the first
/// one has drained.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: AtomicU8,
    transition: Mutex<()>,
}

/// An in-progress start or shutdown. The component ends up stopped when this
/// is dropped, unless [`Transition::mark_running`] was called.
#[must_use]
pub struct Transition<'a> {
    state: &'a AtomicU8,
    settled: u8,
    _lock: MutexGuard<'a, ()>,
}

impl Transition<'_> {
    pub fn mark_running(mut self) {
        self.settled = RUNNING;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        self.state.store(self.settled, Ordering::SeqCst);
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the component is already running.
    pub async fn begin_start(&self) -> Option<Transition<'_>> {
        self.begin(STOPPED, STARTING).await
    }

    /// `None` when the component is not running. Waits for an in-progress
    /// start or shutdown first.
    pub async fn begin_shutdown(&self) -> Option<Transition<'_>> {
        self.begin(RUNNING, SHUTTING_DOWN).await
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    async fn begin(&self, from: u8, to: u8) -> Option<Transition<'_>> {
        let lock = self.transition.lock().await;

        if self.state.load(Ordering::SeqCst) != from {
            return None;
        }
        self.state.store(to, Ordering::SeqCst);

        Some(Transition {
            state: &self.state,
            settled: STOPPED,
            _lock: lock,
        })
    }
}
