//! Batch consumer for the main notifications queue.
//!
//! Deliveries are buffered and handed to a [`BatchHandler`] either when the
//! buffer reaches `max_batch_size` or when the flush interval elapses. Each
//! item is acked on success and nacked without requeue on failure, so the
//! broker dead-letters it into the retry pipeline.
//!
//! Only one flush runs at a time. A flush swaps the buffer out before calling
//! the handler, so new deliveries keep accumulating while a batch is in flight.
//! The handler call and the settlement of its results are each bounded by
//! `flush_timeout`.

use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};
use lapin::{Consumer, message::Delivery};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{MissedTickBehavior, interval, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clients::rbmq::{BrokerSettings, Lifecycle, MessageAcker, RabbitMqClient},
    error::{QueueError, QueueResult},
    models::{delivery::DeliveryResult, notification::Notification},
    utils::{ErrorCallback, with_timeout},
};

#[derive(Clone, Debug)]
pub struct BatchConsumerSettings {
    pub max_batch_size: u16,
    pub flush_interval: Duration,
    pub flush_timeout: Duration,
    pub shutdown_poll_interval: Duration,
}

/// Processes one batch and returns exactly one result per notification, in
/// input order.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle_batch(
        &self,
        notifications: Vec<Notification>,
    ) -> anyhow::Result<Vec<DeliveryResult>>;
}

pub struct BatchItem {
    pub notification: Notification,
    pub acker: Box<dyn MessageAcker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Buffered,
    /// Buffered, and the buffer is now full.
    BatchFull,
    /// Cancelled; left unacked for redelivery.
    Dropped,
    /// Undeserializable or without contacts; nacked without requeue.
    Rejected,
}

struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Buffer and flush logic, independent of the broker connection.
pub struct BatchProcessor {
    handler: Arc<dyn BatchHandler>,
    settings: BatchConsumerSettings,
    buffer: Mutex<Vec<BatchItem>>,
    flushing: AtomicBool,
    cancellation: CancellationToken,
    on_error: ErrorCallback,
}

impl BatchProcessor {
    pub fn new(
        handler: Arc<dyn BatchHandler>,
        settings: BatchConsumerSettings,
        cancellation: CancellationToken,
        on_error: ErrorCallback,
    ) -> Self {
        Self {
            handler,
            settings,
            buffer: Mutex::new(Vec::new()),
            flushing: AtomicBool::new(false),
            cancellation,
            on_error,
        }
    }

    pub async fn accept(&self, body: &[u8], acker: Box<dyn MessageAcker>) -> Admission {
        if self.cancellation.is_cancelled() {
            debug!("Consumer cancelled, leaving message for redelivery");
            return Admission::Dropped;
        }

        let notification = match serde_json::from_slice::<Notification>(body) {
            Ok(notification) => notification,
            Err(e) => {
                warn!(error = %e, "Rejecting undeserializable message");
                if let Err(nack_err) = acker.nack().await {
                    (self.on_error)(&nack_err);
                }
                return Admission::Rejected;
            }
        };

        if notification.contacts.is_empty() {
            warn!(id = %notification.id, "Rejecting notification without contacts");
            if let Err(nack_err) = acker.nack().await {
                (self.on_error)(&nack_err);
            }
            return Admission::Rejected;
        }

        let mut buffer = self.buffer.lock().await;
        // Re-checked under the lock so a drain never misses a late push.
        if self.cancellation.is_cancelled() {
            debug!("Consumer cancelled, leaving message for redelivery");
            return Admission::Dropped;
        }
        buffer.push(BatchItem {
            notification,
            acker,
        });

        if buffer.len() >= usize::from(self.settings.max_batch_size) {
            Admission::BatchFull
        } else {
            Admission::Buffered
        }
    }

    /// Returns `false` without doing anything when another flush is running.
    pub async fn flush(&self) -> bool {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Flush already in progress, skipping");
            return false;
        }
        let _guard = FlushGuard(&self.flushing);

        let batch = std::mem::take(&mut *self.buffer.lock().await);
        if !batch.is_empty() {
            self.process(batch).await;
        }

        true
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::SeqCst)
    }

    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Flushes a non-empty buffer every `flush_interval` until cancelled.
    pub async fn run_flush_timer(&self) {
        let mut ticker = interval(self.settings.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => break,
                _ = ticker.tick() => {
                    if self.buffered().await > 0 {
                        self.flush().await;
                    }
                }
            }
        }
    }

    /// Stops intake, waits for the running flush and flushes what is left.
    pub async fn drain(&self) {
        self.cancellation.cancel();

        loop {
            while self.is_flushing() {
                sleep(self.settings.shutdown_poll_interval).await;
            }
            if self.flush().await {
                break;
            }
        }
    }

    async fn process(&self, batch: Vec<BatchItem>) {
        let batch_size = batch.len();
        let (notifications, ackers): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .map(|item| (item.notification, item.acker))
            .unzip();

        let handler = Arc::clone(&self.handler);
        let outcome = with_timeout("flush", self.settings.flush_timeout, async move {
            AssertUnwindSafe(handler.handle_batch(notifications))
                .catch_unwind()
                .await
                .map_err(|_| QueueError::handler("batch handler panicked"))?
                .map_err(QueueError::handler)
        })
        .await;

        let verdicts: Vec<bool> = match outcome {
            Ok(results) if results.len() == batch_size => {
                results.iter().map(DeliveryResult::is_success).collect()
            }
            Ok(results) => {
                (self.on_error)(&QueueError::ResultCountMismatch {
                    expected: batch_size,
                    actual: results.len(),
                });
                vec![false; batch_size]
            }
            Err(e) => {
                (self.on_error)(&e);
                vec![false; batch_size]
            }
        };

        // Items left unsettled on timeout are redelivered by the broker once
        // the channel closes.
        let mut acked = 0;
        let settlement = with_timeout("settle batch", self.settings.flush_timeout, async {
            for (acker, success) in ackers.iter().zip(verdicts) {
                let settled = if success {
                    acked += 1;
                    acker.ack().await
                } else {
                    acker.nack().await
                };

                if let Err(e) = settled {
                    (self.on_error)(&e);
                }
            }
            Ok(())
        })
        .await;

        if let Err(e) = settlement {
            (self.on_error)(&e);
        }

        info!(
            batch_size,
            acked,
            nacked = batch_size - acked,
            "Batch flushed"
        );
    }
}

struct RunningConsumer {
    client: RabbitMqClient,
    processor: Arc<BatchProcessor>,
    cancellation: CancellationToken,
    consume_task: JoinHandle<()>,
    timer_task: JoinHandle<()>,
}

pub struct BatchConsumer {
    broker: BrokerSettings,
    queue: String,
    settings: BatchConsumerSettings,
    handler: Arc<dyn BatchHandler>,
    on_error: ErrorCallback,
    lifecycle: Lifecycle,
    running: Mutex<Option<RunningConsumer>>,
}

impl BatchConsumer {
    pub fn new(
        broker: BrokerSettings,
        queue: impl Into<String>,
        settings: BatchConsumerSettings,
        handler: Arc<dyn BatchHandler>,
        on_error: ErrorCallback,
    ) -> Self {
        Self {
            broker,
            queue: queue.into(),
            settings,
            handler,
            on_error,
            lifecycle: Lifecycle::new(),
            running: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> QueueResult<()> {
        let Some(transition) = self.lifecycle.begin_start().await else {
            debug!(queue = %self.queue, "Batch consumer already started, skipping");
            return Ok(());
        };

        match self.open().await {
            Ok(running) => {
                *self.running.lock().await = Some(running);
                transition.mark_running();
                info!(
                    queue = %self.queue,
                    max_batch_size = self.settings.max_batch_size,
                    "Batch consumer started"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn open(&self) -> QueueResult<RunningConsumer> {
        let client = RabbitMqClient::connect(&self.broker).await?;

        // One batch worth of unacked deliveries at most.
        client.set_prefetch(self.settings.max_batch_size).await?;

        let consumer_tag = format!("batch-consumer-{}", Uuid::new_v4());
        let consumer = client.consume(&self.queue, &consumer_tag).await?;

        let cancellation = CancellationToken::new();
        let processor = Arc::new(BatchProcessor::new(
            Arc::clone(&self.handler),
            self.settings.clone(),
            cancellation.clone(),
            Arc::clone(&self.on_error),
        ));

        let consume_task = tokio::spawn(consume_loop(
            consumer,
            Arc::clone(&processor),
            cancellation.clone(),
            Arc::clone(&self.on_error),
        ));
        let timer_processor = Arc::clone(&processor);
        let timer_task = tokio::spawn(async move { timer_processor.run_flush_timer().await });

        Ok(RunningConsumer {
            client,
            processor,
            cancellation,
            consume_task,
            timer_task,
        })
    }

    /// Stops intake, waits for the running flush, flushes what is left and
    /// closes the connection.
    pub async fn shutdown(&self) -> QueueResult<()> {
        let Some(_transition) = self.lifecycle.begin_shutdown().await else {
            debug!(queue = %self.queue, "Batch consumer not running, skipping shutdown");
            return Ok(());
        };

        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        running.cancellation.cancel();

        if let Err(e) = running.timer_task.await {
            warn!(error = %e, "Flush timer task ended abnormally");
        }
        if let Err(e) = running.consume_task.await {
            warn!(error = %e, "Consume task ended abnormally");
        }

        running.processor.drain().await;

        let result = running.client.close().await;
        info!(queue = %self.queue, "Batch consumer stopped");

        result
    }

    pub async fn check_health(&self) -> QueueResult<()> {
        RabbitMqClient::check_reachable(&self.broker).await
    }
}

async fn consume_loop(
    mut consumer: Consumer,
    processor: Arc<BatchProcessor>,
    cancellation: CancellationToken,
    on_error: ErrorCallback,
) {
    loop {
        let next = tokio::select! {
            _ = cancellation.cancelled() => break,
            next = consumer.next() => next,
        };

        match next {
            Some(Ok(delivery)) => {
                let Delivery { data, acker, .. } = delivery;

                if processor.accept(&data, Box::new(acker)).await == Admission::BatchFull {
                    let processor = Arc::clone(&processor);
                    tokio::spawn(async move {
                        processor.flush().await;
                    });
                }
            }
            Some(Err(e)) => {
                on_error(&QueueError::broker("consume", e));
            }
            None => {
                warn!("Consumer stream ended");
                break;
            }
        }
    }
}
