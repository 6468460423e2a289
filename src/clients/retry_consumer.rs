use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use lapin::{Consumer, types::FieldTable};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clients::{
        rbmq::{
            BrokerSettings, Lifecycle, MessageAcker, MessagePublisher, RabbitMqClient,
            read_retry_count,
        },
        retry_policy::RetryPolicy,
    },
    error::{QueueError, QueueResult},
    utils::{ErrorCallback, with_timeout},
};

#[derive(Clone, Debug)]
pub struct RetryConsumerSettings {
    pub prefetch_count: u16,
    pub publish_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryHop {
    pub queue: String,
    pub retry_count: u32,
}

/// Moves one dead-lettered message to its next retry queue.
pub struct RetryRouter {
    policy: RetryPolicy,
    publisher: Arc<dyn MessagePublisher>,
    publish_timeout: Duration,
    on_error: ErrorCallback,
}

impl RetryRouter {
    pub fn new(
        policy: RetryPolicy,
        publisher: Arc<dyn MessagePublisher>,
        publish_timeout: Duration,
        on_error: ErrorCallback,
    ) -> Self {
        Self {
            policy,
            publisher,
            publish_timeout,
            on_error,
        }
    }

    pub fn next_hop(&self, headers: Option<&FieldTable>) -> RetryHop {
        let retry_count = read_retry_count(headers).saturating_add(1);

        RetryHop {
            queue: self.policy.get_retry_queue(retry_count).to_string(),
            retry_count,
        }
    }

    /// Republishes the body unchanged with the incremented count, then acks.
    /// On publish failure the original is nacked without requeue. Errors are
    /// reported through the callback before being returned.
    pub async fn route(
        &self,
        body: &[u8],
        headers: Option<&FieldTable>,
        acker: &dyn MessageAcker,
    ) -> QueueResult<RetryHop> {
        let hop = self.next_hop(headers);

        let published = with_timeout(
            "retry publish",
            self.publish_timeout,
            self.publisher.publish(&hop.queue, body, Some(hop.retry_count)),
        )
        .await;

        if let Err(e) = published {
            (self.on_error)(&e);
            if let Err(nack_err) = acker.nack().await {
                (self.on_error)(&nack_err);
            }
            return Err(e);
        }

        if let Err(e) = acker.ack().await {
            (self.on_error)(&e);
            return Err(e);
        }

        if hop.queue == self.policy.dead_letter_queue() {
            warn!(
                retry_count = hop.retry_count,
                queue = %hop.queue,
                "Retry attempts exhausted, message dead-lettered"
            );
        } else {
            info!(
                retry_count = hop.retry_count,
                queue = %hop.queue,
                "Message scheduled for retry"
            );
        }

        Ok(hop)
    }
}

struct RunningConsumer {
    client: RabbitMqClient,
    cancellation: CancellationToken,
    consume_task: JoinHandle<()>,
}

/// Drains the retry-router queue, one message at a time.
pub struct RetryConsumer {
    broker: BrokerSettings,
    queue: String,
    policy: RetryPolicy,
    settings: RetryConsumerSettings,
    on_error: ErrorCallback,
    lifecycle: Lifecycle,
    running: Mutex<Option<RunningConsumer>>,
}

impl RetryConsumer {
    pub fn new(
        broker: BrokerSettings,
        queue: impl Into<String>,
        policy: RetryPolicy,
        settings: RetryConsumerSettings,
        on_error: ErrorCallback,
    ) -> Self {
        Self {
            broker,
            queue: queue.into(),
            policy,
            settings,
            on_error,
            lifecycle: Lifecycle::new(),
            running: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> QueueResult<()> {
        let Some(transition) = self.lifecycle.begin_start().await else {
            debug!(queue = %self.queue, "Retry consumer already started, skipping");
            return Ok(());
        };

        match self.open().await {
            Ok(running) => {
                *self.running.lock().await = Some(running);
                transition.mark_running();
                info!(
                    queue = %self.queue,
                    max_attempts = self.policy.max_attempts(),
                    "Retry consumer started"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn open(&self) -> QueueResult<RunningConsumer> {
        let client = RabbitMqClient::connect(&self.broker).await?;
        client.set_prefetch(self.settings.prefetch_count).await?;
        client.enable_confirms().await?;

        let consumer_tag = format!("retry-consumer-{}", Uuid::new_v4());
        let consumer = client.consume(&self.queue, &consumer_tag).await?;

        let router = RetryRouter::new(
            self.policy.clone(),
            Arc::new(client.channel().clone()),
            self.settings.publish_timeout,
            Arc::clone(&self.on_error),
        );

        let cancellation = CancellationToken::new();
        let consume_task = tokio::spawn(consume_loop(
            consumer,
            router,
            cancellation.clone(),
            Arc::clone(&self.on_error),
        ));

        Ok(RunningConsumer {
            client,
            cancellation,
            consume_task,
        })
    }

    pub async fn shutdown(&self) -> QueueResult<()> {
        let Some(_transition) = self.lifecycle.begin_shutdown().await else {
            debug!(queue = %self.queue, "Retry consumer not running, skipping shutdown");
            return Ok(());
        };

        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        running.cancellation.cancel();
        if let Err(e) = running.consume_task.await {
            warn!(error = %e, "Retry consume task ended abnormally");
        }

        let result = running.client.close().await;
        info!(queue = %self.queue, "Retry consumer stopped");

        result
    }

    pub async fn check_health(&self) -> QueueResult<()> {
        RabbitMqClient::check_reachable(&self.broker).await
    }
}

async fn consume_loop(
    mut consumer: Consumer,
    router: RetryRouter,
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
                // Already reported through the callback.
                let _ = router
                    .route(
                        &delivery.data,
                        delivery.properties.headers().as_ref(),
                        &delivery.acker,
                    )
                    .await;
            }
            Some(Err(e)) => {
                on_error(&QueueError::broker("consume", e));
            }
            None => {
                warn!("Retry consumer stream ended");
                break;
            }
        }
    }
}
