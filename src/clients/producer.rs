use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    clients::rbmq::{BrokerSettings, Lifecycle, MessagePublisher, RabbitMqClient},
    error::{QueueError, QueueResult},
    models::notification::Notification,
    utils::with_timeout,
};

/// Anything that can enqueue notifications for deferred delivery.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, notifications: &[Notification]) -> QueueResult<()>;
}

/// Publishes notifications onto the main queue over its own connection.
pub struct Producer {
    broker: BrokerSettings,
    queue: String,
    publish_timeout: Duration,
    lifecycle: Lifecycle,
    client: RwLock<Option<RabbitMqClient>>,
}

impl Producer {
    pub fn new(broker: BrokerSettings, queue: impl Into<String>, publish_timeout: Duration) -> Self {
        Self {
            broker,
            queue: queue.into(),
            publish_timeout,
            lifecycle: Lifecycle::new(),
            client: RwLock::new(None),
        }
    }

    pub async fn start(&self) -> QueueResult<()> {
        let Some(transition) = self.lifecycle.begin_start().await else {
            debug!(queue = %self.queue, "Producer already started, skipping");
            return Ok(());
        };

        let connected = async {
            let client = RabbitMqClient::connect(&self.broker).await?;
            client.enable_confirms().await?;
            Ok::<_, QueueError>(client)
        }
        .await;

        match connected {
            Ok(client) => {
                *self.client.write().await = Some(client);
                transition.mark_running();
                info!(queue = %self.queue, "Producer started");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Publishes every notification or fails as a whole. On error the caller
    /// must treat the entire batch as unpublished.
    pub async fn publish(&self, notifications: &[Notification]) -> QueueResult<()> {
        let channel = {
            let guard = self.client.read().await;
            match guard.as_ref() {
                Some(client) if self.lifecycle.is_running() => client.channel().clone(),
                _ => return Err(QueueError::NotStarted { component: "producer" }),
            }
        };

        let payloads = notifications
            .iter()
            .map(serde_json::to_vec)
            .collect::<Result<Vec<_>, _>>()?;

        with_timeout("publish", self.publish_timeout, async {
            for payload in &payloads {
                channel.publish(&self.queue, payload, None).await?;
            }
            Ok(())
        })
        .await?;

        debug!(queue = %self.queue, count = payloads.len(), "Notifications published");

        Ok(())
    }

    pub async fn shutdown(&self) -> QueueResult<()> {
        let Some(_transition) = self.lifecycle.begin_shutdown().await else {
            debug!(queue = %self.queue, "Producer not running, skipping shutdown");
            return Ok(());
        };

        let client = self.client.write().await.take();
        let result = match client {
            Some(client) => client.close().await,
            None => Ok(()),
        };
        info!(queue = %self.queue, "Producer stopped");

        result
    }

    pub async fn check_health(&self) -> QueueResult<()> {
        RabbitMqClient::check_reachable(&self.broker).await
    }
}

#[async_trait]
impl NotificationPublisher for Producer {
    async fn publish(&self, notifications: &[Notification]) -> QueueResult<()> {
        Producer::publish(self, notifications).await
    }
}
