use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures_util::{
    FutureExt,
    future::{join_all, try_join_all},
};
use tracing::{debug, error};

use crate::{
    channels::Channel,
    clients::batch_consumer::BatchHandler,
    error::DeliveryError,
    models::{delivery::DeliveryResult, notification::Notification},
    services::strategy,
};

/// Runs each notification's strategy against the configured channels.
pub struct DeliveryService {
    channels: Vec<Arc<dyn Channel>>,
}

impl DeliveryService {
    pub fn new(channels: Vec<Arc<dyn Channel>>) -> Self {
        Self { channels }
    }

    /// One result per notification, in input order. Never fails as a whole.
    pub async fn send(&self, notifications: &[Notification]) -> Vec<DeliveryResult> {
        join_all(notifications.iter().map(|n| self.send_one(n))).await
    }

    async fn send_one(&self, notification: &Notification) -> DeliveryResult {
        let outcome = AssertUnwindSafe(strategy::deliver(notification, &self.channels))
            .catch_unwind()
            .await;

        match outcome {
            Ok(result) => {
                debug!(
                    notification_id = %notification.id,
                    success = result.is_success(),
                    warnings = result.warnings.len(),
                    "Notification delivery finished"
                );
                result
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    notification_id = %notification.id,
                    error = %message,
                    "Delivery strategy panicked"
                );
                DeliveryResult::failure(
                    notification.clone(),
                    Vec::new(),
                    DeliveryError::Strategy { message },
                )
            }
        }
    }

    /// Checks every channel concurrently; the first failure wins.
    pub async fn check_health(&self) -> Result<(), DeliveryError> {
        let checked = try_join_all(self.channels.iter().map(|channel| async move {
            match channel.check_health().await {
                None => Ok(false),
                Some(Ok(())) => Ok(true),
                Some(Err(e)) => Err(DeliveryError::from(e)),
            }
        }))
        .await?;

        if !checked.into_iter().any(|has_check| has_check) {
            return Err(DeliveryError::NoHealthCheckableChannels);
        }

        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "strategy panicked".to_string()
    }
}

#[async_trait]
impl BatchHandler for DeliveryService {
    async fn handle_batch(
        &self,
        notifications: Vec<Notification>,
    ) -> anyhow::Result<Vec<DeliveryResult>> {
        Ok(self.send(&notifications).await)
    }
}
