use std::{collections::HashMap, sync::Arc};

use tracing::{info, warn};

use crate::{
    clients::producer::NotificationPublisher,
    error::IngestError,
    models::notification::{IngestOutcome, Notification, NotificationRequest},
    services::delivery::DeliveryService,
};

/// Entry point for an ingress: deferred notifications go to the queue,
/// immediate ones are delivered in place and queued for retry on failure.
///
/// Enqueue failures reject only the notifications they affect; the rest of
/// the request is still accepted.
pub struct NotificationIngest {
    publisher: Arc<dyn NotificationPublisher>,
    delivery: Arc<DeliveryService>,
}

impl NotificationIngest {
    pub fn new(publisher: Arc<dyn NotificationPublisher>, delivery: Arc<DeliveryService>) -> Self {
        Self {
            publisher,
            delivery,
        }
    }

    pub async fn handle(
        &self,
        requests: Vec<NotificationRequest>,
        subject: Option<String>,
    ) -> Result<IngestOutcome, IngestError> {
        if let Some(index) = requests.iter().position(|r| r.contacts.is_empty()) {
            return Err(IngestError::InvalidRequest {
                message: format!("notification at index {} has no contacts", index),
            });
        }

        let notifications: Vec<Notification> = requests
            .into_iter()
            .map(|request| Notification::from_request(request, subject.clone()))
            .collect();

        let (immediate, deferred): (Vec<_>, Vec<_>) = notifications
            .iter()
            .cloned()
            .partition(|notification| notification.is_immediate);

        let mut rejected: HashMap<String, String> = HashMap::new();

        if !deferred.is_empty() {
            match self.publisher.publish(&deferred).await {
                Ok(()) => info!(count = deferred.len(), "Notifications enqueued"),
                Err(e) => {
                    warn!(count = deferred.len(), error = %e, "Failed to enqueue notifications");
                    reject(&mut rejected, &deferred, &e.to_string());
                }
            }
        }

        if !immediate.is_empty() {
            let failed: Vec<Notification> = self
                .delivery
                .send(&immediate)
                .await
                .into_iter()
                .filter(|result| !result.is_success())
                .map(|result| result.notification)
                .collect();

            if !failed.is_empty() {
                warn!(
                    count = failed.len(),
                    "Immediate delivery failed, enqueueing for retry"
                );

                if let Err(e) = self.publisher.publish(&failed).await {
                    warn!(count = failed.len(), error = %e, "Failed to enqueue retries");
                    reject(&mut rejected, &failed, &e.to_string());
                }
            }
        }

        Ok(IngestOutcome::partition(notifications, rejected))
    }
}

fn reject(rejected: &mut HashMap<String, String>, notifications: &[Notification], reason: &str) {
    for notification in notifications {
        rejected.insert(notification.id.clone(), reason.to_string());
    }
}
