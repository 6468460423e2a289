use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use notification_service::{
    channels::Channel,
    clients::{
        producer::NotificationPublisher,
        rbmq::{MessageAcker, MessagePublisher, QueueNames},
    },
    error::{ChannelError, QueueError, QueueResult},
    models::notification::{ChannelType, Contact, DeliveryStrategy, Notification},
    utils::ErrorCallback,
};

pub fn notification(id: &str, contacts: Vec<Contact>, strategy: DeliveryStrategy) -> Notification {
    Notification {
        id: id.to_string(),
        created_at: Utc::now(),
        contacts,
        message: format!("message {}", id),
        strategy,
        is_immediate: false,
        subject: None,
    }
}

pub fn email(address: &str) -> Contact {
    Contact::Email(address.to_string())
}

pub fn queue_names() -> QueueNames {
    QueueNames {
        notifications: "notifications".to_string(),
        retry_router: "retry-router".to_string(),
        retry_router_dlq: "retry-router-dlq".to_string(),
        retry_short: "retry-short".to_string(),
        retry_long: "retry-long".to_string(),
        dead_letter: "dead-letter".to_string(),
    }
}

/// Collects every error passed to the callback.
pub fn error_sink() -> (ErrorCallback, Arc<Mutex<Vec<QueueError>>>) {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let callback: ErrorCallback = Arc::new(move |e: &QueueError| {
        sink.lock().unwrap().push(e.clone());
    });

    (callback, errors)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Nack,
}

pub type SettlementLog = Arc<Mutex<Vec<(String, Settlement)>>>;

pub struct RecordingAcker {
    pub id: String,
    pub log: SettlementLog,
    pub fail: bool,
}

impl RecordingAcker {
    pub fn boxed(id: &str, log: &SettlementLog) -> Box<dyn MessageAcker> {
        Box::new(Self {
            id: id.to_string(),
            log: Arc::clone(log),
            fail: false,
        })
    }

    pub fn failing(id: &str, log: &SettlementLog) -> Box<dyn MessageAcker> {
        Box::new(Self {
            id: id.to_string(),
            log: Arc::clone(log),
            fail: true,
        })
    }

    fn record(&self, settlement: Settlement, operation: &'static str) -> QueueResult<()> {
        self.log.lock().unwrap().push((self.id.clone(), settlement));
        if self.fail {
            Err(QueueError::broker(operation, "channel closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessageAcker for RecordingAcker {
    async fn ack(&self) -> QueueResult<()> {
        self.record(Settlement::Ack, "ack")
    }

    async fn nack(&self) -> QueueResult<()> {
        self.record(Settlement::Nack, "nack")
    }
}

/// Acker whose ack and nack never complete.
pub struct HangingAcker;

impl HangingAcker {
    pub fn boxed() -> Box<dyn MessageAcker> {
        Box::new(Self)
    }
}

#[async_trait]
impl MessageAcker for HangingAcker {
    async fn ack(&self) -> QueueResult<()> {
        std::future::pending().await
    }

    async fn nack(&self) -> QueueResult<()> {
        std::future::pending().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishBehavior {
    Succeed,
    Fail,
    Hang,
}

/// Records `(queue, payload, retry_count)` for every publish.
pub struct RecordingPublisher {
    pub behavior: PublishBehavior,
    pub published: Mutex<Vec<(String, Vec<u8>, Option<u32>)>>,
}

impl RecordingPublisher {
    pub fn new(behavior: PublishBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            published: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl MessagePublisher for RecordingPublisher {
    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        retry_count: Option<u32>,
    ) -> QueueResult<()> {
        match self.behavior {
            PublishBehavior::Succeed => {
                self.published.lock().unwrap().push((
                    queue.to_string(),
                    payload.to_vec(),
                    retry_count,
                ));
                Ok(())
            }
            PublishBehavior::Fail => Err(QueueError::PublishRejected {
                queue: queue.to_string(),
            }),
            PublishBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

/// Records every enqueued batch of notifications. Calls whose 1-based number
/// is listed in `failing_calls` fail instead.
pub struct RecordingNotificationPublisher {
    pub failing_calls: Vec<usize>,
    pub calls: AtomicUsize,
    pub batches: Mutex<Vec<Vec<Notification>>>,
}

impl RecordingNotificationPublisher {
    pub fn new() -> Arc<Self> {
        Self::failing_on(&[])
    }

    pub fn failing_on(calls: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            failing_calls: calls.to_vec(),
            calls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl NotificationPublisher for RecordingNotificationPublisher {
    async fn publish(&self, notifications: &[Notification]) -> QueueResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_calls.contains(&call) {
            return Err(QueueError::broker("publish", "connection reset"));
        }

        self.batches.lock().unwrap().push(notifications.to_vec());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    None,
    Healthy,
    Unhealthy,
}

/// Channel with scripted outcomes. Contacts listed in `failing` fail, every
/// other supported contact succeeds.
pub struct ScriptedChannel {
    pub channel_type: ChannelType,
    pub failing: Vec<Contact>,
    pub panics: bool,
    pub health: Health,
    pub sends: SendLog,
}

pub type SendLog = Arc<Mutex<Vec<(ChannelType, Contact)>>>;

impl ScriptedChannel {
    pub fn new(channel_type: ChannelType, sends: &SendLog) -> Self {
        Self {
            channel_type,
            failing: Vec::new(),
            panics: false,
            health: Health::None,
            sends: Arc::clone(sends),
        }
    }

    pub fn failing_for(mut self, contact: Contact) -> Self {
        self.failing.push(contact);
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn with_health(mut self, health: Health) -> Self {
        self.health = health;
        self
    }

    pub fn shared(self) -> Arc<dyn Channel> {
        Arc::new(self)
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    fn supports(&self, contact: &Contact) -> bool {
        matches!(
            (self.channel_type, contact),
            (ChannelType::Email, Contact::Email(_)) | (ChannelType::Bitrix, Contact::Bitrix(_))
        )
    }

    async fn send(&self, contact: &Contact, _message: &str) -> Result<(), ChannelError> {
        if self.panics {
            panic!("scripted channel panic");
        }

        self.sends
            .lock()
            .unwrap()
            .push((self.channel_type, contact.clone()));

        if self.failing.contains(contact) {
            Err(ChannelError::unreachable(self.channel_type, "scripted failure"))
        } else {
            Ok(())
        }
    }

    async fn check_health(&self) -> Option<Result<(), ChannelError>> {
        match self.health {
            Health::None => None,
            Health::Healthy => Some(Ok(())),
            Health::Unhealthy => Some(Err(ChannelError::unreachable(
                self.channel_type,
                "scripted outage",
            ))),
        }
    }
}
