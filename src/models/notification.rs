use std::{
    collections::HashMap,
    fmt::{Display, Formatter, Result},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A recipient address. Serialized as `{"type": "email", "value": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Contact {
    Email(String),
    Bitrix(i64),
}

impl Display for Contact {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Contact::Email(address) => write!(f, "email:{}", address),
            Contact::Bitrix(user_id) => write!(f, "bitrix:{}", user_id),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryStrategy {
    #[default]
    FirstAvailable,
    AllAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Bitrix,
}

impl Display for ChannelType {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            ChannelType::Email => write!(f, "email"),
            ChannelType::Bitrix => write!(f, "bitrix"),
        }
    }
}

/// The wire payload on the main and retry queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub contacts: Vec<Contact>,
    pub message: String,

    #[serde(default)]
    pub strategy: DeliveryStrategy,

    #[serde(default)]
    pub is_immediate: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

/// Raw notification as accepted from an ingress, before enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub contacts: Vec<Contact>,
    pub message: String,

    #[serde(default)]
    pub strategy: Option<DeliveryStrategy>,

    #[serde(default)]
    pub is_immediate: bool,
}

impl Notification {
    pub fn from_request(request: NotificationRequest, subject: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            contacts: request.contacts,
            message: request.message,
            strategy: request.strategy.unwrap_or_default(),
            is_immediate: request.is_immediate,
            subject,
        }
    }
}

/// A notification that could not be enqueued, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedNotification {
    pub notification: Notification,
    pub reason: String,
}

/// Per-notification result of an ingest call. Every submitted notification
/// lands in exactly one of the two lists, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub accepted: Vec<Notification>,
    pub rejected: Vec<RejectedNotification>,
}

impl IngestOutcome {
    /// Splits `notifications` by the rejection reasons keyed by id.
    pub fn partition(
        notifications: Vec<Notification>,
        mut reasons: HashMap<String, String>,
    ) -> Self {
        let mut outcome = Self::default();

        for notification in notifications {
            match reasons.remove(&notification.id) {
                Some(reason) => outcome.rejected.push(RejectedNotification {
                    notification,
                    reason,
                }),
                None => outcome.accepted.push(notification),
            }
        }

        outcome
    }

    pub fn is_fully_accepted(&self) -> bool {
        self.rejected.is_empty()
    }

    pub fn is_fully_rejected(&self) -> bool {
        self.accepted.is_empty() && !self.rejected.is_empty()
    }
}
