use std::fmt::{Display, Formatter, Result};

use crate::{
    error::DeliveryError,
    models::notification::{ChannelType, Contact, Notification},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Success,
    Failure,
}

/// One failed attempt, or a contact nothing could serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryWarning {
    pub contact: Contact,

    /// `None` when no configured channel supports the contact.
    pub channel: Option<ChannelType>,
    pub reason: String,
}

impl Display for DeliveryWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self.channel {
            Some(channel) => write!(f, "{} via {}: {}", self.contact, channel, self.reason),
            None => write!(f, "{}: {}", self.contact, self.reason),
        }
    }
}

/// A successful (contact, channel) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryDetail {
    pub contact: Contact,
    pub channel: ChannelType,
}

#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub status: DeliveryStatus,
    pub notification: Notification,
    pub warnings: Vec<DeliveryWarning>,
    pub details: Vec<DeliveryDetail>,
    pub error: Option<DeliveryError>,
}

impl DeliveryResult {
    pub fn success(
        notification: Notification,
        details: Vec<DeliveryDetail>,
        warnings: Vec<DeliveryWarning>,
    ) -> Self {
        Self {
            status: DeliveryStatus::Success,
            notification,
            warnings,
            details,
            error: None,
        }
    }

    pub fn failure(
        notification: Notification,
        warnings: Vec<DeliveryWarning>,
        error: DeliveryError,
    ) -> Self {
        Self {
            status: DeliveryStatus::Failure,
            notification,
            warnings,
            details: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeliveryStatus::Success
    }
}
