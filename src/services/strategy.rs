//! Fan-out algorithms over a notification's contacts and the configured
//! channels.

use std::sync::Arc;

use futures_util::future::join_all;

use crate::{
    channels::Channel,
    error::DeliveryError,
    models::{
        delivery::{DeliveryDetail, DeliveryResult, DeliveryWarning},
        notification::{Contact, DeliveryStrategy, Notification},
    },
};

const NO_SUPPORTING_CHANNEL: &str = "no channel supports this contact";

pub async fn deliver(notification: &Notification, channels: &[Arc<dyn Channel>]) -> DeliveryResult {
    match notification.strategy {
        DeliveryStrategy::FirstAvailable => send_to_first_available(notification, channels).await,
        DeliveryStrategy::AllAvailable => send_to_all_available(notification, channels).await,
    }
}

fn supporting<'a>(
    channels: &'a [Arc<dyn Channel>],
    contact: &'a Contact,
) -> impl Iterator<Item = &'a Arc<dyn Channel>> + 'a {
    channels.iter().filter(move |channel| channel.supports(contact))
}

fn unsupported(contact: &Contact) -> DeliveryWarning {
    DeliveryWarning {
        contact: contact.clone(),
        channel: None,
        reason: NO_SUPPORTING_CHANNEL.to_string(),
    }
}

/// Contacts in order, every supporting channel in order, stop at the first
/// success.
pub async fn send_to_first_available(
    notification: &Notification,
    channels: &[Arc<dyn Channel>],
) -> DeliveryResult {
    let mut warnings = Vec::new();

    for contact in &notification.contacts {
        let mut any_supported = false;

        for channel in supporting(channels, contact) {
            any_supported = true;

            match channel.send(contact, &notification.message).await {
                Ok(()) => {
                    let detail = DeliveryDetail {
                        contact: contact.clone(),
                        channel: channel.channel_type(),
                    };
                    return DeliveryResult::success(notification.clone(), vec![detail], warnings);
                }
                Err(e) => warnings.push(DeliveryWarning {
                    contact: contact.clone(),
                    channel: Some(channel.channel_type()),
                    reason: e.to_string(),
                }),
            }
        }

        if !any_supported {
            warnings.push(unsupported(contact));
        }
    }

    DeliveryResult::failure(
        notification.clone(),
        warnings,
        DeliveryError::NoChannelSucceeded,
    )
}

enum Attempt<'a> {
    Unsupported(&'a Contact),
    Send(&'a Contact, &'a Arc<dyn Channel>),
}

/// Every supporting (contact, channel) pair, concurrently. Succeeds if at
/// least one pair succeeded.
pub async fn send_to_all_available(
    notification: &Notification,
    channels: &[Arc<dyn Channel>],
) -> DeliveryResult {
    let attempts: Vec<Attempt<'_>> = notification
        .contacts
        .iter()
        .flat_map(|contact| {
            let sends: Vec<_> = supporting(channels, contact)
                .map(|channel| Attempt::Send(contact, channel))
                .collect();

            if sends.is_empty() {
                vec![Attempt::Unsupported(contact)]
            } else {
                sends
            }
        })
        .collect();

    let outcomes = join_all(attempts.into_iter().map(|attempt| async move {
        match attempt {
            Attempt::Unsupported(contact) => Err(unsupported(contact)),
            Attempt::Send(contact, channel) => {
                match channel.send(contact, &notification.message).await {
                    Ok(()) => Ok(DeliveryDetail {
                        contact: contact.clone(),
                        channel: channel.channel_type(),
                    }),
                    Err(e) => Err(DeliveryWarning {
                        contact: contact.clone(),
                        channel: Some(channel.channel_type()),
                        reason: e.to_string(),
                    }),
                }
            }
        }
    }))
    .await;

    let mut details = Vec::new();
    let mut warnings = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(detail) => details.push(detail),
            Err(warning) => warnings.push(warning),
        }
    }

    if details.is_empty() {
        DeliveryResult::failure(
            notification.clone(),
            warnings,
            DeliveryError::NoChannelSucceeded,
        )
    } else {
        DeliveryResult::success(notification.clone(), details, warnings)
    }
}
