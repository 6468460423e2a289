use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use notification_service::{
    api::submission_status,
    clients::producer::NotificationPublisher,
    error::IngestError,
    models::notification::{ChannelType, Contact, DeliveryStrategy, NotificationRequest},
    services::{delivery::DeliveryService, ingest::NotificationIngest},
};

use crate::common::{RecordingNotificationPublisher, ScriptedChannel, SendLog, email};

fn request(contacts: Vec<Contact>, is_immediate: bool) -> NotificationRequest {
    NotificationRequest {
        contacts,
        message: "hello".to_string(),
        strategy: None,
        is_immediate,
    }
}

fn ingest(
    publisher: &Arc<RecordingNotificationPublisher>,
    log: &SendLog,
) -> NotificationIngest {
    let delivery = Arc::new(DeliveryService::new(vec![
        ScriptedChannel::new(ChannelType::Email, log)
            .failing_for(email("down@example.com"))
            .shared(),
    ]));
    let publisher: Arc<dyn NotificationPublisher> = publisher.clone();

    NotificationIngest::new(publisher, delivery)
}

/// Test: Deferred notifications are enriched and enqueued, not delivered
#[tokio::test]
async fn test_deferred_notifications_are_enqueued() -> Result<()> {
    let publisher = RecordingNotificationPublisher::new();
    let log = SendLog::default();
    let ingest = ingest(&publisher, &log);

    let outcome = ingest
        .handle(
            vec![
                request(vec![email("a@example.com")], false),
                request(vec![Contact::Bitrix(3)], false),
            ],
            Some("Weekly report".to_string()),
        )
        .await?;
    assert!(outcome.rejected.is_empty());
    let accepted = outcome.accepted;

    assert_eq!(accepted.len(), 2);
    assert_ne!(accepted[0].id, accepted[1].id);
    assert!(accepted.iter().all(|n| n.strategy == DeliveryStrategy::FirstAvailable));
    assert!(
        accepted
            .iter()
            .all(|n| n.subject.as_deref() == Some("Weekly report"))
    );

    let batches = publisher.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], accepted);
    assert!(log.lock().unwrap().is_empty(), "deferred must not be sent inline");

    Ok(())
}

/// Test: Immediate notifications are delivered inline; only failures are enqueued
#[tokio::test]
async fn test_immediate_failures_are_enqueued_for_retry() -> Result<()> {
    let publisher = RecordingNotificationPublisher::new();
    let log = SendLog::default();
    let ingest = ingest(&publisher, &log);

    let outcome = ingest
        .handle(
            vec![
                request(vec![email("a@example.com")], true),
                request(vec![email("down@example.com")], true),
            ],
            None,
        )
        .await?;
    assert!(outcome.is_fully_accepted());
    let accepted = outcome.accepted;

    assert_eq!(log.lock().unwrap().len(), 2);

    let batches = publisher.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    assert_eq!(batches[0][0].id, accepted[1].id);

    Ok(())
}

/// Test: Requests without contacts are rejected before anything is enqueued
#[tokio::test]
async fn test_request_without_contacts_is_rejected() -> Result<()> {
    let publisher = RecordingNotificationPublisher::new();
    let log = SendLog::default();
    let ingest = ingest(&publisher, &log);

    let result = ingest
        .handle(
            vec![
                request(vec![email("a@example.com")], false),
                request(Vec::new(), false),
            ],
            None,
        )
        .await;

    assert!(matches!(result, Err(IngestError::InvalidRequest { .. })));
    assert!(publisher.batches.lock().unwrap().is_empty());

    Ok(())
}

/// Test: A broker failure rejects every notification it affects
#[tokio::test]
async fn test_enqueue_failure_rejects_notifications() -> Result<()> {
    let publisher = RecordingNotificationPublisher::failing_on(&[1]);
    let log = SendLog::default();
    let ingest = ingest(&publisher, &log);

    let outcome = ingest
        .handle(vec![request(vec![email("a@example.com")], false)], None)
        .await?;

    assert!(outcome.accepted.is_empty());
    assert_eq!(outcome.rejected.len(), 1);
    assert!(outcome.rejected[0].reason.contains("connection reset"));
    assert!(outcome.is_fully_rejected());
    assert_eq!(
        submission_status(&outcome).0,
        StatusCode::SERVICE_UNAVAILABLE
    );

    Ok(())
}

/// Test: A failed retry enqueue rejects only the undelivered immediates
#[tokio::test]
async fn test_failed_retry_enqueue_keeps_deferred_accepted() -> Result<()> {
    let publisher = RecordingNotificationPublisher::failing_on(&[2]);
    let log = SendLog::default();
    let ingest = ingest(&publisher, &log);

    let outcome = ingest
        .handle(
            vec![
                request(vec![email("queued@example.com")], false),
                request(vec![email("a@example.com")], true),
                request(vec![email("down@example.com")], true),
            ],
            None,
        )
        .await?;

    let accepted: Vec<_> = outcome
        .accepted
        .iter()
        .map(|n| n.contacts[0].clone())
        .collect();
    assert_eq!(
        accepted,
        vec![email("queued@example.com"), email("a@example.com")]
    );

    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(
        outcome.rejected[0].notification.contacts,
        vec![email("down@example.com")]
    );

    // The deferred batch went out on the first call, the retry failed on the second.
    assert_eq!(publisher.batches.lock().unwrap().len(), 1);
    assert_eq!(
        submission_status(&outcome).0,
        StatusCode::MULTI_STATUS
    );

    Ok(())
}

/// Test: A fully enqueued request maps to 202 Accepted
#[tokio::test]
async fn test_fully_accepted_request_status() -> Result<()> {
    let publisher = RecordingNotificationPublisher::new();
    let log = SendLog::default();
    let ingest = ingest(&publisher, &log);

    let outcome = ingest
        .handle(vec![request(vec![email("a@example.com")], false)], None)
        .await?;

    assert_eq!(submission_status(&outcome).0, StatusCode::ACCEPTED);

    Ok(())
}
