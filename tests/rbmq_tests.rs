use std::time::Duration;

use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use notification_service::clients::rbmq::{
    Lifecycle, RETRY_COUNT_HEADER, persistent_properties, read_retry_count,
};
use notification_service::utils::duration_ms;
use tokio::time::timeout;

fn headers_with(value: AMQPValue) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(ShortString::from(RETRY_COUNT_HEADER), value);
    headers
}

/// Test: Missing headers count as zero retries
#[test]
fn test_missing_retry_header_is_zero() {
    assert_eq!(read_retry_count(None), 0);
    assert_eq!(read_retry_count(Some(&FieldTable::default())), 0);
}

/// Test: Numeric header values of any integer width are read
#[test]
fn test_numeric_retry_header_is_read() {
    let cases = [
        AMQPValue::ShortShortUInt(2),
        AMQPValue::ShortInt(2),
        AMQPValue::LongInt(2),
        AMQPValue::LongUInt(2),
        AMQPValue::LongLongInt(2),
        AMQPValue::Double(2.0),
    ];

    for value in cases {
        let headers = headers_with(value.clone());
        assert_eq!(read_retry_count(Some(&headers)), 2, "value {:?}", value);
    }
}

/// Test: String header values are parsed
#[test]
fn test_string_retry_header_is_parsed() {
    let short = headers_with(AMQPValue::ShortString(ShortString::from("1")));
    let long = headers_with(AMQPValue::LongString(LongString::from("2")));

    assert_eq!(read_retry_count(Some(&short)), 1);
    assert_eq!(read_retry_count(Some(&long)), 2);
}

/// Test: Garbage and negative header values fall back to zero
#[test]
fn test_invalid_retry_header_is_zero() {
    let cases = [
        AMQPValue::LongString(LongString::from("abc")),
        AMQPValue::LongLongInt(-1),
        AMQPValue::Double(1.5),
        AMQPValue::Boolean(true),
    ];

    for value in cases {
        let headers = headers_with(value.clone());
        assert_eq!(read_retry_count(Some(&headers)), 0, "value {:?}", value);
    }
}

/// Test: Published messages are persistent and carry the retry count
#[test]
fn test_persistent_properties_with_retry_count() {
    let properties = persistent_properties(Some(3));

    assert_eq!(*properties.delivery_mode(), Some(2));
    assert_eq!(read_retry_count(properties.headers().as_ref()), 3);
}

/// Test: First publish carries no retry header
#[test]
fn test_persistent_properties_without_retry_count() {
    let properties = persistent_properties(None);

    assert_eq!(*properties.delivery_mode(), Some(2));
    assert!(properties.headers().is_none());
}

/// Test: Durations convert to whole milliseconds and saturate on overflow
#[test]
fn test_duration_ms_saturates() {
    assert_eq!(duration_ms(Duration::from_micros(1_500)), 1);
    assert_eq!(duration_ms(Duration::from_secs(2)), 2_000);
    assert_eq!(duration_ms(Duration::MAX), u64::MAX);
}

/// Test: Lifecycle start and shutdown are idempotent
#[tokio::test]
async fn test_lifecycle_transitions() {
    let lifecycle = Lifecycle::new();

    assert!(
        lifecycle.begin_shutdown().await.is_none(),
        "shutdown before start is a no-op"
    );

    let start = lifecycle.begin_start().await.expect("first start");
    start.mark_running();
    assert!(lifecycle.is_running());
    assert!(lifecycle.begin_start().await.is_none(), "start while running");

    let shutdown = lifecycle.begin_shutdown().await.expect("first shutdown");
    assert!(!lifecycle.is_running());
    drop(shutdown);

    assert!(!lifecycle.is_running());
    assert!(lifecycle.begin_shutdown().await.is_none(), "second shutdown");
    assert!(
        lifecycle.begin_start().await.is_some(),
        "restart after shutdown"
    );
}

/// Test: A failed start leaves the component startable again
#[tokio::test]
async fn test_lifecycle_failed_start_resets() {
    let lifecycle = Lifecycle::new();

    let start = lifecycle.begin_start().await.expect("first start");
    drop(start);

    assert!(!lifecycle.is_running());
    assert!(lifecycle.begin_start().await.is_some());
}

/// Test: Shutdown requested while start is in progress waits and then stops
#[tokio::test]
async fn test_lifecycle_shutdown_waits_for_start() {
    let lifecycle = Lifecycle::new();
    let start = lifecycle.begin_start().await.expect("first start");

    let shutdown = lifecycle.begin_shutdown();
    tokio::pin!(shutdown);
    assert!(
        timeout(Duration::from_millis(50), &mut shutdown).await.is_err(),
        "shutdown must not return while starting"
    );

    start.mark_running();

    let transition = timeout(Duration::from_secs(1), &mut shutdown)
        .await
        .expect("shutdown proceeds after start settles")
        .expect("running component is shut down");
    drop(transition);

    assert!(!lifecycle.is_running());
}

/// Test: A second shutdown returns only after the first has finished
#[tokio::test]
async fn test_lifecycle_second_shutdown_waits_for_first() {
    let lifecycle = Lifecycle::new();
    lifecycle
        .begin_start()
        .await
        .expect("first start")
        .mark_running();

    let first = lifecycle.begin_shutdown().await.expect("first shutdown");

    let second = lifecycle.begin_shutdown();
    tokio::pin!(second);
    assert!(
        timeout(Duration::from_millis(50), &mut second).await.is_err(),
        "second shutdown must wait for the drain"
    );

    drop(first);

    let second = timeout(Duration::from_secs(1), &mut second)
        .await
        .expect("second shutdown returns once the first finished");
    assert!(second.is_none());
    assert!(!lifecycle.is_running());
}
