use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use notification_service::{
    error::{QueueError, QueueResult},
    shutdown::{GracefulShutdown, shutdown_in_order},
};
use tokio_util::sync::CancellationToken;

type StopLog = Arc<Mutex<Vec<&'static str>>>;

struct RecordingService {
    name: &'static str,
    fail: bool,
    log: StopLog,
}

impl RecordingService {
    fn shared(name: &'static str, fail: bool, log: &StopLog) -> Arc<dyn GracefulShutdown> {
        Arc::new(Self {
            name,
            fail,
            log: Arc::clone(log),
        })
    }
}

#[async_trait]
impl GracefulShutdown for RecordingService {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn shutdown(&self) -> QueueResult<()> {
        self.log.lock().unwrap().push(self.name);
        if self.fail {
            Err(QueueError::broker("close", "connection reset"))
        } else {
            Ok(())
        }
    }
}

fn server(token: &CancellationToken, log: &StopLog) -> tokio::task::JoinHandle<Result<()>> {
    let token = token.clone();
    let log = Arc::clone(log);

    tokio::spawn(async move {
        token.cancelled().await;
        log.lock().unwrap().push("api");
        Ok(())
    })
}

/// Test: The API server stops before any producer or consumer
#[tokio::test]
async fn test_server_stops_before_services() -> Result<()> {
    let log = StopLog::default();
    let token = CancellationToken::new();
    let server = server(&token, &log);

    let services = [
        RecordingService::shared("batch_consumer", false, &log),
        RecordingService::shared("retry_consumer", false, &log),
        RecordingService::shared("producer", false, &log),
    ];
    shutdown_in_order(server, token, &services).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["api", "batch_consumer", "retry_consumer", "producer"]
    );

    Ok(())
}

/// Test: A failing shutdown does not skip the services after it
#[tokio::test]
async fn test_failed_shutdown_continues() -> Result<()> {
    let log = StopLog::default();
    let token = CancellationToken::new();
    let server = server(&token, &log);

    let services = [
        RecordingService::shared("batch_consumer", true, &log),
        RecordingService::shared("producer", false, &log),
    ];
    shutdown_in_order(server, token, &services).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["api", "batch_consumer", "producer"]
    );

    Ok(())
}
