//! Ordered teardown of the running service.
//!
//! The API server stops first so no request can reach a producer that is
//! already closed. Consumers drain next and the producer goes last, since
//! nothing else publishes through it by then.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    clients::{batch_consumer::BatchConsumer, producer::Producer, retry_consumer::RetryConsumer},
    error::QueueResult,
};

#[async_trait]
pub trait GracefulShutdown: Send + Sync {
    fn name(&self) -> &'static str;

    async fn shutdown(&self) -> QueueResult<()>;
}

#[async_trait]
impl GracefulShutdown for Producer {
    fn name(&self) -> &'static str {
        "producer"
    }

    async fn shutdown(&self) -> QueueResult<()> {
        Producer::shutdown(self).await
    }
}

#[async_trait]
impl GracefulShutdown for BatchConsumer {
    fn name(&self) -> &'static str {
        "batch_consumer"
    }

    async fn shutdown(&self) -> QueueResult<()> {
        BatchConsumer::shutdown(self).await
    }
}

#[async_trait]
impl GracefulShutdown for RetryConsumer {
    fn name(&self) -> &'static str {
        "retry_consumer"
    }

    async fn shutdown(&self) -> QueueResult<()> {
        RetryConsumer::shutdown(self).await
    }
}

/// Stops the API server, then shuts `services` down one by one in the given
/// order. A failing service is logged and does not stop the rest.
pub async fn shutdown_in_order(
    server: JoinHandle<anyhow::Result<()>>,
    server_shutdown: CancellationToken,
    services: &[Arc<dyn GracefulShutdown>],
) {
    server_shutdown.cancel();
    match server.await {
        Ok(Err(e)) => error!(error = %e, "API server exited with error"),
        Err(e) => error!(error = %e, "API server task failed"),
        Ok(Ok(())) => info!("API server stopped"),
    }

    for service in services {
        if let Err(e) = service.shutdown().await {
            error!(service = service.name(), error = %e, "Shutdown failed");
        }
    }
}
