use std::sync::Arc;

use anyhow::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use notification_service::{
    api::{AppState, run_api_server},
    channels::{Channel, bitrix::BitrixChannel, email::EmailChannel, logged::LoggedChannel},
    clients::{
        batch_consumer::BatchConsumer,
        health::HealthChecker,
        producer::Producer,
        rbmq::RabbitMqClient,
        retry_consumer::RetryConsumer,
        retry_policy::RetryPolicy,
        topology::declare_topology,
    },
    config::Config,
    services::{delivery::DeliveryService, ingest::NotificationIngest},
    shutdown::{GracefulShutdown, shutdown_in_order},
    utils::log_error_callback,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = Config::load()?;
    let broker = config.broker_settings();
    let queue_names = config.queue_names();

    if config.declare_topology {
        let client = RabbitMqClient::connect(&broker).await?;
        declare_topology(client.channel(), &queue_names, &config.retry_delays()).await?;
        client.close().await?;
    }

    let mut channels: Vec<Arc<dyn Channel>> =
        vec![LoggedChannel::wrap(Arc::new(EmailChannel::new(config.email_settings())?))];
    if let Some(settings) = config.bitrix_settings() {
        channels.push(LoggedChannel::wrap(Arc::new(BitrixChannel::new(settings)?)));
    }

    let delivery = Arc::new(DeliveryService::new(channels));

    let producer = Arc::new(Producer::new(
        broker.clone(),
        queue_names.notifications.clone(),
        config.publish_timeout(),
    ));
    let batch_consumer = Arc::new(BatchConsumer::new(
        broker.clone(),
        queue_names.notifications.clone(),
        config.batch_consumer_settings(),
        delivery.clone(),
        log_error_callback("batch_consumer"),
    ));
    let retry_consumer = Arc::new(RetryConsumer::new(
        broker,
        queue_names.retry_router.clone(),
        RetryPolicy::from_queue_names(&queue_names),
        config.retry_consumer_settings(),
        log_error_callback("retry_consumer"),
    ));

    producer.start().await?;
    batch_consumer.start().await?;
    retry_consumer.start().await?;

    let state = AppState {
        health_checker: HealthChecker::new(
            producer.clone(),
            batch_consumer.clone(),
            retry_consumer.clone(),
            delivery.clone(),
        ),
        ingest: NotificationIngest::new(producer.clone(), delivery),
    };

    let server_shutdown = CancellationToken::new();
    let server = tokio::spawn(run_api_server(
        config.server_port,
        state,
        server_shutdown.clone(),
    ));

    info!("Notification service is running");

    wait_for_signal().await;

    info!("Shutdown signal received, draining");

    let services: [Arc<dyn GracefulShutdown>; 3] = [batch_consumer, retry_consumer, producer];
    shutdown_in_order(server, server_shutdown, &services).await;

    info!("Notification service stopped");

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
