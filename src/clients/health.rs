use std::{collections::HashMap, fmt::Display, future::Future, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{batch_consumer::BatchConsumer, producer::Producer, retry_consumer::RetryConsumer},
    models::health::{ComponentHealth, HealthCheckResponse, HealthStatus},
    services::delivery::DeliveryService,
    utils::duration_ms,
};

const CRITICAL_CHECKS: [&str; 3] = ["producer", "batch_consumer", "retry_consumer"];

pub struct HealthChecker {
    producer: Arc<Producer>,
    batch_consumer: Arc<BatchConsumer>,
    retry_consumer: Arc<RetryConsumer>,
    delivery: Arc<DeliveryService>,
}

impl HealthChecker {
    pub fn new(
        producer: Arc<Producer>,
        batch_consumer: Arc<BatchConsumer>,
        retry_consumer: Arc<RetryConsumer>,
        delivery: Arc<DeliveryService>,
    ) -> Self {
        Self {
            producer,
            batch_consumer,
            retry_consumer,
            delivery,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let (producer, batch_consumer, retry_consumer, channels) = tokio::join!(
            timed("producer", self.producer.check_health()),
            timed("batch_consumer", self.batch_consumer.check_health()),
            timed("retry_consumer", self.retry_consumer.check_health()),
            timed("channels", self.delivery.check_health()),
        );

        let mut checks = HashMap::new();
        checks.insert("producer".to_string(), producer);
        checks.insert("batch_consumer".to_string(), batch_consumer);
        checks.insert("retry_consumer".to_string(), retry_consumer);
        checks.insert("channels".to_string(), channels);

        HealthCheckResponse {
            status: determine_overall_status(&checks),
            timestamp: Utc::now(),
            checks,
        }
    }
}

async fn timed<F, E>(name: &'static str, check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    let start = Instant::now();

    match check.await {
        Ok(()) => {
            let elapsed = duration_ms(start.elapsed());
            debug!(check = name, response_time_ms = elapsed, "Health check passed");
            ComponentHealth::healthy(elapsed)
        }
        Err(e) => {
            warn!(check = name, error = %e, "Health check failed");
            if CRITICAL_CHECKS.contains(&name) {
                ComponentHealth::unhealthy(e.to_string())
            } else {
                ComponentHealth::degraded(e.to_string())
            }
        }
    }
}

pub fn determine_overall_status(checks: &HashMap<String, ComponentHealth>) -> HealthStatus {
    let has_unhealthy = checks
        .values()
        .any(|health| health.status == HealthStatus::Unhealthy);

    let has_degraded = checks
        .values()
        .any(|health| health.status == HealthStatus::Degraded);

    if has_unhealthy {
        HealthStatus::Unhealthy
    } else if has_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
