use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    clients::health::HealthChecker,
    error::IngestError,
    models::{
        health::HealthStatus,
        notification::{IngestOutcome, NotificationRequest},
        response::ApiResponse,
    },
    services::ingest::NotificationIngest,
};

pub struct AppState {
    pub health_checker: HealthChecker,
    pub ingest: NotificationIngest,
}

#[derive(Debug, Deserialize)]
pub struct SubmitNotifications {
    pub notifications: Vec<NotificationRequest>,

    #[serde(default)]
    pub subject: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/notifications", post(submit_notifications))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn run_api_server(
    port: u16,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "API server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// 202 when everything was enqueued, 503 when nothing was, 207 otherwise.
pub fn submission_status(outcome: &IngestOutcome) -> (StatusCode, &'static str) {
    if outcome.is_fully_accepted() {
        (StatusCode::ACCEPTED, "Notifications accepted")
    } else if outcome.is_fully_rejected() {
        (StatusCode::SERVICE_UNAVAILABLE, "Notifications were not accepted")
    } else {
        (StatusCode::MULTI_STATUS, "Some notifications were not accepted")
    }
}

async fn submit_notifications(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitNotifications>,
) -> (StatusCode, Json<ApiResponse<IngestOutcome>>) {
    match state.ingest.handle(body.notifications, body.subject).await {
        Ok(outcome) => {
            let (status_code, message) = submission_status(&outcome);

            if !outcome.is_fully_accepted() {
                warn!(
                    accepted = outcome.accepted.len(),
                    rejected = outcome.rejected.len(),
                    "Notification submission partially failed"
                );
            }

            let mut response = ApiResponse::success(outcome, message.to_string());
            response.success = status_code != StatusCode::SERVICE_UNAVAILABLE;

            (status_code, Json(response))
        }
        Err(e) => {
            warn!(error = %e, "Notification submission failed");

            let status_code = match e {
                IngestError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            };

            (
                status_code,
                Json(ApiResponse::error(
                    e.to_string(),
                    "Notifications were not accepted".to_string(),
                )),
            )
        }
    }
}
