use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::error;

use crate::error::{QueueError, QueueResult};

/// Callback invoked for errors contained inside a consumer's message path.
pub type ErrorCallback = Arc<dyn Fn(&QueueError) + Send + Sync>;

/// Default callback: log and move on.
pub fn log_error_callback(component: &'static str) -> ErrorCallback {
    Arc::new(move |e: &QueueError| {
        error!(component, error = %e, "Message handling failed");
    })
}

pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Runs a broker operation under a deadline, mapping the elapsed deadline to
/// [`QueueError::Timeout`].
pub async fn with_timeout<T, Fut>(
    operation: &'static str,
    limit: Duration,
    future: Fut,
) -> QueueResult<T>
where
    Fut: Future<Output = QueueResult<T>>,
{
    match timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(QueueError::timeout(operation, duration_ms(limit))),
    }
}
