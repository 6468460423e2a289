//! Retry routing table.
//!
//! Maps a retry attempt count to the queue the message should wait in. This is
//! the only place that encodes the backoff schedule; the delays themselves are
//! the TTLs of the target queues.

use crate::clients::rbmq::QueueNames;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRoute {
    /// Highest attempt number routed to `queue`.
    pub max_attempt: u32,
    pub queue: String,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    routes: Vec<RetryRoute>,
    dead_letter_queue: String,
}

impl RetryPolicy {
    /// Routes are sorted by `max_attempt`; duplicates keep the first entry.
    pub fn new(mut routes: Vec<RetryRoute>, dead_letter_queue: impl Into<String>) -> Self {
        routes.sort_by_key(|route| route.max_attempt);
        routes.dedup_by_key(|route| route.max_attempt);

        Self {
            routes,
            dead_letter_queue: dead_letter_queue.into(),
        }
    }

    /// Attempt 1 waits in the short-delay queue, attempt 2 in the long-delay
    /// queue, everything after that goes to the dead-letter queue.
    pub fn from_queue_names(names: &QueueNames) -> Self {
        Self::new(
            vec![
                RetryRoute {
                    max_attempt: 1,
                    queue: names.retry_short.clone(),
                },
                RetryRoute {
                    max_attempt: 2,
                    queue: names.retry_long.clone(),
                },
            ],
            names.dead_letter.clone(),
        )
    }

    pub fn get_retry_queue(&self, attempt: u32) -> &str {
        self.routes
            .iter()
            .find(|route| attempt <= route.max_attempt)
            .map(|route| route.queue.as_str())
            .unwrap_or(&self.dead_letter_queue)
    }

    /// Last attempt that still gets a delayed retry.
    pub fn max_attempts(&self) -> u32 {
        self.routes.last().map(|route| route.max_attempt).unwrap_or(0)
    }

    pub fn dead_letter_queue(&self) -> &str {
        &self.dead_letter_queue
    }
}
