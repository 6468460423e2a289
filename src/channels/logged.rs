use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::Channel;
use crate::{
    error::ChannelError,
    models::notification::{ChannelType, Contact},
    utils::duration_ms,
};

/// Wraps a channel with timing logs around every send and health check.
pub struct LoggedChannel {
    inner: Arc<dyn Channel>,
}

impl LoggedChannel {
    pub fn wrap(inner: Arc<dyn Channel>) -> Arc<dyn Channel> {
        Arc::new(Self { inner })
    }
}

#[async_trait]
impl Channel for LoggedChannel {
    fn channel_type(&self) -> ChannelType {
        self.inner.channel_type()
    }

    fn supports(&self, contact: &Contact) -> bool {
        self.inner.supports(contact)
    }

    async fn send(&self, contact: &Contact, message: &str) -> Result<(), ChannelError> {
        let start = Instant::now();
        let result = self.inner.send(contact, message).await;
        let elapsed_ms = duration_ms(start.elapsed());

        match &result {
            Ok(()) => debug!(
                channel = %self.inner.channel_type(),
                contact = %contact,
                elapsed_ms,
                "Channel send succeeded"
            ),
            Err(e) => warn!(
                channel = %self.inner.channel_type(),
                contact = %contact,
                elapsed_ms,
                error = %e,
                "Channel send failed"
            ),
        }

        result
    }

    async fn check_health(&self) -> Option<Result<(), ChannelError>> {
        let start = Instant::now();
        let result = self.inner.check_health().await;

        if let Some(Err(e)) = &result {
            warn!(
                channel = %self.inner.channel_type(),
                elapsed_ms = duration_ms(start.elapsed()),
                error = %e,
                "Channel health check failed"
            );
        }

        result
    }
}
