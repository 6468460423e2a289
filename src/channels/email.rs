//! Email channel over SMTP.

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tokio::time::timeout;
use tracing::{debug, info};

use super::Channel;
use crate::{
    error::ChannelError,
    models::notification::{ChannelType, Contact},
    utils::duration_ms,
};

#[derive(Clone, Debug)]
pub struct EmailSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub starttls: bool,
    pub subject: String,
    pub send_timeout: Duration,
    pub health_timeout: Duration,
}

pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    subject: String,
    send_timeout: Duration,
    health_timeout: Duration,
}

impl EmailChannel {
    pub fn new(settings: EmailSettings) -> Result<Self, ChannelError> {
        let builder = if settings.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .map_err(|e| ChannelError::unreachable(ChannelType::Email, e))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };

        let mut builder = builder
            .port(settings.port)
            .timeout(Some(settings.send_timeout));

        if let (Some(username), Some(password)) = (settings.username, settings.password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        let from = settings.from.parse::<Mailbox>().map_err(|e| {
            ChannelError::unreachable(ChannelType::Email, format!("invalid sender address: {}", e))
        })?;

        info!(host = %settings.host, port = settings.port, "Email channel initialized");

        Ok(Self {
            transport: builder.build(),
            from,
            subject: settings.subject,
            send_timeout: settings.send_timeout,
            health_timeout: settings.health_timeout,
        })
    }

    fn build_message(&self, address: &str, body: &str) -> Result<Message, ChannelError> {
        let to = address.parse::<Mailbox>().map_err(|e| {
            ChannelError::unreachable(ChannelType::Email, format!("invalid recipient address: {}", e))
        })?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(self.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| ChannelError::unreachable(ChannelType::Email, e))
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    fn supports(&self, contact: &Contact) -> bool {
        matches!(contact, Contact::Email(_))
    }

    async fn send(&self, contact: &Contact, message: &str) -> Result<(), ChannelError> {
        let Contact::Email(address) = contact else {
            return Err(ChannelError::UnsupportedContact {
                channel: ChannelType::Email,
                contact: contact.to_string(),
            });
        };

        let email = self.build_message(address, message)?;

        match timeout(self.send_timeout, self.transport.send(email)).await {
            Ok(Ok(_)) => {
                debug!(recipient = %address, "Email sent");
                Ok(())
            }
            Ok(Err(e)) => Err(ChannelError::unreachable(ChannelType::Email, e)),
            Err(_) => Err(ChannelError::unreachable(
                ChannelType::Email,
                format!("send timed out after {}ms", duration_ms(self.send_timeout)),
            )),
        }
    }

    async fn check_health(&self) -> Option<Result<(), ChannelError>> {
        let result = match timeout(self.health_timeout, self.transport.test_connection()).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(ChannelError::unreachable(
                ChannelType::Email,
                "SMTP server rejected the connection test",
            )),
            Ok(Err(e)) => Err(ChannelError::unreachable(ChannelType::Email, e)),
            Err(_) => Err(ChannelError::unreachable(
                ChannelType::Email,
                format!(
                    "health check timed out after {}ms",
                    duration_ms(self.health_timeout)
                ),
            )),
        };

        Some(result)
    }
}
