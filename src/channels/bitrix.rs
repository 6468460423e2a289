//! Bitrix24 internal chat channel, driven through an inbound REST webhook.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Channel;
use crate::{
    error::ChannelError,
    models::notification::{ChannelType, Contact},
};

#[derive(Clone, Debug)]
pub struct BitrixSettings {
    /// e.g. `https://example.bitrix24.ru/rest/1/secret`
    pub webhook_url: String,
    pub send_timeout: Duration,
    pub health_timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct NotifyRequest<'a> {
    user_id: i64,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct BitrixResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct BitrixChannel {
    http_client: Client,
    base_url: String,
    send_timeout: Duration,
    health_timeout: Duration,
}

impl BitrixChannel {
    pub fn new(settings: BitrixSettings) -> Result<Self, ChannelError> {
        let http_client = Client::builder()
            .build()
            .map_err(|e| ChannelError::unreachable(ChannelType::Bitrix, e))?;

        let base_url = settings.webhook_url.trim_end_matches('/').to_string();

        info!("Bitrix channel initialized");

        Ok(Self {
            http_client,
            base_url,
            send_timeout: settings.send_timeout,
            health_timeout: settings.health_timeout,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}.json", self.base_url, method)
    }

    async fn check_response(response: Response) -> Result<(), ChannelError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ChannelError::unreachable(ChannelType::Bitrix, e))?;

        // Bitrix reports method errors in the body, sometimes with a 200.
        if let Ok(BitrixResponse {
            error: Some(error),
            error_description,
        }) = serde_json::from_str::<BitrixResponse>(&body)
        {
            return Err(ChannelError::unreachable(
                ChannelType::Bitrix,
                format!("{}: {}", error, error_description.unwrap_or_default()),
            ));
        }

        if !status.is_success() {
            return Err(ChannelError::unreachable(
                ChannelType::Bitrix,
                format!("HTTP {}: {}", status.as_u16(), body),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl Channel for BitrixChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Bitrix
    }

    fn supports(&self, contact: &Contact) -> bool {
        matches!(contact, Contact::Bitrix(_))
    }

    async fn send(&self, contact: &Contact, message: &str) -> Result<(), ChannelError> {
        let Contact::Bitrix(user_id) = contact else {
            return Err(ChannelError::UnsupportedContact {
                channel: ChannelType::Bitrix,
                contact: contact.to_string(),
            });
        };

        let response = self
            .http_client
            .post(self.method_url("im.notify.system.add"))
            .timeout(self.send_timeout)
            .json(&NotifyRequest {
                user_id: *user_id,
                message,
            })
            .send()
            .await
            .map_err(|e| ChannelError::unreachable(ChannelType::Bitrix, e))?;

        Self::check_response(response).await?;

        debug!(user_id, "Bitrix notification sent");

        Ok(())
    }

    async fn check_health(&self) -> Option<Result<(), ChannelError>> {
        let result = match self
            .http_client
            .get(self.method_url("server.time"))
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(response) => Self::check_response(response).await,
            Err(e) => Err(ChannelError::unreachable(ChannelType::Bitrix, e)),
        };

        Some(result)
    }
}
