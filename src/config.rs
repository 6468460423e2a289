use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    channels::{bitrix::BitrixSettings, email::EmailSettings},
    clients::{
        batch_consumer::BatchConsumerSettings,
        rbmq::{BrokerSettings, QueueNames},
        retry_consumer::RetryConsumerSettings,
        topology::RetryDelays,
    },
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    pub notifications_queue_name: String,
    pub retry_router_queue_name: String,
    pub retry_router_dlq_name: String,
    pub retry_short_queue_name: String,
    pub retry_long_queue_name: String,
    pub dead_letter_queue_name: String,

    #[serde(default = "default_retry_short_delay_ms")]
    pub retry_short_delay_ms: u64,
    #[serde(default = "default_retry_long_delay_ms")]
    pub retry_long_delay_ms: u64,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u16,
    #[serde(default = "default_batch_flush_interval_ms")]
    pub batch_flush_interval_ms: u64,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    #[serde(default = "default_retry_prefetch_count")]
    pub retry_prefetch_count: u16,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    #[serde(default = "default_broker_connect_timeout_ms")]
    pub broker_connect_timeout_ms: u64,
    #[serde(default = "default_broker_health_timeout_ms")]
    pub broker_health_timeout_ms: u64,
    #[serde(default = "default_shutdown_poll_interval_ms")]
    pub shutdown_poll_interval_ms: u64,

    #[serde(default)]
    pub declare_topology: bool,

    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    #[serde(default = "default_true")]
    pub smtp_starttls: bool,
    #[serde(default = "default_email_subject")]
    pub email_subject: String,

    pub bitrix_webhook_url: Option<String>,

    #[serde(default = "default_channel_send_timeout_ms")]
    pub channel_send_timeout_ms: u64,
    #[serde(default = "default_channel_health_timeout_ms")]
    pub channel_health_timeout_ms: u64,

    pub server_port: u16,
}

fn default_retry_short_delay_ms() -> u64 {
    30 * 60 * 1000
}

fn default_retry_long_delay_ms() -> u64 {
    2 * 60 * 60 * 1000
}

fn default_max_batch_size() -> u16 {
    50
}

fn default_batch_flush_interval_ms() -> u64 {
    5_000
}

fn default_flush_timeout_ms() -> u64 {
    60_000
}

fn default_retry_prefetch_count() -> u16 {
    10
}

fn default_broker_connect_timeout_ms() -> u64 {
    10_000
}

fn default_publish_timeout_ms() -> u64 {
    5_000
}

fn default_broker_health_timeout_ms() -> u64 {
    3_000
}

fn default_shutdown_poll_interval_ms() -> u64 {
    100
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

fn default_email_subject() -> String {
    "Notification".to_string()
}

fn default_channel_send_timeout_ms() -> u64 {
    10_000
}

fn default_channel_health_timeout_ms() -> u64 {
    3_000
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;

        if config.max_batch_size == 0 {
            return Err(anyhow!("MAX_BATCH_SIZE must be greater than zero"));
        }

        Ok(config)
    }

    pub fn queue_names(&self) -> QueueNames {
        QueueNames {
            notifications: self.notifications_queue_name.clone(),
            retry_router: self.retry_router_queue_name.clone(),
            retry_router_dlq: self.retry_router_dlq_name.clone(),
            retry_short: self.retry_short_queue_name.clone(),
            retry_long: self.retry_long_queue_name.clone(),
            dead_letter: self.dead_letter_queue_name.clone(),
        }
    }

    pub fn retry_delays(&self) -> RetryDelays {
        RetryDelays {
            short: Duration::from_millis(self.retry_short_delay_ms),
            long: Duration::from_millis(self.retry_long_delay_ms),
        }
    }

    pub fn batch_consumer_settings(&self) -> BatchConsumerSettings {
        BatchConsumerSettings {
            max_batch_size: self.max_batch_size,
            flush_interval: Duration::from_millis(self.batch_flush_interval_ms),
            flush_timeout: Duration::from_millis(self.flush_timeout_ms),
            shutdown_poll_interval: Duration::from_millis(self.shutdown_poll_interval_ms),
        }
    }

    pub fn broker_settings(&self) -> BrokerSettings {
        BrokerSettings {
            url: self.rabbitmq_url.clone(),
            connect_timeout: Duration::from_millis(self.broker_connect_timeout_ms),
            health_timeout: Duration::from_millis(self.broker_health_timeout_ms),
        }
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn retry_consumer_settings(&self) -> RetryConsumerSettings {
        RetryConsumerSettings {
            prefetch_count: self.retry_prefetch_count,
            publish_timeout: self.publish_timeout(),
        }
    }

    pub fn email_settings(&self) -> EmailSettings {
        EmailSettings {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            username: self.smtp_username.clone(),
            password: self.smtp_password.clone(),
            from: self.smtp_from.clone(),
            starttls: self.smtp_starttls,
            subject: self.email_subject.clone(),
            send_timeout: Duration::from_millis(self.channel_send_timeout_ms),
            health_timeout: Duration::from_millis(self.channel_health_timeout_ms),
        }
    }

    pub fn bitrix_settings(&self) -> Option<BitrixSettings> {
        self.bitrix_webhook_url.as_ref().map(|url| BitrixSettings {
            webhook_url: url.clone(),
            send_timeout: Duration::from_millis(self.channel_send_timeout_ms),
            health_timeout: Duration::from_millis(self.channel_health_timeout_ms),
        })
    }
}
