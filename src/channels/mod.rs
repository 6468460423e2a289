//! Delivery channels.
//!
//! A channel declares which contacts it can serve and delivers a message to one
//! contact. Transport errors are normalized into [`ChannelError`] so strategies
//! never see SMTP or HTTP specifics.

use async_trait::async_trait;

use crate::{
    error::ChannelError,
    models::notification::{ChannelType, Contact},
};

pub mod bitrix;
pub mod email;
pub mod logged;

#[async_trait]
pub trait Channel: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    fn supports(&self, contact: &Contact) -> bool;

    async fn send(&self, contact: &Contact, message: &str) -> Result<(), ChannelError>;

    /// `None` when the channel has no health check to offer.
    async fn check_health(&self) -> Option<Result<(), ChannelError>> {
        None
    }
}
