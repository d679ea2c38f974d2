// File: src/platforms/mod.rs

use async_trait::async_trait;
use tunebot_common::models::ChannelId;

use crate::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Anything that can post a text message to a channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_message(&self, channel_id: ChannelId, message: &str) -> Result<(), Error>;
}

#[async_trait]
pub trait PlatformIntegration {
    async fn connect(&mut self) -> Result<(), Error>;
    async fn disconnect(&mut self) -> Result<(), Error>;
}

pub mod discord;
