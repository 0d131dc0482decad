//! Channel abstraction for message I/O.
//!
//! A channel turns a messaging platform into a stream of
//! [`InboundMessage`]s and knows how to send text back. Replies go to the
//! chat the message came from; notifications go to the chat recorded in
//! their metadata.

pub mod cli;
pub mod manager;
pub mod telegram;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ChannelError;
use crate::pipeline::InboundMessage;

pub use cli::CliChannel;
pub use manager::ChannelManager;
pub use telegram::TelegramChannel;

/// Stream of inbound messages produced by a started channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

#[async_trait]
pub trait Channel: Send + Sync {
    /// Name used to route replies back (matches `InboundMessage::channel`).
    fn name(&self) -> &str;

    /// Start listening. Messages arrive on the returned stream until the
    /// channel shuts down.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Reply to `msg` in the chat it came from.
    async fn respond(&self, msg: &InboundMessage, text: &str) -> Result<(), ChannelError>;

    /// Send `text` to the chat identified by `metadata`.
    async fn deliver(&self, metadata: &serde_json::Value, text: &str) -> Result<(), ChannelError>;

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
