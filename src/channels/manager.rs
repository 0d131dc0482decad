//! Owns the running channels and merges their inbound streams.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream;

use crate::channels::{Channel, MessageStream};
use crate::error::ChannelError;
use crate::notify::Notification;
use crate::pipeline::InboundMessage;

#[derive(Default)]
pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel. A later channel with the same name replaces the earlier.
    pub fn add(&mut self, channel: Arc<dyn Channel>) {
        self.channels.insert(channel.name().to_string(), channel);
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start every channel and merge their streams. Channels that fail to
    /// start are logged and skipped; it is an error only if none start.
    pub async fn start_all(&self) -> Result<MessageStream, ChannelError> {
        let mut streams = Vec::new();
        for (name, channel) in &self.channels {
            match channel.start().await {
                Ok(stream) => {
                    tracing::info!(channel = %name, "Channel started");
                    streams.push(stream);
                }
                Err(e) => tracing::error!(channel = %name, error = %e, "Channel failed to start"),
            }
        }

        if streams.is_empty() {
            return Err(ChannelError::StartupFailed {
                name: "all".into(),
                reason: "no channel could be started".into(),
            });
        }
        Ok(Box::pin(stream::select_all(streams)))
    }

    fn get(&self, name: &str) -> Result<&Arc<dyn Channel>, ChannelError> {
        self.channels
            .get(name)
            .ok_or_else(|| ChannelError::UnknownChannel { name: name.into() })
    }

    /// Reply on the channel the message arrived on.
    pub async fn respond(&self, msg: &InboundMessage, text: &str) -> Result<(), ChannelError> {
        self.get(&msg.channel)?.respond(msg, text).await
    }

    /// Push a notification on its channel.
    pub async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError> {
        self.get(&notification.channel)?
            .deliver(&notification.metadata, &notification.text)
            .await
    }

    pub async fn shutdown_all(&self) {
        for (name, channel) in &self.channels {
            if let Err(e) = channel.shutdown().await {
                tracing::warn!(channel = %name, error = %e, "Channel shutdown failed");
            }
        }
    }
}
