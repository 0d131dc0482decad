//! CLI channel — stdin/stdout REPL for local testing.

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{Channel, MessageStream};
use crate::error::ChannelError;
use crate::pipeline::InboundMessage;

/// Reads lines from stdin as messages from a single local user.
pub struct CliChannel {
    user_id: String,
}

impl CliChannel {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new("local-user")
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let user_id = self.user_id.clone();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            eprint!("> ");
                            continue;
                        }
                        let msg = InboundMessage::new("cli", user_id.as_str(), line)
                            .with_sender_name(user_id.as_str());
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(&self, _msg: &InboundMessage, text: &str) -> Result<(), ChannelError> {
        println!("\n{}\n", text);
        eprint!("> ");
        Ok(())
    }

    async fn deliver(&self, _metadata: &serde_json::Value, text: &str) -> Result<(), ChannelError> {
        println!("\n{}\n", text);
        eprint!("> ");
        Ok(())
    }
}
