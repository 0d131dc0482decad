//! Shared types for the message processing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::extract::Action;
use crate::storage::RowRef;

// ── Inbound message ─────────────────────────────────────────────────

/// Unified inbound message from any channel.
///
/// Channel adapters convert their native format into this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique ID (channel-native or generated UUID).
    pub id: String,
    /// Source channel: "telegram", "cli", etc.
    pub channel: String,
    /// Stable sender identifier checked against the allow-list.
    pub sender_id: String,
    /// Human-readable sender name (if available).
    pub sender_name: Option<String>,
    /// Message text.
    pub text: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
    /// Channel-specific metadata for replying (chat IDs, etc.).
    pub metadata: serde_json::Value,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel: channel.into(),
            sender_id: sender_id.into(),
            sender_name: None,
            text: text.into(),
            received_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Name to greet the sender with.
    pub fn display_name(&self) -> &str {
        self.sender_name.as_deref().unwrap_or(&self.sender_id)
    }
}

// ── Pipeline state ──────────────────────────────────────────────────

/// Steps of one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Authorizing,
    Commanding,
    Routing,
    Extracting,
    Persisting,
    Replying,
    Done,
    Error,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Authorizing => "authorizing",
            Self::Commanding => "commanding",
            Self::Routing => "routing",
            Self::Extracting => "extracting",
            Self::Persisting => "persisting",
            Self::Replying => "replying",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

/// Which path a message took through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Sender not on the allow-list.
    Denied,
    /// Dispatched to a registered command.
    Command { name: String },
    /// Command prefix with a name nobody registered.
    UnknownCommand { name: String },
    /// Handled by a message-pattern binding.
    Message,
    /// Fell through to the structured extractor.
    Extraction { action: Option<Action> },
}

/// Terminal result of one invocation. There is always exactly one reply.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub reply: String,
    pub route: Route,
    /// `Done` or `Error`.
    pub stage: Stage,
    /// Set when an hour entry was written.
    pub row: Option<RowRef>,
}

impl PipelineOutcome {
    pub fn is_error(&self) -> bool {
        self.stage == Stage::Error
    }
}
