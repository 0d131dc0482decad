//! Error types for Bramify.

use std::time::Duration;

/// Top-level error type for the assistant.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("No channel registered under {name}")]
    UnknownChannel { name: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RequestFailed { .. } | Self::RateLimited { .. })
    }
}

/// Structured extraction errors.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Model response does not match the intent schema: {0}")]
    MalformedResponse(String),

    #[error("Language model unavailable: {0}")]
    TransportFailure(#[from] LlmError),

    #[error("Confidence {confidence:.2} below threshold {threshold:.2}")]
    LowConfidence { confidence: f32, threshold: f32 },

    #[error("Extraction timed out after {0:?}")]
    Timeout(Duration),
}

/// Storage gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage transport failure: {0}")]
    TransportFailure(String),

    #[error("Storage rejected the request: {0}")]
    Rejected(String),

    #[error("Storage call timed out after {0:?}")]
    Timeout(Duration),
}

impl StorageError {
    /// Transport failures are the only retryable storage errors.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransportFailure(_))
    }
}

/// Command registry errors.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Command {name} is already registered")]
    Duplicate { name: String },

    #[error("Invalid command name: {name:?}")]
    InvalidName { name: String },

    #[error("Invalid message pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Dispatch target that no one registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown command: {name}")]
pub struct UnknownCommand {
    pub name: String,
}

/// Errors raised by command and message handlers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The user's input could not be acted on; the message is shown verbatim.
    #[error("{0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Handler failed: {0}")]
    Failed(String),
}

/// Plugin lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin {plugin} failed to initialize: {reason}")]
    InitFailed { plugin: String, reason: String },

    #[error("Plugin {plugin} command {command} collides with an existing command")]
    CommandConflict { plugin: String, command: String },

    #[error("Plugin {plugin} registration failed: {source}")]
    Registration {
        plugin: String,
        #[source]
        source: CommandError,
    },

    #[error("Plugin {plugin} failed to shut down: {reason}")]
    ShutdownFailed { plugin: String, reason: String },
}

/// Result type alias for the assistant.
pub type Result<T> = std::result::Result<T, Error>;
