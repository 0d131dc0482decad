//! Command registry, message router and the built-in commands.
//!
//! Both the registry and the router dispatch to [`Handler`]s. A handler gets
//! the inbound message, the argument text and the mode snapshot taken for
//! this invocation, and returns the reply text.

pub mod builtin;
pub mod registry;
pub mod router;

pub use registry::{CommandBinding, CommandRegistry};
pub use router::{MessageBinding, MessageRouter, RouteOutcome};

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::mode::Mode;
use crate::pipeline::types::InboundMessage;

/// Command prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "/";

/// Reply text or a handler failure.
pub type HandlerResult = Result<String, HandlerError>;

/// Everything a handler sees for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    pub message: &'a InboundMessage,
    /// Text after the command name, trimmed. Whole text for message bindings.
    pub args: &'a str,
    /// Mode read once at the start of the invocation.
    pub mode: Mode,
    /// Command prefix in use; replies that mention commands must use it.
    pub prefix: &'a str,
}

impl<'a> HandlerContext<'a> {
    pub fn new(message: &'a InboundMessage, args: &'a str, mode: Mode) -> Self {
        Self {
            message,
            args,
            mode,
            prefix: DEFAULT_PREFIX,
        }
    }

    pub fn with_prefix(mut self, prefix: &'a str) -> Self {
        self.prefix = prefix;
        self
    }
}

/// A command or message handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult;
}

/// Split `/name@bot rest of line` into `("name", "rest of line")`.
///
/// Returns `None` when `text` does not start with `prefix` or the name is
/// empty.
pub fn parse_command<'a>(text: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    let rest = text.trim_start().strip_prefix(prefix)?;
    let (head, args) = match rest.find(char::is_whitespace) {
        Some(i) => (&rest[..i], rest[i..].trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head);
    if name.is_empty() {
        return None;
    }
    Some((name, args))
}
