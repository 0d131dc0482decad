//! Message router — pattern-matched handlers for messages without a command.
//!
//! Bindings are evaluated in registration order and the first match wins, so
//! plugin load order decides ties. Patterns are compiled once at
//! registration.

use std::sync::Arc;

use regex::Regex;

use crate::commands::{DEFAULT_PREFIX, Handler, HandlerContext, HandlerResult};
use crate::error::CommandError;
use crate::mode::Mode;
use crate::pipeline::types::InboundMessage;

/// Arbitrary message predicate.
pub type Predicate = Arc<dyn Fn(&InboundMessage) -> bool + Send + Sync>;

/// How a binding decides whether it applies.
#[derive(Clone)]
pub enum Matcher {
    /// Regex searched in the message text.
    Pattern(String),
    Predicate(Predicate),
}

/// A message handler a plugin wants routed.
#[derive(Clone)]
pub struct MessageBinding {
    pub matcher: Matcher,
    pub handler: Arc<dyn Handler>,
}

impl MessageBinding {
    pub fn pattern(pattern: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            matcher: Matcher::Pattern(pattern.into()),
            handler,
        }
    }

    pub fn predicate(
        predicate: impl Fn(&InboundMessage) -> bool + Send + Sync + 'static,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            matcher: Matcher::Predicate(Arc::new(predicate)),
            handler,
        }
    }

    /// Human-readable matcher description for logs.
    pub fn describe(&self) -> String {
        match self.matcher {
            Matcher::Pattern(ref p) => format!("pattern {p}"),
            Matcher::Predicate(_) => "predicate".to_string(),
        }
    }
}

enum CompiledMatcher {
    Regex(Regex),
    Predicate(Predicate),
}

impl CompiledMatcher {
    fn matches(&self, message: &InboundMessage) -> bool {
        match self {
            Self::Regex(re) => re.is_match(&message.text),
            Self::Predicate(p) => p(message),
        }
    }
}

/// A binding whose pattern has been compiled, ready to be added.
pub struct CompiledBinding {
    owner: String,
    matcher: CompiledMatcher,
    handler: Arc<dyn Handler>,
}

/// What routing produced.
#[derive(Debug)]
pub enum RouteOutcome {
    /// A binding matched and its handler ran.
    Handled { owner: String, result: HandlerResult },
    /// Nothing matched; fall through to extraction.
    NoMatch,
}

/// Ordered list of message bindings.
pub struct MessageRouter {
    bindings: Vec<CompiledBinding>,
    /// Command prefix handed to handlers.
    prefix: String,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self {
            bindings: Vec::new(),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Compile a binding without adding it.
    pub fn compile(owner: &str, binding: MessageBinding) -> Result<CompiledBinding, CommandError> {
        let matcher = match binding.matcher {
            Matcher::Pattern(pattern) => match Regex::new(&pattern) {
                Ok(re) => CompiledMatcher::Regex(re),
                Err(source) => return Err(CommandError::InvalidPattern { pattern, source }),
            },
            Matcher::Predicate(p) => CompiledMatcher::Predicate(p),
        };
        Ok(CompiledBinding {
            owner: owner.to_string(),
            matcher,
            handler: binding.handler,
        })
    }

    /// Register a predicate handler owned by the core.
    pub fn register(
        &mut self,
        predicate: impl Fn(&InboundMessage) -> bool + Send + Sync + 'static,
        handler: Arc<dyn Handler>,
    ) {
        self.bindings.push(CompiledBinding {
            owner: crate::commands::registry::CORE_OWNER.to_string(),
            matcher: CompiledMatcher::Predicate(Arc::new(predicate)),
            handler,
        });
    }

    /// Compile and register a binding on behalf of `owner`.
    pub fn register_binding(
        &mut self,
        owner: &str,
        binding: MessageBinding,
    ) -> Result<(), CommandError> {
        let compiled = Self::compile(owner, binding)?;
        self.add(compiled);
        Ok(())
    }

    /// Add a binding compiled earlier.
    pub fn add(&mut self, binding: CompiledBinding) {
        tracing::debug!(owner = %binding.owner, position = self.bindings.len(), "Registered message binding");
        self.bindings.push(binding);
    }

    /// Run the first binding whose matcher accepts `message`.
    pub async fn route(&self, message: &InboundMessage, mode: Mode) -> RouteOutcome {
        let Some(binding) = self.bindings.iter().find(|b| b.matcher.matches(message)) else {
            return RouteOutcome::NoMatch;
        };
        let ctx = HandlerContext::new(message, message.text.trim(), mode).with_prefix(&self.prefix);
        let result = binding.handler.handle(&ctx).await;
        RouteOutcome::Handled {
            owner: binding.owner.clone(),
            result,
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
