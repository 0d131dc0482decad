//! Command registry — command name to handler, with help metadata.

use std::collections::HashMap;
use std::sync::Arc;

use crate::commands::{Handler, HandlerContext, HandlerResult};
use crate::error::{CommandError, UnknownCommand};

/// Owner recorded for commands registered by the core.
pub const CORE_OWNER: &str = "core";

/// A command a plugin (or the core) wants registered.
#[derive(Clone)]
pub struct CommandBinding {
    /// Name without the prefix, e.g. `today`.
    pub name: String,
    pub help: String,
    pub handler: Arc<dyn Handler>,
}

impl CommandBinding {
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            handler,
        }
    }
}

impl std::fmt::Debug for CommandBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBinding")
            .field("name", &self.name)
            .field("help", &self.help)
            .finish()
    }
}

struct RegisteredCommand {
    owner: String,
    binding: CommandBinding,
}

/// Registry of commands, matched case-sensitively.
///
/// Names are unique for the lifetime of the registry. Registration order is
/// kept for help listings.
#[derive(Default)]
pub struct CommandRegistry {
    commands: Vec<RegisteredCommand>,
    index: HashMap<String, usize>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a core command.
    pub fn register(
        &mut self,
        name: &str,
        handler: Arc<dyn Handler>,
        help_text: &str,
    ) -> Result<(), CommandError> {
        self.register_binding(CORE_OWNER, CommandBinding::new(name, help_text, handler))
    }

    /// Register a binding on behalf of `owner`.
    pub fn register_binding(
        &mut self,
        owner: &str,
        binding: CommandBinding,
    ) -> Result<(), CommandError> {
        self.check_available(&binding.name)?;
        tracing::debug!(command = %binding.name, owner, "Registered command");
        self.index
            .insert(binding.name.clone(), self.commands.len());
        self.commands.push(RegisteredCommand {
            owner: owner.to_string(),
            binding,
        });
        Ok(())
    }

    /// Whether `name` is a valid, not yet registered command name.
    pub fn check_available(&self, name: &str) -> Result<(), CommandError> {
        if !is_valid_name(name) {
            return Err(CommandError::InvalidName {
                name: name.to_string(),
            });
        }
        if self.index.contains_key(name) {
            return Err(CommandError::Duplicate {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Who registered `name`.
    pub fn owner(&self, name: &str) -> Option<&str> {
        self.index
            .get(name)
            .map(|&i| self.commands[i].owner.as_str())
    }

    /// Run the handler registered under `name`.
    pub async fn dispatch(
        &self,
        name: &str,
        ctx: &HandlerContext<'_>,
    ) -> Result<HandlerResult, UnknownCommand> {
        let Some(&i) = self.index.get(name) else {
            return Err(UnknownCommand {
                name: name.to_string(),
            });
        };
        let handler = Arc::clone(&self.commands[i].binding.handler);
        Ok(handler.handle(ctx).await)
    }

    /// `(name, help)` pairs in registration order.
    pub fn help_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.commands
            .iter()
            .map(|c| (c.binding.name.as_str(), c.binding.help.as_str()))
    }

    /// `(name, help)` pairs registered by one owner.
    pub fn help_entries_for<'a>(
        &'a self,
        owner: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.commands
            .iter()
            .filter(move |c| c.owner == owner)
            .map(|c| (c.binding.name.as_str(), c.binding.help.as_str()))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Command names follow the Telegram command alphabet.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 32
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Mode;
    use crate::pipeline::types::InboundMessage;
    use async_trait::async_trait;

    struct EchoHandler(&'static str);

    #[async_trait]
    impl Handler for EchoHandler {
        async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
            Ok(format!("{}:{}", self.0, ctx.args))
        }
    }

    fn handler(tag: &'static str) -> Arc<dyn Handler> {
        Arc::new(EchoHandler(tag))
    }

    #[tokio::test]
    async fn test_register_and_dispatch() {
        let mut registry = CommandRegistry::new();
        registry.register("today", handler("today"), "Hours today").unwrap();

        let msg = InboundMessage::new("cli", "42", "/today please");
        let ctx = HandlerContext::new(&msg, "please", Mode::Test);
        let reply = registry.dispatch("today", &ctx).await.unwrap().unwrap();
        assert_eq!(reply, "today:please");
    }

    #[tokio::test]
    async fn test_dispatch_unknown() {
        let registry = CommandRegistry::new();
        let msg = InboundMessage::new("cli", "42", "/nope");
        let ctx = HandlerContext::new(&msg, "", Mode::Test);
        let err = registry.dispatch("nope", &ctx).await.unwrap_err();
        assert_eq!(err.name, "nope");
    }

    #[test]
    fn test_names_are_case_sensitive_and_unique() {
        let mut registry = CommandRegistry::new();
        registry.register("mode", handler("a"), "").unwrap();
        registry.register("Mode", handler("b"), "").unwrap();
        let err = registry.register("mode", handler("c"), "").unwrap_err();
        assert!(matches!(err, CommandError::Duplicate { .. }));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut registry = CommandRegistry::new();
        for bad in ["", "two words", "/help", "dash-ed"] {
            assert!(matches!(
                registry.register(bad, handler("x"), ""),
                Err(CommandError::InvalidName { .. })
            ));
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_help_keeps_registration_order() {
        let mut registry = CommandRegistry::new();
        registry.register("start", handler("a"), "Start").unwrap();
        registry.register("help", handler("b"), "Help").unwrap();
        registry
            .register_binding("summary", CommandBinding::new("week", "Week", handler("c")))
            .unwrap();

        let names: Vec<_> = registry.help_entries().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["start", "help", "week"]);

        let plugin: Vec<_> = registry.help_entries_for("summary").collect();
        assert_eq!(plugin, vec![("week", "Week")]);
        assert_eq!(registry.owner("start"), Some(CORE_OWNER));
    }
}
