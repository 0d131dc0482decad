//! Built-in commands: greeting, help and the mode switches.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::commands::{CommandRegistry, Handler, HandlerContext, HandlerResult};
use crate::error::CommandError;
use crate::mode::{Mode, ModeController};

/// Help catalog, filled in once every plugin has been loaded.
pub type HelpCatalog = Arc<OnceLock<String>>;

struct StartHandler;

#[async_trait]
impl Handler for StartHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        Ok(format!(
            "Hello {}! I'm Bramify, your personal assistant for hour registration.\n\n\
             Tell me what you worked on, e.g. \"Worked 3 hours on the report today\", \
             or use {}help to see the available commands.",
            ctx.message.display_name(),
            ctx.prefix
        ))
    }
}

struct HelpHandler {
    catalog: HelpCatalog,
}

#[async_trait]
impl Handler for HelpHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        let catalog = self.catalog.get().map(String::as_str).unwrap_or("");
        Ok(format!("{catalog}\n\n{}", describe_mode(ctx.mode)))
    }
}

struct SetModeHandler {
    target: Mode,
    modes: Arc<ModeController>,
}

#[async_trait]
impl Handler for SetModeHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        let previous = self.modes.set_mode(self.target);
        if previous == self.target {
            return Ok(format!("Already in {} mode.", self.target));
        }
        let prefix = ctx.prefix;
        Ok(match self.target {
            Mode::Production => format!(
                "Production mode enabled. Your work hours will now be saved to \
                 the actual sheet. Use {prefix}test_mode to switch back."
            ),
            Mode::Test => format!(
                "Test mode enabled. Your work hours will be saved to a test sheet \
                 for validation. Use {prefix}enable_production when ready."
            ),
        })
    }
}

struct ShowModeHandler;

#[async_trait]
impl Handler for ShowModeHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> HandlerResult {
        Ok(describe_mode(ctx.mode))
    }
}

fn describe_mode(mode: Mode) -> String {
    match mode {
        Mode::Test => "Current mode: test (data goes to the test sheet)".to_string(),
        Mode::Production => "Current mode: production (data goes to the actual sheet)".to_string(),
    }
}

/// Register `/start`, `/help`, `/test_mode`, `/enable_production` and `/mode`.
pub fn register_builtins(
    registry: &mut CommandRegistry,
    modes: Arc<ModeController>,
    catalog: HelpCatalog,
) -> Result<(), CommandError> {
    registry.register("start", Arc::new(StartHandler), "Start interacting with the bot")?;
    registry.register("help", Arc::new(HelpHandler { catalog }), "Show this help message")?;
    registry.register(
        "test_mode",
        Arc::new(SetModeHandler {
            target: Mode::Test,
            modes: Arc::clone(&modes),
        }),
        "Write hours to the test sheet only",
    )?;
    registry.register(
        "enable_production",
        Arc::new(SetModeHandler {
            target: Mode::Production,
            modes,
        }),
        "Write hours to the actual sheet",
    )?;
    registry.register("mode", Arc::new(ShowModeHandler), "Show the current mode")?;
    Ok(())
}

/// Render the help catalog from the core commands and plugin help blocks.
pub fn build_help_catalog(
    prefix: &str,
    registry: &CommandRegistry,
    plugin_help: &str,
) -> String {
    let mut out = String::from("*Bramify Help*\n\n*Core Commands:*\n");
    for (name, help) in registry.help_entries_for(crate::commands::registry::CORE_OWNER) {
        out.push_str(&format!("{prefix}{name} - {help}\n"));
    }
    out.push_str(
        "\n*Hour Registration:*\nJust tell me what you worked on and I'll register your hours. \
         For example: \"Today I worked on Project X for Client Y for 4 hours.\"",
    );
    if !plugin_help.is_empty() {
        out.push_str("\n\n");
        out.push_str(plugin_help.trim_end());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::InboundMessage;

    fn setup() -> (CommandRegistry, Arc<ModeController>, HelpCatalog) {
        let mut registry = CommandRegistry::new();
        let modes = Arc::new(ModeController::new(Mode::Test));
        let catalog: HelpCatalog = Arc::new(OnceLock::new());
        register_builtins(&mut registry, Arc::clone(&modes), Arc::clone(&catalog)).unwrap();
        (registry, modes, catalog)
    }

    async fn run(registry: &CommandRegistry, modes: &ModeController, name: &str) -> String {
        let msg = InboundMessage::new("cli", "42", format!("/{name}")).with_sender_name("Sam");
        let ctx = HandlerContext::new(&msg, "", modes.get_mode());
        registry.dispatch(name, &ctx).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn mode_switches_are_idempotent() {
        let (registry, modes, _) = setup();

        let reply = run(&registry, &modes, "enable_production").await;
        assert!(reply.contains("Production mode enabled"));
        assert_eq!(modes.get_mode(), Mode::Production);

        let reply = run(&registry, &modes, "enable_production").await;
        assert!(reply.contains("Already in production"));
        assert_eq!(modes.get_mode(), Mode::Production);

        run(&registry, &modes, "test_mode").await;
        assert_eq!(modes.get_mode(), Mode::Test);
        assert!(run(&registry, &modes, "mode").await.contains("test"));
    }

    #[tokio::test]
    async fn help_lists_core_commands_and_mode() {
        let (registry, modes, catalog) = setup();
        catalog
            .set(build_help_catalog("/", &registry, "*Summary*\n/today - Hours today"))
            .unwrap();

        let reply = run(&registry, &modes, "help").await;
        assert!(reply.contains("/start - Start interacting"));
        assert!(reply.contains("/enable_production"));
        assert!(reply.contains("/today - Hours today"));
        assert!(reply.ends_with("Current mode: test (data goes to the test sheet)"));
    }

    #[tokio::test]
    async fn start_greets_by_name() {
        let (registry, modes, _) = setup();
        assert!(run(&registry, &modes, "start").await.starts_with("Hello Sam!"));
    }

    #[tokio::test]
    async fn replies_name_commands_with_configured_prefix() {
        let (registry, modes, _) = setup();
        let msg = InboundMessage::new("cli", "42", "!start").with_sender_name("Sam");

        let ctx = HandlerContext::new(&msg, "", modes.get_mode()).with_prefix("!");
        let start = registry.dispatch("start", &ctx).await.unwrap().unwrap();
        assert!(start.contains("use !help"), "{start}");

        let production = registry
            .dispatch("enable_production", &ctx)
            .await
            .unwrap()
            .unwrap();
        assert!(production.contains("Use !test_mode"), "{production}");
        assert!(!production.contains('/'));
    }

    #[test]
    fn builtins_cannot_register_twice() {
        let (mut registry, modes, catalog) = setup();
        assert!(matches!(
            register_builtins(&mut registry, modes, catalog),
            Err(CommandError::Duplicate { .. })
        ));
    }
}
