//! Wiring of the core: registry, built-ins, plugins and the orchestrator.

use std::sync::{Arc, OnceLock};

use crate::commands::builtin::{HelpCatalog, build_help_catalog, register_builtins};
use crate::commands::{CommandRegistry, MessageRouter};
use crate::error::CommandError;
use crate::mode::{Mode, ModeController};
use crate::pipeline::{Orchestrator, PipelineConfig};
use crate::plugins::{LoadReport, PluginDeps, PluginDescriptor, PluginManager};

/// Everything needed to assemble an [`App`].
pub struct AppParts {
    pub pipeline: PipelineConfig,
    pub initial_mode: Mode,
    /// Shared services; the orchestrator uses the same extractor and storage.
    pub deps: PluginDeps,
    pub plugins: Vec<PluginDescriptor>,
}

/// The assembled core.
pub struct App {
    pub orchestrator: Arc<Orchestrator>,
    pub modes: Arc<ModeController>,
    pub plugins: PluginManager,
    /// Which plugins loaded and which were rejected.
    pub load_report: LoadReport,
}

/// Register the built-ins, load every plugin, freeze the help text and
/// build the orchestrator. Fails only if the built-ins cannot register.
pub async fn assemble(parts: AppParts) -> Result<App, CommandError> {
    let modes = Arc::new(ModeController::new(parts.initial_mode));
    let catalog: HelpCatalog = Arc::new(OnceLock::new());

    let mut registry = CommandRegistry::new();
    let mut router = MessageRouter::new().with_prefix(parts.pipeline.command_prefix.clone());
    register_builtins(&mut registry, Arc::clone(&modes), Arc::clone(&catalog))?;

    let mut plugins = PluginManager::new(parts.plugins);
    let load_report = plugins
        .load_all(&parts.deps, &mut registry, &mut router)
        .await;
    for failure in &load_report.failed {
        tracing::error!(plugin = %failure.id, error = %failure.error, "Plugin not loaded");
    }

    let help = build_help_catalog(
        &parts.pipeline.command_prefix,
        &registry,
        &plugins.help_text(),
    );
    // Only set here, right after the catalog was created.
    let _ = catalog.set(help);

    tracing::info!(
        commands = registry.len(),
        message_handlers = router.len(),
        plugins = ?load_report.loaded,
        mode = %modes.get_mode(),
        "Core assembled"
    );

    let orchestrator = Orchestrator::new(
        parts.pipeline,
        Arc::clone(&modes),
        registry,
        router,
        Arc::clone(&parts.deps.extractor),
        Arc::clone(&parts.deps.storage),
    );

    Ok(App {
        orchestrator: Arc::new(orchestrator),
        modes,
        plugins,
        load_report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{AllowList, InboundMessage};
    use crate::plugins::builtin_plugins;
    use crate::test_support::plugin_deps;

    async fn app() -> App {
        assemble(AppParts {
            pipeline: PipelineConfig {
                allow_list: AllowList::everyone(),
                ..PipelineConfig::default()
            },
            initial_mode: Mode::Test,
            deps: plugin_deps(),
            plugins: builtin_plugins(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn loads_builtin_plugins_cleanly() {
        let mut app = app().await;
        assert!(app.load_report.is_clean());
        assert_eq!(app.load_report.loaded, vec!["summary", "reminders"]);
        assert!(app.orchestrator.registry().contains("today"));
        assert!(app.orchestrator.registry().contains("remind"));
        app.plugins.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn help_lists_core_and_plugin_commands() {
        let mut app = app().await;
        let outcome = app
            .orchestrator
            .process(&InboundMessage::new("cli", "42", "/help"))
            .await;
        assert!(outcome.reply.contains("/start"));
        assert!(outcome.reply.contains("/enable_production"));
        assert!(outcome.reply.contains("/today"));
        assert!(outcome.reply.contains("/remind"));
        assert!(outcome.reply.contains("Current mode: test"));
        app.plugins.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn initial_mode_is_applied() {
        let mut app = assemble(AppParts {
            pipeline: PipelineConfig::default(),
            initial_mode: Mode::Production,
            deps: plugin_deps(),
            plugins: Vec::new(),
        })
        .await
        .unwrap();
        assert_eq!(app.modes.get_mode(), Mode::Production);
        app.plugins.shutdown_all().await.unwrap();
    }
}
