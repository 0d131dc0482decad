//! Pluggable feature modules.
//!
//! A plugin is built from shared [`PluginDeps`], initialized once, asked for
//! its command and message bindings, and shut down once at teardown. The
//! [`PluginManager`] owns every plugin instance for its whole lifetime.

pub mod manager;
pub mod reminder;
pub mod summary;

pub use manager::{LoadReport, PluginFailure, PluginManager};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::FixedOffset;

use crate::commands::{CommandBinding, MessageBinding};
use crate::error::PluginError;
use crate::extract::StructuredExtractor;
use crate::notify::Notifier;
use crate::storage::StorageGateway;

/// Shared services injected into every plugin.
#[derive(Clone)]
pub struct PluginDeps {
    pub extractor: Arc<StructuredExtractor>,
    pub storage: Arc<dyn StorageGateway>,
    pub notifier: Notifier,
    /// The user's timezone; "today" is computed in it.
    pub timezone: FixedOffset,
    /// Where the reminder plugin persists reminders. `None` keeps them in memory.
    pub reminders_path: Option<PathBuf>,
    /// How often due reminders are checked.
    pub reminder_check_interval: Duration,
    /// Command prefix shown in help and usage text.
    pub command_prefix: String,
}

/// A feature module contributing commands and message handlers.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Display name.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Called once before any binding is registered. Failure excludes the plugin.
    async fn initialize(&mut self) -> Result<(), PluginError>;

    /// Commands to register.
    fn commands(&self) -> Vec<CommandBinding>;

    /// Message-pattern handlers to register, in priority order.
    fn message_bindings(&self) -> Vec<MessageBinding> {
        Vec::new()
    }

    /// Help block shown by `/help`.
    fn help(&self) -> String;

    /// Called exactly once at teardown, or right after a rejected registration.
    async fn shutdown(&mut self) -> Result<(), PluginError>;
}

/// Builds a plugin from shared dependencies.
pub type PluginFactory = Box<dyn Fn(&PluginDeps) -> Box<dyn Plugin> + Send + Sync>;

/// Compile-time entry in the plugin list.
pub struct PluginDescriptor {
    /// Stable id used in logs, the load report and [`PluginManager::get`].
    pub id: &'static str,
    pub build: PluginFactory,
}

impl PluginDescriptor {
    pub fn new(
        id: &'static str,
        build: impl Fn(&PluginDeps) -> Box<dyn Plugin> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            build: Box::new(build),
        }
    }
}

/// The plugins shipped with the assistant, in load order.
pub fn builtin_plugins() -> Vec<PluginDescriptor> {
    vec![
        PluginDescriptor::new(summary::PLUGIN_ID, |deps| -> Box<dyn Plugin> {
            Box::new(summary::SummaryPlugin::new(deps))
        }),
        PluginDescriptor::new(reminder::PLUGIN_ID, |deps| -> Box<dyn Plugin> {
            Box::new(reminder::ReminderPlugin::new(deps))
        }),
    ]
}
