//! Plugin manager — load, register and tear down plugins.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::commands::{CommandRegistry, MessageRouter};
use crate::error::{CommandError, PluginError};
use crate::plugins::{Plugin, PluginDeps, PluginDescriptor};

/// A plugin that was excluded during loading.
#[derive(Debug)]
pub struct PluginFailure {
    pub id: String,
    pub error: PluginError,
}

/// Outcome of [`PluginManager::load_all`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Ids of plugins that are registered and usable, in load order.
    pub loaded: Vec<String>,
    pub failed: Vec<PluginFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

struct LoadedPlugin {
    id: String,
    plugin: Box<dyn Plugin>,
}

/// Owns every loaded plugin instance.
pub struct PluginManager {
    descriptors: Vec<PluginDescriptor>,
    loaded: Vec<LoadedPlugin>,
}

impl PluginManager {
    pub fn new(descriptors: Vec<PluginDescriptor>) -> Self {
        Self {
            descriptors,
            loaded: Vec::new(),
        }
    }

    /// Build, initialize and register every descriptor in order.
    ///
    /// A plugin whose initialization fails, or whose bindings conflict with
    /// anything already registered, is excluded as a whole and reported;
    /// loading continues with the next descriptor.
    pub async fn load_all(
        &mut self,
        deps: &PluginDeps,
        registry: &mut CommandRegistry,
        router: &mut MessageRouter,
    ) -> LoadReport {
        let mut report = LoadReport::default();

        for descriptor in std::mem::take(&mut self.descriptors) {
            let id = descriptor.id.to_string();
            let mut plugin = (descriptor.build)(deps);

            if let Err(error) = plugin.initialize().await {
                warn!(plugin = %id, error = %error, "Plugin failed to initialize");
                report.failed.push(PluginFailure { id, error });
                continue;
            }

            if let Err(error) = Self::register(&id, plugin.as_ref(), registry, router) {
                warn!(plugin = %id, error = %error, "Plugin rejected");
                if let Err(e) = plugin.shutdown().await {
                    warn!(plugin = %id, error = %e, "Rejected plugin failed to shut down");
                }
                report.failed.push(PluginFailure { id, error });
                continue;
            }

            info!(plugin = %id, name = plugin.name(), "Plugin loaded");
            report.loaded.push(id.clone());
            self.loaded.push(LoadedPlugin { id, plugin });
        }

        report
    }

    /// Check every binding first, then register them all, so a rejected
    /// plugin leaves nothing behind.
    fn register(
        id: &str,
        plugin: &dyn Plugin,
        registry: &mut CommandRegistry,
        router: &mut MessageRouter,
    ) -> Result<(), PluginError> {
        let commands = plugin.commands();
        let mut seen = HashSet::new();
        for binding in &commands {
            let conflict = match registry.check_available(&binding.name) {
                Err(CommandError::Duplicate { .. }) => true,
                Err(source) => {
                    return Err(PluginError::Registration {
                        plugin: id.to_string(),
                        source,
                    });
                }
                Ok(()) => !seen.insert(binding.name.as_str()),
            };
            if conflict {
                return Err(PluginError::CommandConflict {
                    plugin: id.to_string(),
                    command: binding.name.clone(),
                });
            }
        }

        let compiled = plugin
            .message_bindings()
            .into_iter()
            .map(|b| MessageRouter::compile(id, b))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| PluginError::Registration {
                plugin: id.to_string(),
                source,
            })?;

        for binding in commands {
            registry
                .register_binding(id, binding)
                .map_err(|source| PluginError::Registration {
                    plugin: id.to_string(),
                    source,
                })?;
        }
        for binding in compiled {
            router.add(binding);
        }
        debug!(plugin = %id, "Plugin bindings registered");
        Ok(())
    }

    /// Shut down loaded plugins in reverse load order.
    ///
    /// Every plugin is attempted even if an earlier one fails; the first
    /// failure is returned. Calling this twice shuts nothing down twice.
    pub async fn shutdown_all(&mut self) -> Result<(), PluginError> {
        let mut first_error = None;
        while let Some(mut loaded) = self.loaded.pop() {
            match loaded.plugin.shutdown().await {
                Ok(()) => debug!(plugin = %loaded.id, "Plugin shut down"),
                Err(e) => {
                    warn!(plugin = %loaded.id, error = %e, "Plugin shutdown failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Look up a loaded plugin by id.
    pub fn get(&self, id: &str) -> Option<&dyn Plugin> {
        self.loaded
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.plugin.as_ref())
    }

    pub fn loaded_ids(&self) -> Vec<&str> {
        self.loaded.iter().map(|p| p.id.as_str()).collect()
    }

    /// Help blocks of every loaded plugin, in load order.
    pub fn help_text(&self) -> String {
        self.loaded
            .iter()
            .map(|p| p.plugin.help())
            .filter(|h| !h.trim().is_empty())
            .map(|h| h.trim_end().to_string())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
