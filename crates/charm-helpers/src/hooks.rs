//! Dispatching hook invocations to their handlers.
//!
//! Juju runs a hook by executing a file named after it (`hooks/config-changed`), usually a
//! symlink to the charm binary. Handlers are registered under their canonical, hyphenated name;
//! `config_changed` and `config-changed` refer to the same hook.
use std::path::Path;

use indexmap::IndexMap;

/// A hook handler operating on some charm state `C`.
pub type Handler<C, E> = fn(&C) -> Result<(), E>;

/// Explicit mapping from canonical hook name to handler.
pub struct Hooks<C, E> {
    handlers: IndexMap<String, Handler<C, E>>,
}

impl<C, E> Default for Hooks<C, E> {
    fn default() -> Self {
        Self {
            handlers: IndexMap::new(),
        }
    }
}

impl<C, E> Hooks<C, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `name`, replacing any earlier registration of the same hook.
    pub fn register(mut self, name: &str, handler: Handler<C, E>) -> Self {
        let name = normalize_hook_name(name);
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::debug!(hook = %name, "replaced previously registered hook handler");
        }
        self
    }

    /// Runs the handler registered for `name`.
    ///
    /// Returns [`None`] if no handler is registered for the hook.
    pub fn execute(&self, name: &str, context: &C) -> Option<Result<(), E>> {
        let name = normalize_hook_name(name);
        let handler = self.handlers.get(&name)?;
        tracing::info!(hook = %name, "running hook");
        Some(handler(context))
    }
}

/// Turns a hook name or the path of a hook executable into the canonical hook name.
pub fn normalize_hook_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|file_name| file_name.to_str())
        .unwrap_or(name)
        .replace('_', "-")
}
