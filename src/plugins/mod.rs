//! Built-in plugin types

pub mod reminder;

use tidings_core::PluginRegistry;

/// Registry holding every built-in plugin type
pub fn registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register(reminder::PLUGIN_TYPE, reminder::create);
    registry
}
