use std::collections::HashMap;

use tracing::warn;

use crate::tool::{ArgSpec, Plugin, ToolHandler};

/// Flattened, invocable view of one tool.  `id` is `<plugin>.<tool>` and is
/// the registry key.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub id: String,
    pub plugin: String,
    pub tool: String,
    pub description: String,
    pub arguments: Vec<ArgSpec>,
    pub handler: ToolHandler,
}

/// Flatten a plugin snapshot into the id → descriptor map.
///
/// Pure function, called at the start of every orchestrator invocation rather
/// than cached, so hot-reloaded plugins are always visible.  Id collisions
/// resolve last-write-wins; the shadowing is logged so it is at least
/// observable.
pub fn build_registry(plugins: &[Plugin]) -> HashMap<String, ToolDescriptor> {
    let mut registry = HashMap::new();
    for plugin in plugins {
        for (tool_name, tool) in &plugin.tools {
            let id = format!("{}.{}", plugin.name, tool_name);
            let descriptor = ToolDescriptor {
                id: id.clone(),
                plugin: plugin.name.clone(),
                tool: tool_name.clone(),
                description: tool.description.clone(),
                arguments: tool.arguments.clone(),
                handler: tool.handler.clone(),
            };
            if let Some(previous) = registry.insert(id.clone(), descriptor) {
                warn!(
                    id = %id,
                    shadowed = %previous.plugin,
                    by = %plugin.name,
                    "tool id collision; later-loaded plugin wins"
                );
            }
        }
    }
    registry
}

// ── Tests ────────────────────────────────────────────────────────────────────
