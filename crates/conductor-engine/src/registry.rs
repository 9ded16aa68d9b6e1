use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use conductor_core::tools::{Tool, ToolDefinition};

/// Canonical lookup form of a tool name: trimmed and case-folded.
pub fn normalize_tool_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Registry of invocable tools, keyed by normalized name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration under the same normalized name
    /// replaces the earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = normalize_tool_name(tool.name());
        if self.tools.insert(name, tool).is_some() {
            warn!("tool registered twice, keeping the newer one");
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(&normalize_tool_name(name)).cloned()
    }

    /// Definitions for the named tools, in the order given. Names with no
    /// registered tool are skipped.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| match self.get(name) {
                Some(tool) => Some(tool.to_definition()),
                None => {
                    warn!(tool = %name, "declared tool is not registered");
                    None
                }
            })
            .collect()
    }
}
