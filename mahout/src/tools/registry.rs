//! Central registry mapping tool names to tool objects.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{Tool, ToolSpec};

/// Holds every registered tool by name. Registration may happen after
/// startup (the mind injects its own tools), so the map sits behind a lock.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool; an existing tool with the same name is replaced.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if let Ok(mut tools) = self.tools.write() {
            tools.insert(name, tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().ok().and_then(|t| t.get(name).cloned())
    }

    /// All tool specs, sorted by name for stable prompts.
    pub fn list(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .read()
            .map(|t| t.values().map(|tool| tool.spec()).collect())
            .unwrap_or_default();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.tools.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
