//! Tool registry.

use std::sync::Arc;

use super::{BoxedTool, FunctionTool, ToolDyn};

/// An ordered tool registry with first-registered-wins semantics.
///
/// Lookup is linear and case-sensitive. Registering a name that already
/// exists is a no-op, so earlier sources (agent tools) shadow later ones
/// (capability and synthetic tools).
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<BoxedTool>,
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet").field("names", &self.names()).finish()
    }
}

impl ToolSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Number of registered tools.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tools are registered.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Register a tool unless its name is already taken.
    pub fn push(&mut self, tool: BoxedTool) {
        let name = tool.name();
        if self.get(&name).is_none() {
            self.tools.push(tool);
        }
    }

    /// Register every tool from an iterator, earlier names winning.
    pub fn extend(&mut self, tools: impl IntoIterator<Item = BoxedTool>) {
        for tool in tools {
            self.push(tool);
        }
    }

    /// Register a typed tool.
    pub fn push_tool<T: ToolDyn + 'static>(&mut self, tool: T) {
        self.push(Arc::new(tool));
    }

    /// Look up a tool by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// The registered names in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Iterate the registered tools in order.
    pub fn iter(&self) -> impl Iterator<Item = &BoxedTool> {
        self.tools.iter()
    }

    /// Convert every tool to the provider function shape.
    #[must_use]
    pub fn to_schemas(&self) -> Vec<FunctionTool> {
        self.tools
            .iter()
            .map(|t| FunctionTool::from_tool(t.as_ref()))
            .collect()
    }
}

impl FromIterator<BoxedTool> for ToolSet {
    fn from_iter<I: IntoIterator<Item = BoxedTool>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}
