//! Agents: named units bundling tools, capabilities, and a model policy.
//!
//! The [`Agent`] trait is the seam hosts implement (or configure through
//! [`BaseAgent`]); [`run`] drives an agent through the ReAct loop using the
//! streaming turn engine in [`turn`] and the dispatcher in [`dispatch`].

mod dispatch;
mod prompt;
mod run;
pub(crate) mod turn;

pub use run::run_agent;
pub use turn::{TurnOptions, call_model};

use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::Capability;
use crate::discovery::ToolDiscovery;
use crate::tool::BoxedTool;

/// A named unit with a toolset, model policy, and prompt-building logic.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The agent name, referenced by workflow nodes.
    fn name(&self) -> &str;

    /// What this agent does; used in planning and system prompts.
    fn description(&self) -> &str;

    /// The agent's own tools.
    fn tools(&self) -> Vec<BoxedTool>;

    /// Capabilities mixed into this agent.
    fn capabilities(&self) -> Vec<Arc<dyn Capability>> {
        Vec::new()
    }

    /// Model policy name resolved against the provider set; `None` uses the
    /// default provider.
    fn llm(&self) -> Option<&str> {
        None
    }

    /// A persisted base system prompt. When present it is used instead of a
    /// freshly built prompt, with capability guides appended.
    fn base_system_prompt(&self) -> Option<String> {
        None
    }

    /// External tool client serving this agent's remote tools, if any.
    fn tool_discovery(&self) -> Option<Arc<dyn ToolDiscovery>> {
        None
    }

    /// Opaque info forwarded with remote tool calls.
    fn ext_info(&self) -> Option<serde_json::Value> {
        None
    }

    /// Whether remote tool schemas should be refreshed on this iteration.
    /// The default fetches once, at the start of the run.
    fn refresh_remote_tools(&self, iteration: usize) -> bool {
        iteration == 0
    }

    /// Whether this agent allows concurrent tool dispatch at all.
    fn can_parallel_tool_calls(&self) -> bool {
        true
    }

    /// Task status notification (e.g. `"abort"`).
    async fn on_task_status(&self, _status: &str, _reason: Option<&str>) {}
}

/// A configurable [`Agent`] built from parts.
pub struct BaseAgent {
    name: String,
    description: String,
    tools: Vec<BoxedTool>,
    capabilities: Vec<Arc<dyn Capability>>,
    llm: Option<String>,
    base_system_prompt: Option<String>,
    tool_discovery: Option<Arc<dyn ToolDiscovery>>,
    ext_info: Option<serde_json::Value>,
    can_parallel_tool_calls: bool,
}

impl std::fmt::Debug for BaseAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseAgent")
            .field("name", &self.name)
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

impl BaseAgent {
    /// Create an agent with a name and description.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tools: Vec::new(),
            capabilities: Vec::new(),
            llm: None,
            base_system_prompt: None,
            tool_discovery: None,
            ext_info: None,
            can_parallel_tool_calls: true,
        }
    }

    /// Add a tool.
    #[must_use]
    pub fn with_tool(mut self, tool: BoxedTool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add several tools.
    #[must_use]
    pub fn with_tools(mut self, tools: impl IntoIterator<Item = BoxedTool>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Add a capability.
    #[must_use]
    pub fn with_capability(mut self, capability: Arc<dyn Capability>) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Select a model policy by provider name.
    #[must_use]
    pub fn with_llm(mut self, llm: impl Into<String>) -> Self {
        self.llm = Some(llm.into());
        self
    }

    /// Use a persisted system prompt instead of the built one.
    #[must_use]
    pub fn with_base_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_system_prompt = Some(prompt.into());
        self
    }

    /// Attach an external tool client.
    #[must_use]
    pub fn with_tool_discovery(
        mut self,
        client: Arc<dyn ToolDiscovery>,
        ext_info: Option<serde_json::Value>,
    ) -> Self {
        self.tool_discovery = Some(client);
        self.ext_info = ext_info;
        self
    }

    /// Forbid concurrent tool dispatch for this agent.
    #[must_use]
    pub const fn serial_tool_calls(mut self) -> Self {
        self.can_parallel_tool_calls = false;
        self
    }
}

#[async_trait]
impl Agent for BaseAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn tools(&self) -> Vec<BoxedTool> {
        self.tools.clone()
    }

    fn capabilities(&self) -> Vec<Arc<dyn Capability>> {
        self.capabilities.clone()
    }

    fn llm(&self) -> Option<&str> {
        self.llm.as_deref()
    }

    fn base_system_prompt(&self) -> Option<String> {
        self.base_system_prompt.clone()
    }

    fn tool_discovery(&self) -> Option<Arc<dyn ToolDiscovery>> {
        self.tool_discovery.clone()
    }

    fn ext_info(&self) -> Option<serde_json::Value> {
        self.ext_info.clone()
    }

    fn can_parallel_tool_calls(&self) -> bool {
        self.can_parallel_tool_calls
    }
}
