//! External agent/tool discovery.
//!
//! The MCP-style protocol client is an external collaborator: this module
//! only fixes its interface. An [`AgentRegistry`] contributes additional
//! agents at plan time; a [`ToolDiscovery`] client serves an agent's remote
//! tool schemas and executes calls. [`RemoteTool`] adapts a discovered
//! schema into the local [`ToolDyn`] shape.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::context::{AbortSignal, AgentContext};
use crate::error::Result;
use crate::message::{ToolCallPart, ToolResult};
use crate::tool::{FunctionTool, ToolDyn};

/// A remotely discovered agent.
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    /// Agent name.
    pub name: String,
    /// Agent description.
    pub description: String,
    /// Opaque extra info forwarded with every tool call.
    pub ext_info: Option<Value>,
}

/// Discovers additional agents for a task prompt.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// List agents relevant to the given task prompt.
    async fn list_agents(&self, task_prompt: &str) -> Result<Vec<AgentDescriptor>>;

    /// The tool client used by agents created from this registry.
    fn tool_client(&self) -> Arc<dyn ToolDiscovery>;
}

/// Serves remote tool schemas and executes remote calls.
#[async_trait]
pub trait ToolDiscovery: Send + Sync {
    /// Fetch the current tool schemas.
    async fn list_tools(&self, params: &Value, signal: &AbortSignal) -> Result<Vec<FunctionTool>>;

    /// Execute a remote tool call.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        ext_info: Option<&Value>,
        signal: &AbortSignal,
    ) -> Result<ToolResult>;
}

/// A remote tool schema adapted into the local tool shape.
pub struct RemoteTool {
    schema: FunctionTool,
    client: Arc<dyn ToolDiscovery>,
    ext_info: Option<Value>,
}

impl std::fmt::Debug for RemoteTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTool")
            .field("name", &self.schema.name)
            .finish_non_exhaustive()
    }
}

impl RemoteTool {
    /// Wrap a discovered schema.
    #[must_use]
    pub const fn new(
        schema: FunctionTool,
        client: Arc<dyn ToolDiscovery>,
        ext_info: Option<Value>,
    ) -> Self {
        Self {
            schema,
            client,
            ext_info,
        }
    }
}

impl ToolDyn for RemoteTool {
    fn name(&self) -> String {
        self.schema.name.clone()
    }

    fn description(&self) -> String {
        self.schema.description.clone()
    }

    fn parameters(&self) -> Value {
        self.schema.input_schema.clone()
    }

    fn execute<'a>(
        &'a self,
        args: Value,
        ctx: &'a AgentContext,
        _call: &'a ToolCallPart,
    ) -> BoxFuture<'a, Result<ToolResult>> {
        Box::pin(async move {
            let signal = ctx.task().signal();
            self.client
                .call_tool(&self.schema.name, args, self.ext_info.as_ref(), &signal)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_tool_exposes_schema() {
        struct Never;

        #[async_trait]
        impl ToolDiscovery for Never {
            async fn list_tools(
                &self,
                _params: &Value,
                _signal: &AbortSignal,
            ) -> Result<Vec<FunctionTool>> {
                Ok(vec![])
            }
            async fn call_tool(
                &self,
                _name: &str,
                _arguments: Value,
                _ext_info: Option<&Value>,
                _signal: &AbortSignal,
            ) -> Result<ToolResult> {
                Ok(ToolResult::text("remote"))
            }
        }

        let schema = FunctionTool::new("browse", "Browse a page", serde_json::json!({}));
        let tool = RemoteTool::new(schema, Arc::new(Never), None);
        assert_eq!(tool.name(), "browse");
        assert!(!tool.support_parallel_calls());
    }
}
