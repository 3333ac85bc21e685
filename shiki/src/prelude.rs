//! Convenient re-exports for common usage.

pub use crate::agent::{Agent, BaseAgent};
pub use crate::callback::{CallbackEvent, CallbackMessage, CompositeCallback, NoopCallback, TaskCallback};
pub use crate::capability::{Capability, CapabilityRegistry, StaticCapability};
pub use crate::chain::{AgentChain, TaskChain, ToolChain};
pub use crate::config::Config;
pub use crate::context::{AgentContext, TaskContext};
pub use crate::discovery::{AgentDescriptor, AgentRegistry, RemoteTool, ToolDiscovery};
pub use crate::error::{Error, Result};
pub use crate::memory::DialogueMemory;
pub use crate::message::{
    ContentPart, Message, ResultContent, Role, ToolCallPart, ToolOutput, ToolResult,
    ToolResultPart,
};
pub use crate::orchestrator::{Orchestrator, TaskResult, TaskStopReason};
pub use crate::provider::{EventStream, MockProvider, Provider, ProviderRequest, ProviderSet, ToolChoice};
pub use crate::stream::{FinishReason, StreamEvent};
pub use crate::tool::{FnTool, FunctionTool, Tool, ToolDyn, ToolSet};
pub use crate::usage::Usage;
pub use crate::workflow::{NodeStatus, Workflow, WorkflowAgent};
pub use crate::workflow_xml::{WorkflowParser, XmlWorkflowParser};
