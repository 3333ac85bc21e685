//! The observable event record of a task's execution tree.
//!
//! A task owns a [`TaskChain`]; each agent run appends an [`AgentChain`];
//! each tool call appends a [`ToolChain`]. The tree is append-only except
//! for the mutable result slots. Children hold no references to their
//! parents: when a child is pushed, the parent injects an emitter callback
//! into it, so updates bubble upward without cycles.
//!
//! Every mutation publishes a [`ChainUpdate`] naming the mutated target, and
//! a parent's push event fires before any child event bubbled through it.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use crate::message::{Message, ToolResult};
use crate::provider::ProviderRequest;

/// Callback invoked with every chain update.
pub type ChainListener = Arc<dyn Fn(&ChainUpdate) + Send + Sync>;

type Emitter = Arc<dyn Fn(ChainUpdate) + Send + Sync>;

/// The mutated node of an update event.
#[derive(Clone)]
pub enum ChainTarget {
    /// The task-level chain changed (plan request/result, agent pushed).
    Task,
    /// An agent chain changed.
    Agent(Arc<AgentChain>),
    /// A tool chain changed.
    Tool(Arc<ToolChain>),
}

impl std::fmt::Debug for ChainTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task => f.write_str("Task"),
            Self::Agent(agent) => f.debug_tuple("Agent").field(&agent.agent_name()).finish(),
            Self::Tool(tool) => f.debug_tuple("Tool").field(&tool.tool_name()).finish(),
        }
    }
}

/// A chain update event.
#[derive(Debug, Clone)]
pub struct ChainUpdate {
    /// The mutated node.
    pub target: ChainTarget,
}

/// Event record for a single tool call.
pub struct ToolChain {
    tool_call_id: String,
    tool_name: String,
    params: Mutex<Value>,
    result: Mutex<Option<ToolResult>>,
    emitter: Mutex<Option<Emitter>>,
}

impl std::fmt::Debug for ToolChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolChain")
            .field("tool_call_id", &self.tool_call_id)
            .field("tool_name", &self.tool_name)
            .finish_non_exhaustive()
    }
}

impl ToolChain {
    /// Create a record for one tool call.
    #[must_use]
    pub fn new(tool_call_id: impl Into<String>, tool_name: impl Into<String>, params: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            params: Mutex::new(params),
            result: Mutex::new(None),
            emitter: Mutex::new(None),
        }
    }

    /// The tool call id.
    #[must_use]
    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }

    /// The tool name.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// The parsed call parameters.
    #[must_use]
    pub fn params(&self) -> Value {
        self.params.lock().expect("lock poisoned").clone()
    }

    /// The recorded result, if set.
    #[must_use]
    pub fn result(&self) -> Option<ToolResult> {
        self.result.lock().expect("lock poisoned").clone()
    }

    /// Update the parameters (fires an update).
    pub fn set_params(self: &Arc<Self>, params: Value) {
        *self.params.lock().expect("lock poisoned") = params;
        self.emit();
    }

    /// Record the result (fires an update).
    pub fn set_result(self: &Arc<Self>, result: ToolResult) {
        *self.result.lock().expect("lock poisoned") = Some(result);
        self.emit();
    }

    fn set_emitter(&self, emitter: Emitter) {
        *self.emitter.lock().expect("lock poisoned") = Some(emitter);
    }

    fn emit(self: &Arc<Self>) {
        let emitter = self.emitter.lock().expect("lock poisoned").clone();
        if let Some(emitter) = emitter {
            emitter(ChainUpdate {
                target: ChainTarget::Tool(Arc::clone(self)),
            });
        }
    }

    /// Serialize without functions or back-references.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "toolCallId": self.tool_call_id,
            "toolName": self.tool_name,
            "params": self.params(),
            "result": self.result(),
        })
    }
}

/// Event record for a single agent run.
pub struct AgentChain {
    agent_name: String,
    node_id: Option<String>,
    request: Mutex<Option<ProviderRequest>>,
    agent_result: Mutex<Option<String>>,
    tools: Mutex<Vec<Arc<ToolChain>>>,
    emitter: Mutex<Option<Emitter>>,
}

impl std::fmt::Debug for AgentChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentChain")
            .field("agent_name", &self.agent_name)
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl AgentChain {
    /// Create a record for one agent run.
    #[must_use]
    pub fn new(agent_name: impl Into<String>, node_id: Option<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            node_id,
            request: Mutex::new(None),
            agent_result: Mutex::new(None),
            tools: Mutex::new(Vec::new()),
            emitter: Mutex::new(None),
        }
    }

    /// The agent name.
    #[must_use]
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// The workflow node id, if any.
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    /// The last LLM request of this run, if recorded.
    #[must_use]
    pub fn request(&self) -> Option<ProviderRequest> {
        self.request.lock().expect("lock poisoned").clone()
    }

    /// The final text produced by this run, if recorded.
    #[must_use]
    pub fn agent_result(&self) -> Option<String> {
        self.agent_result.lock().expect("lock poisoned").clone()
    }

    /// The ordered tool records of this run.
    #[must_use]
    pub fn tools(&self) -> Vec<Arc<ToolChain>> {
        self.tools.lock().expect("lock poisoned").clone()
    }

    /// Record the LLM request (fires an update).
    pub fn set_request(self: &Arc<Self>, request: ProviderRequest) {
        *self.request.lock().expect("lock poisoned") = Some(request);
        self.emit();
    }

    /// Record the final text (fires an update).
    pub fn set_agent_result(self: &Arc<Self>, result: impl Into<String>) {
        *self.agent_result.lock().expect("lock poisoned") = Some(result.into());
        self.emit();
    }

    /// Append a tool record, wiring its updates to bubble through this
    /// agent chain. Fires an update for the push itself first.
    pub fn push_tool(self: &Arc<Self>, tool: Arc<ToolChain>) {
        self.tools.lock().expect("lock poisoned").push(Arc::clone(&tool));
        self.emit();
        let parent = self.emitter.lock().expect("lock poisoned").clone();
        if let Some(parent) = parent {
            tool.set_emitter(parent);
        }
    }

    fn set_emitter(self: &Arc<Self>, emitter: Emitter) {
        // Re-wire existing children so late attachment still bubbles.
        for tool in self.tools.lock().expect("lock poisoned").iter() {
            tool.set_emitter(Arc::clone(&emitter));
        }
        *self.emitter.lock().expect("lock poisoned") = Some(emitter);
    }

    fn emit(self: &Arc<Self>) {
        let emitter = self.emitter.lock().expect("lock poisoned").clone();
        if let Some(emitter) = emitter {
            emitter(ChainUpdate {
                target: ChainTarget::Agent(Arc::clone(self)),
            });
        }
    }

    /// Serialize without functions, deep structures, or back-references:
    /// the request is reduced to message/tool counts.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let request = self.request.lock().expect("lock poisoned");
        json!({
            "agentName": self.agent_name,
            "nodeId": self.node_id,
            "request": request.as_ref().map(|r| json!({
                "messages": r.messages.len(),
                "tools": r.tools.len(),
            })),
            "result": self.agent_result(),
            "tools": self.tools().iter().map(|t| t.to_json()).collect::<Vec<_>>(),
        })
    }
}

/// Event record for a whole task.
pub struct TaskChain {
    task_id: String,
    plan_request: Mutex<Option<Vec<Message>>>,
    plan_result: Mutex<Option<String>>,
    agents: Mutex<Vec<Arc<AgentChain>>>,
    listeners: Mutex<Vec<ChainListener>>,
}

impl std::fmt::Debug for TaskChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskChain")
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}

impl TaskChain {
    /// Create the chain for a task.
    #[must_use]
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            plan_request: Mutex::new(None),
            plan_result: Mutex::new(None),
            agents: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// The task id.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Subscribe to chain updates.
    pub fn subscribe(&self, listener: ChainListener) {
        self.listeners.lock().expect("lock poisoned").push(listener);
    }

    /// Publish an update to all listeners.
    pub fn publish(&self, update: &ChainUpdate) {
        let listeners = self.listeners.lock().expect("lock poisoned").clone();
        for listener in listeners {
            listener(update);
        }
    }

    /// The saved planning request messages.
    #[must_use]
    pub fn plan_request(&self) -> Option<Vec<Message>> {
        self.plan_request.lock().expect("lock poisoned").clone()
    }

    /// The saved plan result text.
    #[must_use]
    pub fn plan_result(&self) -> Option<String> {
        self.plan_result.lock().expect("lock poisoned").clone()
    }

    /// Record the planning request (fires an update).
    pub fn set_plan_request(&self, messages: Vec<Message>) {
        *self.plan_request.lock().expect("lock poisoned") = Some(messages);
        self.publish(&ChainUpdate {
            target: ChainTarget::Task,
        });
    }

    /// Record the plan result text (fires an update).
    pub fn set_plan_result(&self, result: impl Into<String>) {
        *self.plan_result.lock().expect("lock poisoned") = Some(result.into());
        self.publish(&ChainUpdate {
            target: ChainTarget::Task,
        });
    }

    /// The ordered agent records.
    #[must_use]
    pub fn agents(&self) -> Vec<Arc<AgentChain>> {
        self.agents.lock().expect("lock poisoned").clone()
    }

    /// Append an agent record, wiring its updates (and its tools') to this
    /// chain's listeners. Fires an update for the push itself first.
    pub fn push_agent(self: &Arc<Self>, agent: Arc<AgentChain>) {
        self.agents.lock().expect("lock poisoned").push(Arc::clone(&agent));
        self.publish(&ChainUpdate {
            target: ChainTarget::Task,
        });
        let chain = Arc::clone(self);
        agent.set_emitter(Arc::new(move |update| chain.publish(&update)));
    }

    /// Insert an agent record at a position (parallel groups append their
    /// chains in original order before execution completes).
    pub fn insert_agent(self: &Arc<Self>, index: usize, agent: Arc<AgentChain>) {
        {
            let mut agents = self.agents.lock().expect("lock poisoned");
            let index = index.min(agents.len());
            agents.insert(index, Arc::clone(&agent));
        }
        self.publish(&ChainUpdate {
            target: ChainTarget::Task,
        });
        let chain = Arc::clone(self);
        agent.set_emitter(Arc::new(move |update| chain.publish(&update)));
    }

    /// Serialize without functions, deep structures, or back-references:
    /// the plan request is reduced to a message count.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "taskId": self.task_id,
            "planRequest": self.plan_request().map(|m| m.len()),
            "planResult": self.plan_result(),
            "agents": self.agents().iter().map(|a| a.to_json()).collect::<Vec<_>>(),
        })
    }
}
