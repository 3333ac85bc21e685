//! The execution orchestrator.
//!
//! [`Orchestrator`] owns the declared agents, the provider set, and the
//! task map. `generate` plans a workflow for a prompt; `execute` walks the
//! traversal tree built from the DAG, running agents serially or in
//! parallel groups and honoring mid-flight replans; `modify` replans a
//! stored task. Tasks can be paused, aborted, chatted with, and deleted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{Agent, BaseAgent, run_agent};
use crate::callback::{CallbackEvent, NoopCallback, TaskCallback};
use crate::chain::AgentChain;
use crate::config::Config;
use crate::context::TaskContext;
use crate::discovery::AgentRegistry;
use crate::error::{Error, Result};
use crate::planner::Planner;
use crate::provider::ProviderSet;
use crate::workflow::{AgentNode, AgentNodeKind, NodeStatus, Workflow, WorkflowAgent};
use crate::workflow_xml::{WorkflowParser, XmlWorkflowParser};

/// Why a task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStopReason {
    /// The workflow ran to completion.
    Done,
    /// The task was aborted.
    Abort,
    /// The task failed.
    Error,
}

impl TaskStopReason {
    /// The string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Abort => "abort",
            Self::Error => "error",
        }
    }
}

/// The user-visible outcome of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Whether the task completed.
    pub success: bool,
    /// Why the task stopped.
    pub stop_reason: TaskStopReason,
    /// The final result text (or error message).
    pub result: String,
    /// The error message, when the task failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    /// A successful result.
    #[must_use]
    pub fn done(result: impl Into<String>) -> Self {
        Self {
            success: true,
            stop_reason: TaskStopReason::Done,
            result: result.into(),
            error: None,
        }
    }

    /// An aborted result.
    #[must_use]
    pub fn abort(err: &Error) -> Self {
        Self {
            success: false,
            stop_reason: TaskStopReason::Abort,
            result: err.to_string(),
            error: Some(err.to_string()),
        }
    }

    /// A failed result.
    #[must_use]
    pub fn error(err: &Error) -> Self {
        Self {
            success: false,
            stop_reason: TaskStopReason::Error,
            result: err.to_string(),
            error: Some(err.to_string()),
        }
    }
}

/// The multi-agent orchestration runtime.
pub struct Orchestrator {
    config: Arc<Config>,
    providers: ProviderSet,
    callback: Arc<dyn TaskCallback>,
    planner: Planner,
    agents: Vec<Arc<dyn Agent>>,
    registry: Option<Arc<dyn AgentRegistry>>,
    tasks: Mutex<HashMap<String, Arc<TaskContext>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("agents", &self.agents.iter().map(|a| a.name().to_owned()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator over a configuration and provider set.
    #[must_use]
    pub fn new(config: Config, providers: ProviderSet) -> Self {
        Self {
            config: Arc::new(config),
            providers,
            callback: Arc::new(NoopCallback),
            planner: Planner::new(Arc::new(XmlWorkflowParser)),
            agents: Vec::new(),
            registry: None,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Set the callback sink.
    #[must_use]
    pub fn with_callback(mut self, callback: Arc<dyn TaskCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Replace the workflow DSL parser.
    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn WorkflowParser>) -> Self {
        self.planner = Planner::new(parser);
        self
    }

    /// Declare an agent.
    #[must_use]
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    /// Attach an external agent registry merged in at plan time.
    #[must_use]
    pub fn with_agent_registry(mut self, registry: Arc<dyn AgentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Look up a live task context.
    #[must_use]
    pub fn task(&self, task_id: &str) -> Option<Arc<TaskContext>> {
        self.tasks.lock().expect("lock poisoned").get(task_id).cloned()
    }

    /// Ids of all live tasks.
    #[must_use]
    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.lock().expect("lock poisoned").keys().cloned().collect()
    }

    /// Plan and execute a task in one call.
    pub async fn run(&self, task_prompt: &str) -> TaskResult {
        self.run_with(task_prompt, None, None).await
    }

    /// Plan and execute with an explicit task id and seed variables.
    pub async fn run_with(
        &self,
        task_prompt: &str,
        task_id: Option<String>,
        params: Option<HashMap<String, Value>>,
    ) -> TaskResult {
        match self.generate(task_prompt, task_id, params).await {
            Ok(workflow) => self.execute(&workflow.task_id).await,
            Err(err) => TaskResult::error(&err),
        }
    }

    /// Create a task: seed variables, merge discovered agents, and plan the
    /// workflow. On planner failure the task is deleted again.
    pub async fn generate(
        &self,
        task_prompt: &str,
        task_id: Option<String>,
        params: Option<HashMap<String, Value>>,
    ) -> Result<Workflow> {
        let task_id = task_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let ctx = Arc::new(TaskContext::new(
            &task_id,
            task_prompt,
            Arc::clone(&self.config),
            Arc::clone(&self.callback),
        ));
        if let Some(params) = params {
            for (key, value) in params {
                ctx.set_variable(key, value);
            }
        }

        let mut agents = self.agents.clone();
        if let Some(registry) = &self.registry {
            match registry.list_agents(task_prompt).await {
                Ok(descriptors) => {
                    for descriptor in descriptors {
                        // Local declarations win on name clashes.
                        if agents.iter().any(|a| a.name() == descriptor.name) {
                            continue;
                        }
                        agents.push(Arc::new(
                            BaseAgent::new(descriptor.name, descriptor.description)
                                .with_tool_discovery(registry.tool_client(), descriptor.ext_info),
                        ));
                    }
                }
                Err(err) => warn!(error = %err, "Agent discovery failed"),
            }
        }
        ctx.set_agents(agents);

        self.tasks
            .lock()
            .expect("lock poisoned")
            .insert(task_id.clone(), Arc::clone(&ctx));

        let plan_outcome = match self.providers.resolve(None) {
            Some(provider) => self.planner.plan(&ctx, &provider, task_prompt).await,
            None => Err(Error::configuration("no default provider configured")),
        };
        match plan_outcome {
            Ok(workflow) => {
                ctx.set_workflow(workflow.clone());
                ctx.emit(CallbackEvent::TaskStart {
                    workflow_xml: workflow.to_xml(),
                })
                .await;
                info!(%task_id, agents = workflow.agents.len(), "Task generated");
                Ok(workflow)
            }
            Err(err) => {
                self.tasks.lock().expect("lock poisoned").remove(&task_id);
                ctx.emit(CallbackEvent::TaskFinished {
                    stop_reason: TaskStopReason::Error.as_str().to_owned(),
                    result: err.to_string(),
                })
                .await;
                Err(err)
            }
        }
    }

    /// Execute a generated task to completion.
    ///
    /// A task that previously errored (or was aborted) can be executed
    /// again; the controller is reset and only `init` nodes run.
    pub async fn execute(&self, task_id: &str) -> TaskResult {
        let Some(ctx) = self.task(task_id) else {
            return TaskResult::error(&Error::UnknownTask {
                task_id: task_id.to_owned(),
            });
        };
        ctx.clear_conversation();
        if ctx.is_aborted() {
            ctx.reset();
        } else {
            ctx.set_pause(false, false);
        }

        let outcome = self.execute_workflow(&ctx).await;
        let result = match outcome {
            Ok(text) => TaskResult::done(text),
            Err(err) if err.is_abort() => TaskResult::abort(&err),
            Err(err) => TaskResult::error(&err),
        };
        ctx.emit(CallbackEvent::TaskFinished {
            stop_reason: result.stop_reason.as_str().to_owned(),
            result: result.result.clone(),
        })
        .await;
        result
    }

    async fn execute_workflow(&self, ctx: &Arc<TaskContext>) -> Result<String> {
        let workflow = ctx
            .workflow()
            .ok_or_else(|| Error::workflow("task has no workflow"))?;
        workflow.validate()?;
        for node in &workflow.agents {
            if ctx.agent_by_name(&node.name).is_none() {
                return Err(Error::workflow(format!("unknown agent '{}'", node.name)));
            }
        }

        let mut results: Vec<String> = Vec::new();
        let mut current: Option<AgentNode> = workflow.build_tree()?;

        while let Some(node) = current.take() {
            ctx.check_aborted().await?;

            match &node.kind {
                AgentNodeKind::Normal { node_id } => {
                    if self.node_status(ctx, node_id) == Some(NodeStatus::Init) {
                        let text = self.run_node(ctx, node_id).await?;
                        results.push(text);
                    }
                }
                AgentNodeKind::Parallel { node_ids } => {
                    let all_init = node_ids
                        .iter()
                        .all(|id| self.node_status(ctx, id) == Some(NodeStatus::Init));
                    if all_init {
                        let texts = self.run_parallel_group(ctx, node_ids).await?;
                        results.extend(texts);
                    }
                }
            }

            // Expert-mode replan trigger left by the last agent.
            let modified_already = ctx.workflow().is_some_and(|wf| wf.modified);
            if ctx.expert_mode() && !modified_already {
                if let Some(Value::String(request)) = ctx.get_variable("replanRequest") {
                    ctx.remove_variable("replanRequest");
                    debug!(task_id = %ctx.task_id(), "Replan requested by agent");
                    if let Err(err) = self.replan_task(ctx, &request).await {
                        if err.is_abort() {
                            return Err(err);
                        }
                        warn!(error = %err, "Replan failed; continuing with current workflow");
                    }
                }
            }

            if ctx.workflow().is_some_and(|wf| wf.modified) {
                ctx.with_workflow_mut(|wf| wf.modified = false);
                let workflow = ctx
                    .workflow()
                    .ok_or_else(|| Error::workflow("workflow disappeared during replan"))?;
                current = workflow.build_tree()?;
                ctx.clear_conversation();
                continue;
            }

            ctx.clear_conversation();
            current = node.next.map(|next| *next);
        }

        Ok(results.last().cloned().unwrap_or_default())
    }

    fn node_status(&self, ctx: &Arc<TaskContext>, node_id: &str) -> Option<NodeStatus> {
        ctx.workflow()
            .and_then(|wf| wf.agent(node_id).map(|a| a.status))
    }

    fn set_node_status(&self, ctx: &Arc<TaskContext>, node_id: &str, status: NodeStatus) {
        ctx.with_workflow_mut(|wf| {
            if let Some(agent) = wf.agent_mut(node_id) {
                agent.status = status;
            }
        });
    }

    fn prepare_node(
        &self,
        ctx: &Arc<TaskContext>,
        node_id: &str,
    ) -> Result<(Arc<dyn Agent>, Arc<AgentChain>, WorkflowAgent)> {
        let node = ctx
            .workflow()
            .and_then(|wf| wf.agent(node_id).cloned())
            .ok_or_else(|| Error::workflow(format!("unknown node '{node_id}'")))?;
        let agent = ctx
            .agent_by_name(&node.name)
            .ok_or_else(|| Error::workflow(format!("unknown agent '{}'", node.name)))?;
        let chain = Arc::new(AgentChain::new(&node.name, Some(node.id.clone())));
        Ok((agent, chain, node))
    }

    async fn run_node(&self, ctx: &Arc<TaskContext>, node_id: &str) -> Result<String> {
        let (agent, chain, node) = self.prepare_node(ctx, node_id)?;
        ctx.chain().push_agent(Arc::clone(&chain));
        self.run_prepared(ctx, agent, chain, node).await
    }

    /// Run a parallel group. Chains are appended in declaration order before
    /// anything starts; execution is concurrent only when the task enables
    /// it, and the returned texts follow declaration order either way.
    async fn run_parallel_group(
        &self,
        ctx: &Arc<TaskContext>,
        node_ids: &[String],
    ) -> Result<Vec<String>> {
        let mut prepared = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            let entry = self.prepare_node(ctx, node_id)?;
            ctx.chain().push_agent(Arc::clone(&entry.1));
            prepared.push(entry);
        }

        if ctx.agent_parallel() {
            debug!(count = prepared.len(), "Running agents in parallel");
            let futures: Vec<_> = prepared
                .into_iter()
                .map(|(agent, chain, node)| self.run_prepared(ctx, agent, chain, node))
                .collect();
            let outcomes = futures::future::join_all(futures).await;
            let mut texts = Vec::with_capacity(outcomes.len());
            for outcome in outcomes {
                texts.push(outcome?);
            }
            Ok(texts)
        } else {
            let mut texts = Vec::with_capacity(prepared.len());
            for (agent, chain, node) in prepared {
                texts.push(self.run_prepared(ctx, agent, chain, node).await?);
            }
            Ok(texts)
        }
    }

    async fn run_prepared(
        &self,
        ctx: &Arc<TaskContext>,
        agent: Arc<dyn Agent>,
        chain: Arc<AgentChain>,
        node: WorkflowAgent,
    ) -> Result<String> {
        let node_id = node.id.clone();
        self.set_node_status(ctx, &node_id, NodeStatus::Running);
        ctx.set_current_agent(Some(Arc::clone(&agent)));

        let agent_ctx =
            crate::context::AgentContext::new(Arc::clone(ctx), agent, chain.clone(), Some(node));
        let outcome = run_agent(&agent_ctx, &self.providers).await;
        ctx.set_current_agent(None);

        match outcome {
            Ok(text) => {
                self.set_node_status(ctx, &node_id, NodeStatus::Done);
                chain.set_agent_result(text.as_str());
                agent_ctx
                    .emit(CallbackEvent::AgentResult {
                        result: text.clone(),
                        is_error: false,
                    })
                    .await;
                Ok(text)
            }
            Err(err) => {
                self.set_node_status(ctx, &node_id, NodeStatus::Error);
                agent_ctx
                    .emit(CallbackEvent::AgentResult {
                        result: err.to_string(),
                        is_error: true,
                    })
                    .await;
                Err(err)
            }
        }
    }

    /// Replan a stored task with a new prompt. Node statuses are carried
    /// over by id; the workflow is marked modified so the next traversal
    /// step rebuilds from the remaining `init` nodes.
    pub async fn modify(&self, task_id: &str, new_prompt: &str) -> Result<Workflow> {
        let ctx = self.task(task_id).ok_or_else(|| Error::UnknownTask {
            task_id: task_id.to_owned(),
        })?;
        self.replan_task(&ctx, new_prompt).await?;
        ctx.workflow()
            .ok_or_else(|| Error::workflow("task has no workflow"))
    }

    async fn replan_task(&self, ctx: &Arc<TaskContext>, new_prompt: &str) -> Result<()> {
        let provider = self
            .providers
            .resolve(None)
            .ok_or_else(|| Error::configuration("no default provider configured"))?;
        let mut replanned = self.planner.replan(ctx, &provider, new_prompt).await?;
        replanned.validate()?;

        if let Some(previous) = ctx.workflow() {
            for agent in &mut replanned.agents {
                if let Some(old) = previous.agent(&agent.id) {
                    if old.status != NodeStatus::Init {
                        agent.status = old.status;
                    }
                }
            }
        }
        replanned.modified = true;
        ctx.emit(CallbackEvent::WorkflowModified {
            workflow_xml: replanned.to_xml(),
        })
        .await;
        ctx.set_workflow(replanned);
        Ok(())
    }

    /// Pause or resume a task, optionally aborting in-flight steps.
    pub fn pause_task(&self, task_id: &str, pause: bool, abort_current_step: bool) -> Result<()> {
        let ctx = self.task(task_id).ok_or_else(|| Error::UnknownTask {
            task_id: task_id.to_owned(),
        })?;
        ctx.set_pause(pause, abort_current_step);
        Ok(())
    }

    /// Abort a task.
    pub async fn abort_task(&self, task_id: &str) -> Result<()> {
        let ctx = self.task(task_id).ok_or_else(|| Error::UnknownTask {
            task_id: task_id.to_owned(),
        })?;
        ctx.abort_task(None).await;
        Ok(())
    }

    /// Abort and remove a task.
    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        let ctx = self.task(task_id).ok_or_else(|| Error::UnknownTask {
            task_id: task_id.to_owned(),
        })?;
        ctx.abort_task(None).await;
        self.tasks.lock().expect("lock poisoned").remove(task_id);
        Ok(())
    }

    /// Queue out-of-band user text; the next assistant step folds it into
    /// the conversation as a replanning instruction.
    pub fn chat(&self, task_id: &str, text: impl Into<String>) -> Result<()> {
        let ctx = self.task(task_id).ok_or_else(|| Error::UnknownTask {
            task_id: task_id.to_owned(),
        })?;
        ctx.push_conversation(text);
        Ok(())
    }
}
