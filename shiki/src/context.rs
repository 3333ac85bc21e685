//! Task and agent execution context.
//!
//! [`TaskContext`] owns everything that is shared across one task: the
//! variable map, the workflow, the event chain, the cancellation controller,
//! the pause state machine, and the out-of-band conversation queue.
//! [`AgentContext`] wraps it with the per-agent-run state.
//!
//! # Pause/abort protocol
//!
//! The pause state is a three-state FSM: running, paused, and
//! paused-with-step-abort. [`TaskContext::check_aborted`] is the single
//! cooperative suspension point: it throws a cancellation error when the
//! task controller is aborted, and otherwise polls the pause state every
//! 500 ms. While in the step-abort state, each poll aborts every registered
//! per-step controller with reason `"Pause"` and clears the registry, so the
//! current LLM stream read or tool execution is cut short without ending the
//! task.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::agent::Agent;
use crate::callback::{CallbackEvent, CallbackMessage, TaskCallback};
use crate::chain::TaskChain;
use crate::config::{Config, keys};
use crate::error::{Error, Result};
use crate::workflow::{Workflow, WorkflowAgent};

/// Pause poll interval.
const PAUSE_POLL: Duration = Duration::from_millis(500);

/// Pause state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PauseStatus {
    /// The task is running.
    Running = 0,
    /// The task is paused; in-flight steps keep running.
    Paused = 1,
    /// The task is paused and in-flight steps are aborted.
    PausedAbortStep = 2,
}

impl PauseStatus {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Paused,
            2 => Self::PausedAbortStep,
            _ => Self::Running,
        }
    }
}

/// The owning side of an abort signal.
///
/// Aborting is idempotent; the first reason wins.
#[derive(Debug)]
pub struct AbortController {
    tx: watch::Sender<Option<String>>,
}

impl AbortController {
    /// Create a live controller.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Get a signal observing this controller.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Abort with the given reason. Later calls are ignored.
    pub fn abort(&self, reason: impl Into<String>) {
        self.tx.send_if_modified(|state| {
            if state.is_some() {
                false
            } else {
                *state = Some(reason.into());
                true
            }
        });
    }

    /// Returns `true` if aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// The observing side of an abort signal.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<Option<String>>,
}

impl AbortSignal {
    /// Returns `true` if the controller has aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The abort reason, if aborted.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Wait until the controller aborts and return the reason.
    ///
    /// Resolves immediately when already aborted. A dropped controller
    /// counts as an abort.
    pub async fn aborted(&self) -> String {
        let mut rx = self.rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(state) => state.clone().unwrap_or_else(|| "Abort".to_owned()),
            Err(_) => "Abort".to_owned(),
        }
    }
}

/// Shared state for one task.
pub struct TaskContext {
    task_id: String,
    config: Arc<Config>,
    callback: Arc<dyn TaskCallback>,
    chain: Arc<TaskChain>,
    task_prompt: Mutex<String>,
    variables: Mutex<HashMap<String, Value>>,
    workflow: Mutex<Option<Workflow>>,
    controller: Mutex<AbortController>,
    pause_status: AtomicU8,
    step_controllers: Mutex<HashMap<Uuid, AbortController>>,
    conversation: Mutex<Vec<String>>,
    current_agent: Mutex<Option<Arc<dyn Agent>>>,
    agents: Mutex<Vec<Arc<dyn Agent>>>,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("pause_status", &self.pause_status())
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    /// Create a context for a new task.
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        task_prompt: impl Into<String>,
        config: Arc<Config>,
        callback: Arc<dyn TaskCallback>,
    ) -> Self {
        let task_id = task_id.into();
        Self {
            chain: Arc::new(TaskChain::new(&task_id)),
            task_id,
            config,
            callback,
            task_prompt: Mutex::new(task_prompt.into()),
            variables: Mutex::new(HashMap::new()),
            workflow: Mutex::new(None),
            controller: Mutex::new(AbortController::new()),
            pause_status: AtomicU8::new(PauseStatus::Running as u8),
            step_controllers: Mutex::new(HashMap::new()),
            conversation: Mutex::new(Vec::new()),
            current_agent: Mutex::new(None),
            agents: Mutex::new(Vec::new()),
        }
    }

    /// The task id.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The global configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The callback sink.
    #[must_use]
    pub fn callback(&self) -> &Arc<dyn TaskCallback> {
        &self.callback
    }

    /// The task chain.
    #[must_use]
    pub const fn chain(&self) -> &Arc<TaskChain> {
        &self.chain
    }

    /// The main task prompt.
    #[must_use]
    pub fn task_prompt(&self) -> String {
        self.task_prompt.lock().expect("lock poisoned").clone()
    }

    /// Replace the main task prompt (used by `modify`).
    pub fn set_task_prompt(&self, prompt: impl Into<String>) {
        *self.task_prompt.lock().expect("lock poisoned") = prompt.into();
    }

    // ── Variables ────────────────────────────────────────────────────────

    /// Get a context variable.
    #[must_use]
    pub fn get_variable(&self, key: &str) -> Option<Value> {
        self.variables.lock().expect("lock poisoned").get(key).cloned()
    }

    /// Set a context variable.
    pub fn set_variable(&self, key: impl Into<String>, value: Value) {
        self.variables
            .lock()
            .expect("lock poisoned")
            .insert(key.into(), value);
    }

    /// Remove a context variable.
    pub fn remove_variable(&self, key: &str) -> Option<Value> {
        self.variables.lock().expect("lock poisoned").remove(key)
    }

    /// Snapshot of all variables.
    #[must_use]
    pub fn variables(&self) -> HashMap<String, Value> {
        self.variables.lock().expect("lock poisoned").clone()
    }

    fn var_bool(&self, key: &str) -> Option<bool> {
        match self.get_variable(key)? {
            Value::Bool(b) => Some(b),
            Value::String(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn var_u64(&self, key: &str) -> Option<u64> {
        match self.get_variable(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    // ── Config resolution (variable overrides global) ────────────────────

    /// Whether sibling agents in a parallel group run concurrently.
    #[must_use]
    pub fn agent_parallel(&self) -> bool {
        self.var_bool(keys::AGENT_PARALLEL)
            .unwrap_or(self.config.agent_parallel)
    }

    /// Whether tool calls within one assistant step run concurrently.
    #[must_use]
    pub fn parallel_tool_calls(&self) -> bool {
        self.var_bool(keys::PARALLEL_TOOL_CALLS)
            .unwrap_or(self.config.parallel_tool_calls)
    }

    /// Message-count compression threshold.
    #[must_use]
    pub fn compress_threshold(&self) -> usize {
        self.var_u64(keys::COMPRESS_THRESHOLD)
            .map_or(self.config.compress_threshold, |n| n as usize)
    }

    /// Estimated-token compression threshold.
    #[must_use]
    pub fn compress_tokens_threshold(&self) -> u64 {
        self.var_u64(keys::COMPRESS_TOKENS_THRESHOLD)
            .unwrap_or(self.config.compress_tokens_threshold)
    }

    /// Retry cap for stream failures and length finishes.
    #[must_use]
    pub fn max_retry_num(&self) -> usize {
        self.var_u64(keys::MAX_RETRY_NUM)
            .map_or(self.config.max_retry_num, |n| n as usize)
    }

    /// Agent-loop iteration cap.
    #[must_use]
    pub fn max_react_num(&self) -> usize {
        self.var_u64(keys::MAX_REACT_NUM)
            .map_or(self.config.max_react_num, |n| n as usize)
    }

    /// Large-text truncation ceiling.
    #[must_use]
    pub fn large_text_length(&self) -> usize {
        self.var_u64(keys::LARGE_TEXT_LENGTH)
            .map_or(self.config.large_text_length, |n| n as usize)
    }

    /// Image/file quota in the working buffer.
    #[must_use]
    pub fn max_dialogue_img_file_num(&self) -> usize {
        self.var_u64(keys::MAX_DIALOGUE_IMG_FILE_NUM)
            .map_or(self.config.max_dialogue_img_file_num, |n| n as usize)
    }

    /// Whether expert mode is on.
    #[must_use]
    pub fn expert_mode(&self) -> bool {
        self.var_bool(keys::EXPERT_MODE)
            .unwrap_or(self.config.expert_mode)
    }

    /// Todo-maintenance period in loop iterations.
    #[must_use]
    pub fn expert_mode_todo_loop_num(&self) -> usize {
        self.var_u64(keys::EXPERT_MODE_TODO_LOOP_NUM)
            .map_or(self.config.expert_mode_todo_loop_num, |n| n as usize)
            .max(1)
    }

    /// Whether tool results may carry media inline.
    #[must_use]
    pub fn tool_result_multimodal(&self) -> bool {
        self.var_bool(keys::TOOL_RESULT_MULTIMODAL)
            .unwrap_or(self.config.tool_result_multimodal)
    }

    /// The `forceStop` variable as a result string, if set.
    #[must_use]
    pub fn force_stop(&self) -> Option<String> {
        match self.get_variable(keys::FORCE_STOP)? {
            Value::String(s) => Some(s),
            other if !other.is_null() => Some(other.to_string()),
            _ => None,
        }
    }

    // ── Workflow ─────────────────────────────────────────────────────────

    /// Snapshot of the stored workflow.
    #[must_use]
    pub fn workflow(&self) -> Option<Workflow> {
        self.workflow.lock().expect("lock poisoned").clone()
    }

    /// Store the workflow.
    pub fn set_workflow(&self, workflow: Workflow) {
        *self.workflow.lock().expect("lock poisoned") = Some(workflow);
    }

    /// Mutate the stored workflow in place.
    pub fn with_workflow_mut<T>(&self, f: impl FnOnce(&mut Workflow) -> T) -> Option<T> {
        self.workflow
            .lock()
            .expect("lock poisoned")
            .as_mut()
            .map(f)
    }

    // ── Conversation queue (user interventions) ──────────────────────────

    /// Queue out-of-band user text for the next assistant step.
    pub fn push_conversation(&self, text: impl Into<String>) {
        self.conversation
            .lock()
            .expect("lock poisoned")
            .push(text.into());
    }

    /// Drain all queued user interventions.
    #[must_use]
    pub fn take_conversation(&self) -> Vec<String> {
        std::mem::take(&mut *self.conversation.lock().expect("lock poisoned"))
    }

    /// Drop queued user interventions (between workflow nodes).
    pub fn clear_conversation(&self) {
        self.conversation.lock().expect("lock poisoned").clear();
    }

    // ── Declared agents ──────────────────────────────────────────────────

    /// Replace this task's effective agent list (declared agents merged
    /// with externally discovered ones).
    pub fn set_agents(&self, agents: Vec<Arc<dyn Agent>>) {
        *self.agents.lock().expect("lock poisoned") = agents;
    }

    /// This task's effective agents.
    #[must_use]
    pub fn agents(&self) -> Vec<Arc<dyn Agent>> {
        self.agents.lock().expect("lock poisoned").clone()
    }

    /// Look up an effective agent by name.
    #[must_use]
    pub fn agent_by_name(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents
            .lock()
            .expect("lock poisoned")
            .iter()
            .find(|a| a.name() == name)
            .cloned()
    }

    // ── Current agent ────────────────────────────────────────────────────

    /// Record the agent currently driving this task.
    pub fn set_current_agent(&self, agent: Option<Arc<dyn Agent>>) {
        *self.current_agent.lock().expect("lock poisoned") = agent;
    }

    /// The agent currently driving this task.
    #[must_use]
    pub fn current_agent(&self) -> Option<Arc<dyn Agent>> {
        self.current_agent.lock().expect("lock poisoned").clone()
    }

    // ── Pause / abort ────────────────────────────────────────────────────

    /// Current pause state.
    #[must_use]
    pub fn pause_status(&self) -> PauseStatus {
        PauseStatus::from_u8(self.pause_status.load(Ordering::SeqCst))
    }

    /// Pause or resume the task. When pausing with `abort_current_step`,
    /// in-flight steps are aborted with reason `"Pause"` — immediately, and
    /// again on every pause poll for steps registered afterwards.
    pub fn set_pause(&self, pause: bool, abort_current_step: bool) {
        let status = if pause {
            if abort_current_step {
                PauseStatus::PausedAbortStep
            } else {
                PauseStatus::Paused
            }
        } else {
            PauseStatus::Running
        };
        debug!(task_id = %self.task_id, ?status, "Pause status changed");
        self.pause_status.store(status as u8, Ordering::SeqCst);
        if status == PauseStatus::PausedAbortStep {
            self.abort_step_controllers("Pause");
        }
    }

    /// The task-level abort signal.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        self.controller.lock().expect("lock poisoned").signal()
    }

    /// Returns `true` if the task controller has aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.controller.lock().expect("lock poisoned").is_aborted()
    }

    /// Abort the task: clears pause, aborts the task controller, and
    /// notifies the current agent.
    pub async fn abort_task(&self, reason: Option<&str>) {
        self.set_pause(false, false);
        self.abort_step_controllers("Abort");
        self.controller
            .lock()
            .expect("lock poisoned")
            .abort(reason.unwrap_or("Abort"));
        let agent = self.current_agent();
        if let Some(agent) = agent {
            agent.on_task_status("abort", reason).await;
        }
    }

    /// Replace the task controller so a previously-aborted task can be
    /// re-executed, and reset the pause state.
    pub fn reset(&self) {
        self.set_pause(false, false);
        *self.controller.lock().expect("lock poisoned") = AbortController::new();
        self.step_controllers.lock().expect("lock poisoned").clear();
    }

    /// Register a per-step abort controller for the duration of one
    /// suspending operation. The returned guard unregisters on drop.
    #[must_use]
    pub fn register_step(self: &Arc<Self>) -> StepGuard {
        let controller = AbortController::new();
        let signal = controller.signal();
        let key = Uuid::new_v4();
        self.step_controllers
            .lock()
            .expect("lock poisoned")
            .insert(key, controller);
        StepGuard {
            ctx: Arc::clone(self),
            key,
            signal,
        }
    }

    fn abort_step_controllers(&self, reason: &str) {
        let controllers = std::mem::take(&mut *self.step_controllers.lock().expect("lock poisoned"));
        for controller in controllers.values() {
            controller.abort(reason);
        }
    }

    /// Cooperative cancellation and pause point.
    ///
    /// Fails with [`Error::Aborted`] when the task controller is aborted.
    /// While paused (and `no_check_pause` is false), polls every 500 ms;
    /// in the step-abort pause state each poll aborts registered per-step
    /// controllers with reason `"Pause"`.
    pub async fn check_aborted_with(&self, no_check_pause: bool) -> Result<()> {
        loop {
            if let Some(reason) = self.signal().reason() {
                return Err(Error::aborted(reason));
            }
            if no_check_pause || self.pause_status() == PauseStatus::Running {
                return Ok(());
            }
            tokio::time::sleep(PAUSE_POLL).await;
            if self.pause_status() == PauseStatus::PausedAbortStep {
                self.abort_step_controllers("Pause");
            }
        }
    }

    /// [`Self::check_aborted_with`] with pause checking enabled.
    pub async fn check_aborted(&self) -> Result<()> {
        self.check_aborted_with(false).await
    }

    // ── Callbacks ────────────────────────────────────────────────────────

    /// Publish a task-scoped callback event.
    pub async fn emit(&self, event: CallbackEvent) {
        self.emit_scoped(None, None, event).await;
    }

    /// Publish a callback event scoped to an agent/node.
    pub async fn emit_scoped(
        &self,
        agent_name: Option<&str>,
        node_id: Option<&str>,
        event: CallbackEvent,
    ) {
        self.callback
            .on_message(CallbackMessage::new(
                &self.task_id,
                agent_name.map(str::to_owned),
                node_id.map(str::to_owned),
                event,
            ))
            .await;
    }
}

/// Guard for a registered per-step abort controller.
///
/// Holds the step's abort signal; dropping the guard unregisters the
/// controller from the task context.
#[derive(Debug)]
pub struct StepGuard {
    ctx: Arc<TaskContext>,
    key: Uuid,
    signal: AbortSignal,
}

impl StepGuard {
    /// The per-step abort signal.
    #[must_use]
    pub const fn signal(&self) -> &AbortSignal {
        &self.signal
    }
}

impl Drop for StepGuard {
    fn drop(&mut self) {
        self.ctx
            .step_controllers
            .lock()
            .expect("lock poisoned")
            .remove(&self.key);
    }
}

/// Per-agent-run state: the task context plus the agent identity, its chain
/// entry, and the workflow node being executed.
pub struct AgentContext {
    task: Arc<TaskContext>,
    agent: Arc<dyn Agent>,
    chain: Arc<crate::chain::AgentChain>,
    node: Option<WorkflowAgent>,
}

impl fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentContext")
            .field("task_id", &self.task.task_id())
            .field("agent", &self.agent.name())
            .finish_non_exhaustive()
    }
}

impl AgentContext {
    /// Create the context for one agent run.
    #[must_use]
    pub const fn new(
        task: Arc<TaskContext>,
        agent: Arc<dyn Agent>,
        chain: Arc<crate::chain::AgentChain>,
        node: Option<WorkflowAgent>,
    ) -> Self {
        Self {
            task,
            agent,
            chain,
            node,
        }
    }

    /// The owning task context.
    #[must_use]
    pub const fn task(&self) -> &Arc<TaskContext> {
        &self.task
    }

    /// The agent being run.
    #[must_use]
    pub const fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    /// This run's chain entry.
    #[must_use]
    pub const fn chain(&self) -> &Arc<crate::chain::AgentChain> {
        &self.chain
    }

    /// The workflow node driving this run, if any.
    #[must_use]
    pub const fn node(&self) -> Option<&WorkflowAgent> {
        self.node.as_ref()
    }

    /// The workflow node id, if any.
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        self.node.as_ref().map(|n| n.id.as_str())
    }

    /// Publish a callback event scoped to this agent run.
    pub async fn emit(&self, event: CallbackEvent) {
        self.task
            .emit_scoped(Some(self.agent.name()), self.node_id(), event)
            .await;
    }
}
