//! Streaming workflow planner.
//!
//! Streams a planning request to the model, tolerantly parsing the
//! in-flight text so observers see the plan take shape, then strictly
//! parses the final text into a [`Workflow`]. The request and result are
//! stored on the chain; a replan reuses them plus the new user prompt.

use std::sync::Arc;

use futures::StreamExt as _;
use tracing::{debug, info};

use crate::callback::CallbackEvent;
use crate::context::TaskContext;
use crate::config::keys;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::prompts;
use crate::provider::{Provider, ProviderRequest};
use crate::stream::StreamEvent;
use crate::workflow::Workflow;
use crate::workflow_xml::WorkflowParser;

/// The workflow planner.
pub struct Planner {
    parser: Arc<dyn WorkflowParser>,
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner").finish_non_exhaustive()
    }
}

impl Planner {
    /// Create a planner over a DSL parser.
    #[must_use]
    pub const fn new(parser: Arc<dyn WorkflowParser>) -> Self {
        Self { parser }
    }

    /// Plan a workflow for the task prompt.
    pub async fn plan(
        &self,
        ctx: &Arc<TaskContext>,
        provider: &Arc<dyn Provider>,
        task_prompt: &str,
    ) -> Result<Workflow> {
        let catalog_entries: Vec<(String, String, Vec<String>)> = ctx
            .agents()
            .iter()
            .map(|agent| {
                let tools = agent
                    .tools()
                    .iter()
                    .filter(|t| !t.no_plan())
                    .map(|t| t.name())
                    .collect();
                (
                    agent.name().to_owned(),
                    agent.description().to_owned(),
                    tools,
                )
            })
            .collect();
        let catalog = prompts::agent_catalog(&catalog_entries);
        let ext_prompt = ctx
            .get_variable(keys::PLAN_EXT_PROMPT)
            .and_then(|v| v.as_str().map(str::to_owned));
        let website = ctx
            .get_variable(keys::TASK_WEBSITE)
            .and_then(|v| v.as_str().map(str::to_owned));

        let messages = vec![
            Message::system(prompts::planning_system_prompt(
                &catalog,
                ext_prompt.as_deref(),
                website.as_deref(),
            )),
            Message::user(prompts::planning_user_prompt(task_prompt)),
        ];
        self.stream_plan(ctx, provider, messages).await
    }

    /// Replan with a new prompt, reusing the saved planning request and the
    /// prior plan text as context.
    pub async fn replan(
        &self,
        ctx: &Arc<TaskContext>,
        provider: &Arc<dyn Provider>,
        new_prompt: &str,
    ) -> Result<Workflow> {
        let mut messages = ctx
            .chain()
            .plan_request()
            .ok_or_else(|| Error::internal("no saved planning request to replan from"))?;
        if let Some(previous) = ctx.chain().plan_result() {
            messages.push(Message::assistant(previous));
        }
        messages.push(Message::user(format!(
            "Adjust the plan for this follow-up instruction. Keep agent ids \
             stable for unchanged work and output the full workflow XML \
             again:\n\n{new_prompt}"
        )));
        self.stream_plan(ctx, provider, messages).await
    }

    async fn stream_plan(
        &self,
        ctx: &Arc<TaskContext>,
        provider: &Arc<dyn Provider>,
        messages: Vec<Message>,
    ) -> Result<Workflow> {
        ctx.chain().set_plan_request(messages.clone());

        let step = ctx.register_step();
        let task_signal = ctx.signal();
        let step_signal = step.signal().clone();
        let request = ProviderRequest::new(messages, Vec::new(), step_signal.clone());

        let mut stream = provider.stream(request).await?;
        let mut text = String::new();

        loop {
            let event = tokio::select! {
                reason = task_signal.aborted() => return Err(Error::aborted(reason)),
                reason = step_signal.aborted() => return Err(Error::aborted(reason)),
                event = stream.next() => event,
            };
            let Some(event) = event else { break };
            match event? {
                StreamEvent::TextDelta { delta } => {
                    text.push_str(&delta);
                    // Tolerant in-flight parse: forward progress whenever the
                    // partial document already yields something.
                    if let Ok(workflow) = self.parser.parse(ctx.task_id(), &text, false) {
                        if !workflow.name.is_empty() || !workflow.agents.is_empty() {
                            ctx.emit(CallbackEvent::PlanProcess {
                                workflow_xml: workflow.to_xml(),
                                done: false,
                            })
                            .await;
                        }
                    }
                }
                StreamEvent::Error { error } => {
                    ctx.emit(CallbackEvent::Error {
                        error: error.clone(),
                    })
                    .await;
                    return Err(Error::model(error.to_string()));
                }
                StreamEvent::Finish { .. } => break,
                _ => {}
            }
        }
        drop(stream);
        drop(step);

        debug!(task_id = %ctx.task_id(), chars = text.len(), "Plan stream finished");
        let workflow = self.parser.parse(ctx.task_id(), &text, true)?;
        ctx.chain().set_plan_result(text.as_str());
        ctx.emit(CallbackEvent::PlanProcess {
            workflow_xml: workflow.to_xml(),
            done: true,
        })
        .await;
        info!(task_id = %ctx.task_id(), agents = workflow.agents.len(), "Workflow planned");
        Ok(workflow)
    }
}
