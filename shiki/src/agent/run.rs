//! The agent ReAct loop.
//!
//! Observe → Reason → Act: assemble the prompt, run one assistant step via
//! the turn engine, execute the tool calls it produced, fold the results
//! back into the buffer, and repeat until the model answers with plain text
//! (or a cap/forced stop intervenes).

use std::sync::Arc;

use tracing::{Instrument as _, debug, info, info_span, warn};

use crate::callback::CallbackEvent;
use crate::context::AgentContext;
use crate::discovery::RemoteTool;
use crate::error::{Error, Result};
use crate::memory::compress::used_tool_names;
use crate::memory::{fix_discontinuous, prune_large_content};
use crate::message::{ContentPart, Message};
use crate::prompts;
use crate::provider::{Provider, ProviderSet, ToolChoice};
use crate::tool::builtin::{
    ForeachTask, TaskResultCheckArgs, TodoListManagerArgs, VariableStorage, WatchTrigger,
    apply_todo_update, task_result_check_schema, todo_list_manager_schema,
};
use crate::tool::{BoxedTool, ToolSet, parse_args};

use super::dispatch::{StepOutcome, handle_step_results};
use super::prompt::{build_system_message, build_user_message};
use super::turn::{TurnOptions, call_model};

/// Run one agent to completion and return its final text.
pub async fn run_agent(ctx: &AgentContext, providers: &ProviderSet) -> Result<String> {
    let agent = Arc::clone(ctx.agent());
    let span = info_span!(
        "agent",
        agent.name = %agent.name(),
        task_id = %ctx.task().task_id(),
    );
    run_inner(ctx, providers).instrument(span).await
}

async fn run_inner(ctx: &AgentContext, providers: &ProviderSet) -> Result<String> {
    let agent = Arc::clone(ctx.agent());
    let provider = providers.resolve(agent.llm()).ok_or_else(|| {
        Error::configuration(format!("no provider for agent '{}'", agent.name()))
    })?;

    // Effective tool set: agent tools ⊕ capability tools ⊕ synthetic tools
    // for node features. Earlier sources win on name clashes.
    let mut base_tools = ToolSet::new();
    base_tools.extend(agent.tools());
    for capability in agent.capabilities() {
        base_tools.extend(capability.tools());
    }
    if let Some(node) = ctx.node() {
        if node.has_variable_io() {
            base_tools.push_tool(VariableStorage);
        }
        if node.has_foreach() {
            base_tools.push_tool(ForeachTask);
        }
        if node.has_watch() {
            base_tools.push_tool(WatchTrigger);
        }
    }
    let mut remote_tools: Vec<BoxedTool> = Vec::new();
    let mut tools = base_tools.clone();

    let mut messages = vec![build_system_message(ctx, &tools), build_user_message(ctx)];

    let node_task = ctx.node().map_or_else(
        || ctx.task().task_prompt(),
        |node| node.task.clone(),
    );
    ctx.emit(CallbackEvent::AgentStart { task: node_task }).await;
    info!(agent = %agent.name(), tools = ?tools.names(), "Agent run started");

    let max_react = ctx.task().max_react_num();
    let mut consecutive_error_num = 0usize;
    let mut check_num = 0usize;
    let mut iteration = 0usize;

    while iteration < max_react {
        ctx.task().check_aborted().await?;

        if let Some(value) = ctx.task().force_stop() {
            debug!(agent = %agent.name(), "Force stop before model call");
            return Ok(value);
        }

        if let Some(client) = agent.tool_discovery() {
            if agent.refresh_remote_tools(iteration) {
                match refresh_remote_tools(ctx, &client, &messages, &remote_tools).await {
                    Ok(refreshed) => {
                        remote_tools = refreshed;
                        tools = base_tools.clone();
                        tools.extend(remote_tools.iter().cloned());
                    }
                    Err(err) if err.is_abort() => return Err(err),
                    Err(err) => warn!(error = %err, "Remote tool refresh failed"),
                }
            }
        }

        prune_large_content(
            &mut messages,
            ctx.task().max_dialogue_img_file_num(),
            ctx.task().large_text_length(),
        );

        let results = match call_model(
            ctx,
            &provider,
            &mut messages,
            &tools.to_schemas(),
            &TurnOptions::default(),
        )
        .await
        {
            Ok(results) => results,
            // A per-step abort (pause) cuts the stream read short but does
            // not end the run: wait out the pause and retry the turn.
            Err(err) if err.is_abort() && !ctx.task().is_aborted() => {
                debug!(agent = %agent.name(), "Step aborted; waiting for resume");
                ctx.task().check_aborted().await?;
                continue;
            }
            Err(err) => return Err(err),
        };

        if let Some(value) = ctx.task().force_stop() {
            debug!(agent = %agent.name(), "Force stop after model call");
            return Ok(value);
        }

        let outcome = match handle_step_results(
            ctx,
            results,
            &tools,
            &mut messages,
            &mut consecutive_error_num,
        )
        .await
        {
            Ok(outcome) => outcome,
            // A paused tool execution leaves the assistant turn unanswered;
            // repair the buffer, wait out the pause, and keep looping.
            Err(err) if err.is_abort() && !ctx.task().is_aborted() => {
                fix_discontinuous(&mut messages);
                ctx.task().check_aborted().await?;
                continue;
            }
            Err(err) => return Err(err),
        };

        if let StepOutcome::Final(text) = outcome {
            if ctx.task().expert_mode() && check_num == 0 {
                // The completion check runs once per agent run: a second
                // incomplete answer is returned unchecked.
                check_num += 1;
                if let Some(reason) = result_check(ctx, &provider, &messages).await? {
                    debug!(agent = %agent.name(), %reason, "Answer judged incomplete");
                    messages.push(Message::user(format!(
                        "The task is not complete yet: {reason}\nContinue working."
                    )));
                    continue;
                }
            }
            info!(agent = %agent.name(), steps = iteration + 1, "Agent run completed");
            return Ok(text);
        }

        let todo_period = ctx.task().expert_mode_todo_loop_num();
        if ctx.task().expert_mode() && (iteration + 1) % todo_period == 0 {
            if let Err(err) = todo_maintenance(ctx, &provider, &mut messages).await {
                if err.is_abort() && ctx.task().is_aborted() {
                    return Err(err);
                }
                warn!(error = %err, "Todo maintenance failed");
            }
        }

        iteration += 1;
    }

    warn!(agent = %agent.name(), max_react, "Iteration cap reached");
    Ok("Unfinished".to_owned())
}

/// Fetch remote tool schemas and merge them with the remote tools already
/// used in the conversation (kept so their history stays resolvable).
async fn refresh_remote_tools(
    ctx: &AgentContext,
    client: &Arc<dyn crate::discovery::ToolDiscovery>,
    messages: &[Message],
    current: &[BoxedTool],
) -> Result<Vec<BoxedTool>> {
    let agent = ctx.agent();
    let signal = ctx.task().signal();
    let params = serde_json::json!({
        "taskPrompt": ctx.task().task_prompt(),
        "nodeTask": ctx.node().map(|n| n.task.clone()),
        "agent": agent.name(),
    });
    let schemas = client.list_tools(&params, &signal).await?;

    let used = used_tool_names(messages);
    let mut merged: Vec<BoxedTool> = current
        .iter()
        .filter(|tool| used.contains(&tool.name()))
        .cloned()
        .collect();
    for schema in schemas {
        if !merged.iter().any(|t| t.name() == schema.name) {
            merged.push(Arc::new(RemoteTool::new(
                schema,
                Arc::clone(client),
                agent.ext_info(),
            )));
        }
    }
    debug!(count = merged.len(), "Remote tools refreshed");
    Ok(merged)
}

/// Expert-mode completion check. Returns `None` when the answer stands, or
/// the model's reason when it judged the task incomplete.
async fn result_check(
    ctx: &AgentContext,
    provider: &Arc<dyn Provider>,
    messages: &[Message],
) -> Result<Option<String>> {
    let mut request_messages = messages.to_vec();
    request_messages.push(Message::user(prompts::RESULT_CHECK_REQUEST));
    let options = TurnOptions {
        tool_choice: Some(ToolChoice::tool("task_result_check")),
        no_compress: true,
    };
    let parts = call_model(
        ctx,
        provider,
        &mut request_messages,
        &[task_result_check_schema()],
        &options,
    )
    .await?;

    let Some(call) = parts
        .iter()
        .filter_map(ContentPart::as_tool_call)
        .find(|c| c.tool_name == "task_result_check")
    else {
        return Ok(None);
    };
    let args: TaskResultCheckArgs = parse_args("task_result_check", call.input.clone())?;
    if args.completed {
        Ok(None)
    } else {
        let reason = if args.reason.is_empty() {
            "the answer does not cover the whole task".to_owned()
        } else {
            args.reason
        };
        Ok(Some(reason))
    }
}

/// Expert-mode todo maintenance: force a `todo_list_manager` call and fold
/// the updated list back into the variables and the conversation.
async fn todo_maintenance(
    ctx: &AgentContext,
    provider: &Arc<dyn Provider>,
    messages: &mut Vec<Message>,
) -> Result<()> {
    let mut request_messages = messages.clone();
    request_messages.push(Message::user(prompts::TODO_MAINTENANCE_REQUEST));
    let options = TurnOptions {
        tool_choice: Some(ToolChoice::tool("todo_list_manager")),
        no_compress: true,
    };
    let parts = call_model(
        ctx,
        provider,
        &mut request_messages,
        &[todo_list_manager_schema()],
        &options,
    )
    .await?;

    if let Some(call) = parts
        .iter()
        .filter_map(ContentPart::as_tool_call)
        .find(|c| c.tool_name == "todo_list_manager")
    {
        let args: TodoListManagerArgs = parse_args("todo_list_manager", call.input.clone())?;
        apply_todo_update(ctx, &args);
        messages.push(Message::user(format!(
            "Updated todo list:\n{}",
            args.todo_list
        )));
    }
    Ok(())
}
