//! Tool dispatch for one assistant step.
//!
//! Classifies the step output (final text vs. tool calls), executes the
//! calls serially or in parallel, and appends the assistant/tool messages
//! to the working buffer. Parallel dispatch preserves call order in the
//! resulting tool message, so tool-result parts match the assistant's
//! tool-call parts index for index.

use std::sync::Arc;

use tracing::{Instrument as _, debug, info_span, warn};

use crate::callback::CallbackEvent;
use crate::chain::ToolChain;
use crate::context::AgentContext;
use crate::error::{Error, Result};
use crate::message::{ContentPart, Message, ToolCallPart, ToolResult};
use crate::tool::{ToolSet, convert_tool_result};

/// Consecutive tool failures that fail the agent.
const MAX_CONSECUTIVE_ERRORS: usize = 10;

/// Outcome of handling one assistant step.
#[derive(Debug)]
pub(crate) enum StepOutcome {
    /// The step produced a final text answer.
    Final(String),
    /// Tools were executed (or there was nothing to do); keep looping.
    Continue,
}

/// Handle the parts returned by one assistant step.
pub(crate) async fn handle_step_results(
    ctx: &AgentContext,
    results: Vec<ContentPart>,
    tools: &ToolSet,
    messages: &mut Vec<Message>,
    consecutive_error_num: &mut usize,
) -> Result<StepOutcome> {
    if results.is_empty() {
        return Ok(StepOutcome::Continue);
    }

    let all_text = results
        .iter()
        .all(|part| matches!(part, ContentPart::Text { .. }));
    if all_text {
        let text = results
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n\n");
        messages.push(Message::assistant_parts(results));
        return Ok(StepOutcome::Final(text));
    }

    let calls: Vec<ToolCallPart> = results
        .iter()
        .filter_map(ContentPart::as_tool_call)
        .cloned()
        .collect();
    messages.push(Message::assistant_parts(results));

    let parallel = ctx.task().parallel_tool_calls()
        && ctx.agent().can_parallel_tool_calls()
        && calls.iter().all(|call| {
            tools
                .get(&call.tool_name)
                .is_some_and(|tool| tool.support_parallel_calls())
        });

    let executions: Vec<(ToolCallPart, Result<ToolResult>)> = if parallel && calls.len() > 1 {
        debug!(count = calls.len(), "Dispatching tool calls in parallel");
        let futures: Vec<_> = calls
            .iter()
            .map(|call| execute_one(ctx, tools, call))
            .collect();
        let outcomes = futures::future::join_all(futures).await;
        calls.into_iter().zip(outcomes).collect()
    } else {
        let mut outcomes = Vec::with_capacity(calls.len());
        for call in &calls {
            outcomes.push(execute_one(ctx, tools, call).await);
        }
        calls.into_iter().zip(outcomes).collect()
    };

    let multimodal = ctx.task().tool_result_multimodal();
    let mut result_parts = Vec::with_capacity(executions.len());
    let mut synthesized: Vec<Message> = Vec::new();

    for (call, outcome) in executions {
        let (result, failure) = match outcome {
            Ok(result) => {
                if result.is_error {
                    *consecutive_error_num += 1;
                } else {
                    *consecutive_error_num = 0;
                }
                (result, None)
            }
            Err(err) if err.is_abort() => return Err(err),
            Err(err) => {
                *consecutive_error_num += 1;
                (ToolResult::error(err.to_string()), Some(err))
            }
        };

        let tool_chain = Arc::new(ToolChain::new(
            &call.tool_call_id,
            &call.tool_name,
            call.input.clone(),
        ));
        ctx.chain().push_tool(Arc::clone(&tool_chain));
        tool_chain.set_result(result.clone());

        ctx.emit(CallbackEvent::ToolResult {
            tool_call_id: call.tool_call_id.clone(),
            tool_name: call.tool_name.clone(),
            params: call.input.clone(),
            result: result.clone(),
        })
        .await;

        if *consecutive_error_num >= MAX_CONSECUTIVE_ERRORS {
            let err = failure.unwrap_or_else(|| {
                Error::tool_execution(&call.tool_name, "too many consecutive tool errors")
            });
            warn!(tool = %call.tool_name, "Consecutive tool error limit reached");
            return Err(err);
        }

        result_parts.push(convert_tool_result(&call, &result, multimodal, &mut synthesized));
    }

    messages.push(Message::tool(result_parts));
    messages.extend(synthesized);
    Ok(StepOutcome::Continue)
}

/// Execute a single tool call. A missing tool becomes an error result;
/// execution failures and aborts propagate to the caller, which converts
/// failures into error results while counting them.
async fn execute_one(
    ctx: &AgentContext,
    tools: &ToolSet,
    call: &ToolCallPart,
) -> Result<ToolResult> {
    let span = info_span!(
        "tool",
        tool.name = %call.tool_name,
        tool.id = %call.tool_call_id,
    );
    async {
        let Some(tool) = tools.get(&call.tool_name) else {
            warn!(tool = %call.tool_name, "Tool not found");
            return Ok(ToolResult::error(format!(
                "{} tool does not exist",
                call.tool_name
            )));
        };
        match tool.execute(call.input.clone(), ctx, call).await {
            Ok(result) => Ok(result),
            Err(err) if err.is_abort() => Err(err),
            Err(err) => {
                warn!(tool = %call.tool_name, error = %err, "Tool execution failed");
                Err(Error::tool_execution(&call.tool_name, err.to_string()))
            }
        }
    }
    .instrument(span)
    .await
}
