//! The stream turn engine: one streaming LLM request.
//!
//! A turn demultiplexes the provider event stream into accumulated text,
//! reasoning, and tool-call intents, publishing observer events along the
//! way, and returns the ordered parts `text? + tool-call*`. Failures are
//! retried with quadratic backoff up to the retry cap; a `length` finish or
//! an "is too long" transport error compresses the working buffer first.
//!
//! Cancellation: every attempt registers a per-step abort controller and
//! races the provider stream against both the task signal and the step
//! signal, so a pause-with-abort cuts the read short without ending the
//! task. The stream reader is dropped on every exit path.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tracing::{debug, warn};

use crate::callback::CallbackEvent;
use crate::context::{AgentContext, StepGuard};
use crate::error::{Error, Result};
use crate::memory::{
    estimate_messages, first_tool_index, fix_discontinuous, splice_snapshot, trim_to_last_tool,
    truncate_large_parts,
};
use crate::memory::compress::used_tool_names;
use crate::message::{ContentPart, Message, ResultContent, ToolCallPart, ToolResult};
use crate::prompts;
use crate::provider::{Provider, ProviderRequest, ToolChoice};
use crate::stream::{FinishReason, StreamEvent};
use crate::tool::builtin::{TaskSnapshotArgs, execute_task_snapshot, task_snapshot_schema};
use crate::tool::{FunctionTool, parse_args};

/// Options of one assistant step.
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    /// Force a tool choice (e.g. the snapshot call). Also suppresses the
    /// user-intervention drain.
    pub tool_choice: Option<ToolChoice>,
    /// Disable compression for this step (prevents re-entrant compression).
    pub no_compress: bool,
}

/// Run one streaming turn and return the ordered result parts.
///
/// Retries transient stream failures with `300·(n+1)²` ms backoff up to the
/// configured cap; compresses and retries on a `length` finish. Cancellation
/// is never retried.
pub async fn call_model(
    ctx: &AgentContext,
    provider: &Arc<dyn Provider>,
    messages: &mut Vec<Message>,
    tools: &[FunctionTool],
    options: &TurnOptions,
) -> Result<Vec<ContentPart>> {
    let max_retry = ctx.task().max_retry_num();
    let mut retry_num = 0usize;

    loop {
        if !options.no_compress && should_compress(ctx, messages, tools) {
            compress_agent_messages(ctx, provider, messages, tools).await?;
        }

        if options.tool_choice.is_none() {
            let interventions = ctx.task().take_conversation();
            if !interventions.is_empty() {
                debug!(count = interventions.len(), "Draining user interventions");
                messages.push(Message::user(prompts::intervention_message(&interventions)));
            }
        }

        let step = ctx.task().register_step();
        let request = ProviderRequest {
            messages: messages.clone(),
            tools: tools.to_vec(),
            tool_choice: options.tool_choice.clone(),
            abort: step.signal().clone(),
            max_tokens: None,
            temperature: None,
            provider_options: None,
        };
        ctx.chain().set_request(request.clone());
        ctx.emit(CallbackEvent::LlmRequestStart {
            message_count: request.messages.len(),
        })
        .await;

        let outcome = run_stream(ctx, provider, request, &step).await;
        drop(step);

        match outcome {
            Ok((parts, finish_reason)) => {
                if finish_reason == Some(FinishReason::Length)
                    && messages.len() >= 5
                    && !options.no_compress
                    && retry_num < max_retry
                {
                    debug!(retry_num, "Length finish; compressing and retrying");
                    compress_agent_messages(ctx, provider, messages, tools).await?;
                    retry_num += 1;
                    continue;
                }
                return Ok(parts);
            }
            Err(err) if err.is_abort() => return Err(err),
            Err(err) => {
                if retry_num >= max_retry {
                    return Err(err);
                }
                let backoff = 300 * ((retry_num as u64) + 1).pow(2);
                warn!(error = %err, retry_num, backoff_ms = backoff, "Stream failed; retrying");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                if err.to_string().contains("is too long") && !options.no_compress {
                    compress_agent_messages(ctx, provider, messages, tools).await?;
                }
                retry_num += 1;
            }
        }
    }
}

fn should_compress(ctx: &AgentContext, messages: &[Message], tools: &[FunctionTool]) -> bool {
    let task = ctx.task();
    messages.len() >= task.compress_threshold()
        || (messages.len() >= 10
            && estimate_messages(messages, tools) >= task.compress_tokens_threshold())
}

/// A tool-call intent still accreting its argument text.
struct OpenIntent {
    id: String,
    name: String,
    args_text: String,
}

fn parse_intent_input(input: &str) -> serde_json::Value {
    if input.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(input).unwrap_or_else(|_| serde_json::json!({}))
}

/// Consume one provider stream. Returns the ordered parts and the finish
/// reason (when a `finish` event arrived).
async fn run_stream(
    ctx: &AgentContext,
    provider: &Arc<dyn Provider>,
    request: ProviderRequest,
    step: &StepGuard,
) -> Result<(Vec<ContentPart>, Option<FinishReason>)> {
    let task_signal = ctx.task().signal();
    let step_signal = step.signal().clone();

    let mut stream = provider.stream(request).await?;

    let mut stream_text = String::new();
    let mut think_text = String::new();
    let mut text_open = false;
    let mut seg_start = 0usize;
    let mut text_counter = 0usize;
    let mut think_open = false;
    let mut think_seg_start = 0usize;
    let mut think_counter = 0usize;
    let mut open_intents: Vec<OpenIntent> = Vec::new();
    let mut tool_parts: Vec<ToolCallPart> = Vec::new();
    let mut finish_reason: Option<FinishReason> = None;

    loop {
        let event = tokio::select! {
            reason = task_signal.aborted() => return Err(Error::aborted(reason)),
            reason = step_signal.aborted() => return Err(Error::aborted(reason)),
            event = stream.next() => event,
        };
        let Some(event) = event else { break };
        let event = event?;

        match event {
            StreamEvent::TextStart => {
                if !text_open {
                    text_open = true;
                    seg_start = stream_text.len();
                    text_counter += 1;
                }
                ctx.emit(CallbackEvent::Text {
                    stream_id: text_counter.to_string(),
                    text: String::new(),
                    stream_done: false,
                })
                .await;
            }
            StreamEvent::TextDelta { delta } => {
                if !text_open {
                    text_open = true;
                    seg_start = stream_text.len();
                    text_counter += 1;
                }
                stream_text.push_str(&delta);
                ctx.emit(CallbackEvent::Text {
                    stream_id: text_counter.to_string(),
                    text: delta,
                    stream_done: false,
                })
                .await;
                // Text resumed while a tool intent was still open: the
                // provider will not finalize it, so seal it now.
                seal_open_intents(ctx, &mut open_intents, &mut tool_parts).await;
            }
            StreamEvent::TextEnd => {
                if text_open {
                    text_open = false;
                    ctx.emit(CallbackEvent::Text {
                        stream_id: text_counter.to_string(),
                        text: stream_text[seg_start..].to_owned(),
                        stream_done: true,
                    })
                    .await;
                }
            }
            StreamEvent::ReasoningStart => {
                if !think_open {
                    think_open = true;
                    think_seg_start = think_text.len();
                    think_counter += 1;
                }
                ctx.emit(CallbackEvent::Reasoning {
                    stream_id: think_counter.to_string(),
                    text: String::new(),
                    stream_done: false,
                })
                .await;
            }
            StreamEvent::ReasoningDelta { delta } => {
                if !think_open {
                    think_open = true;
                    think_seg_start = think_text.len();
                    think_counter += 1;
                }
                think_text.push_str(&delta);
                ctx.emit(CallbackEvent::Reasoning {
                    stream_id: think_counter.to_string(),
                    text: delta,
                    stream_done: false,
                })
                .await;
            }
            StreamEvent::ReasoningEnd => {
                if think_open {
                    think_open = false;
                    ctx.emit(CallbackEvent::Reasoning {
                        stream_id: think_counter.to_string(),
                        text: think_text[think_seg_start..].to_owned(),
                        stream_done: true,
                    })
                    .await;
                }
            }
            StreamEvent::ToolInputStart { id, tool_name } => {
                let known = open_intents.iter().any(|i| i.id == id)
                    || tool_parts.iter().any(|p| p.tool_call_id == id);
                if !known {
                    open_intents.push(OpenIntent {
                        id,
                        name: tool_name,
                        args_text: String::new(),
                    });
                }
            }
            StreamEvent::ToolInputDelta { id, delta } => {
                // A tool argument stream seals any still-pending text.
                if text_open {
                    text_open = false;
                    ctx.emit(CallbackEvent::Text {
                        stream_id: text_counter.to_string(),
                        text: stream_text[seg_start..].to_owned(),
                        stream_done: true,
                    })
                    .await;
                }
                if let Some(intent) = open_intents.iter_mut().find(|i| i.id == id) {
                    intent.args_text.push_str(&delta);
                    ctx.emit(CallbackEvent::ToolStreaming {
                        tool_call_id: intent.id.clone(),
                        tool_name: intent.name.clone(),
                        params_delta: delta,
                    })
                    .await;
                }
            }
            StreamEvent::ToolCall {
                tool_call_id,
                tool_name,
                input,
            } => {
                let input = parse_intent_input(&input);
                if let Some(pos) = open_intents.iter().position(|i| i.id == tool_call_id) {
                    open_intents.remove(pos);
                }
                let part = ToolCallPart::new(tool_call_id, tool_name, input);
                ctx.emit(CallbackEvent::ToolUse {
                    tool_call_id: part.tool_call_id.clone(),
                    tool_name: part.tool_name.clone(),
                    params: part.input.clone(),
                })
                .await;
                tool_parts.push(part);
            }
            StreamEvent::File { media_type, data } => {
                ctx.emit(CallbackEvent::File { media_type, data }).await;
            }
            StreamEvent::Error { error } => {
                ctx.emit(CallbackEvent::Error {
                    error: error.clone(),
                })
                .await;
                return Err(Error::model(error.to_string()));
            }
            StreamEvent::Finish {
                finish_reason: reason,
                usage,
            } => {
                if text_open {
                    text_open = false;
                    ctx.emit(CallbackEvent::Text {
                        stream_id: text_counter.to_string(),
                        text: stream_text[seg_start..].to_owned(),
                        stream_done: true,
                    })
                    .await;
                }
                seal_open_intents(ctx, &mut open_intents, &mut tool_parts).await;
                ctx.emit(CallbackEvent::LlmResponseFinished {
                    finish_reason: reason,
                    usage,
                })
                .await;
                finish_reason = Some(reason);
                break;
            }
        }
    }

    let mut parts: Vec<ContentPart> = Vec::with_capacity(tool_parts.len() + 1);
    if !stream_text.is_empty() {
        parts.push(ContentPart::text(stream_text));
    }
    parts.extend(tool_parts.into_iter().map(ContentPart::ToolCall));
    Ok((parts, finish_reason))
}

/// Finalize every still-open tool intent in order.
async fn seal_open_intents(
    ctx: &AgentContext,
    open_intents: &mut Vec<OpenIntent>,
    tool_parts: &mut Vec<ToolCallPart>,
) {
    for intent in open_intents.drain(..) {
        let input = parse_intent_input(&intent.args_text);
        let part = ToolCallPart::new(intent.id, intent.name, input);
        ctx.emit(CallbackEvent::ToolUse {
            tool_call_id: part.tool_call_id.clone(),
            tool_name: part.tool_name.clone(),
            params: part.input.clone(),
        })
        .await;
        tool_parts.push(part);
    }
}

fn result_text(result: &ToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|piece| match piece {
            ResultContent::Text { text } => Some(text.as_str()),
            ResultContent::Media { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compress the working buffer around a model-produced snapshot.
///
/// Trims to the last complete tool cycle, truncates oversized payloads,
/// forces a `task_snapshot` call against the tools actually used so far,
/// executes it locally, and splices the middle of the buffer down to the
/// single snapshot user message.
pub(crate) async fn compress_agent_messages(
    ctx: &AgentContext,
    provider: &Arc<dyn Provider>,
    messages: &mut Vec<Message>,
    tools: &[FunctionTool],
) -> Result<()> {
    if messages.len() < 5 {
        return Ok(());
    }
    let Some(last) = trim_to_last_tool(messages) else {
        return Ok(());
    };
    let Some(first) = first_tool_index(messages) else {
        return Ok(());
    };
    if last <= first {
        return Ok(());
    }

    truncate_large_parts(messages, ctx.task().large_text_length());

    let mut synthetic: Vec<FunctionTool> = used_tool_names(messages)
        .iter()
        .filter_map(|name| tools.iter().find(|t| &t.name == name).cloned())
        .collect();
    synthetic.push(task_snapshot_schema());

    let mut request_messages = messages.clone();
    request_messages.push(Message::user(prompts::SNAPSHOT_REQUEST));
    let options = TurnOptions {
        tool_choice: Some(ToolChoice::tool("task_snapshot")),
        no_compress: true,
    };
    let parts = Box::pin(call_model(
        ctx,
        provider,
        &mut request_messages,
        &synthetic,
        &options,
    ))
    .await?;

    let Some(call) = parts
        .iter()
        .filter_map(ContentPart::as_tool_call)
        .find(|c| c.tool_name == "task_snapshot")
    else {
        warn!("Compression turn produced no task_snapshot call; skipping splice");
        return Ok(());
    };
    let args: TaskSnapshotArgs = parse_args("task_snapshot", call.input.clone())?;
    let snapshot = execute_task_snapshot(ctx.node(), &args);

    debug!(first, last, "Splicing compressed history");
    splice_snapshot(messages, first, last, Message::user(result_text(&snapshot)));
    fix_discontinuous(messages);
    Ok(())
}
