//! Tagged callback payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ToolResult;
use crate::stream::FinishReason;
use crate::usage::Usage;

/// One lifecycle or streaming event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum CallbackEvent {
    /// A task was created and planned.
    TaskStart {
        /// The planned workflow as XML.
        workflow_xml: String,
    },
    /// An in-flight (tolerant) parse of the plan succeeded while streaming.
    PlanProcess {
        /// The partially planned workflow as XML.
        workflow_xml: String,
        /// `false` while the plan stream is still running.
        done: bool,
    },
    /// The workflow was modified by a replan.
    WorkflowModified {
        /// The updated workflow as XML.
        workflow_xml: String,
    },
    /// An agent run begins.
    AgentStart {
        /// The node task text driving this run.
        task: String,
    },
    /// An agent run finished.
    AgentResult {
        /// The agent's final text, or the error message.
        result: String,
        /// Whether the run failed.
        is_error: bool,
    },
    /// One LLM streaming request is about to start.
    LlmRequestStart {
        /// Number of messages in the request.
        message_count: usize,
    },
    /// Streaming text.
    Text {
        /// Stream id within the current turn.
        stream_id: String,
        /// The delta while streaming, or the full text when done.
        text: String,
        /// Whether the text stream is sealed.
        stream_done: bool,
    },
    /// Streaming reasoning.
    Reasoning {
        /// Stream id within the current turn.
        stream_id: String,
        /// The delta while streaming, or the full text when done.
        text: String,
        /// Whether the reasoning stream is sealed.
        stream_done: bool,
    },
    /// Streaming tool-call arguments.
    ToolStreaming {
        /// Tool call id.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Partial JSON arguments.
        params_delta: String,
    },
    /// A complete tool-call intent.
    ToolUse {
        /// Tool call id.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Parsed arguments.
        params: Value,
    },
    /// A tool finished executing.
    ToolResult {
        /// Tool call id.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Parsed arguments.
        params: Value,
        /// The execution result.
        result: ToolResult,
    },
    /// A file payload produced by the model.
    File {
        /// MIME type.
        media_type: String,
        /// File data (base64 or URL).
        data: String,
    },
    /// A provider-reported stream error.
    Error {
        /// The error payload.
        error: Value,
    },
    /// One LLM streaming turn finished.
    LlmResponseFinished {
        /// Why the model stopped.
        finish_reason: FinishReason,
        /// Token usage of the turn.
        usage: Usage,
    },
    /// The task finished.
    TaskFinished {
        /// `done`, `abort`, or `error`.
        stop_reason: String,
        /// The final result text or error message.
        result: String,
    },
}

/// A tagged callback message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackMessage {
    /// Id of the owning task.
    pub task_id: String,
    /// Name of the agent, when the event is agent-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Id of the workflow node, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// The event payload.
    #[serde(flatten)]
    pub event: CallbackEvent,
}

impl CallbackMessage {
    /// Create a message stamped with the current time.
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        agent_name: Option<String>,
        node_id: Option<String>,
        event: CallbackEvent,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_name,
            node_id,
            timestamp: now_millis(),
            event,
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
