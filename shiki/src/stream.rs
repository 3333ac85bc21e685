//! Provider stream event grammar.
//!
//! A provider response is a lazy, finite sequence of [`StreamEvent`]s. The
//! turn engine demultiplexes these into accumulated text, reasoning, and
//! tool-call intents; ordering within one stream id is always
//! start → delta* → end.

use serde::{Deserialize, Serialize};

use crate::usage::Usage;

/// One event of a provider response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[non_exhaustive]
pub enum StreamEvent {
    /// A text stream begins.
    TextStart,
    /// Incremental text content.
    TextDelta {
        /// The text increment.
        delta: String,
    },
    /// The text stream ends.
    TextEnd,
    /// A reasoning stream begins.
    ReasoningStart,
    /// Incremental reasoning content.
    ReasoningDelta {
        /// The reasoning increment.
        delta: String,
    },
    /// The reasoning stream ends.
    ReasoningEnd,
    /// A tool call's argument stream begins.
    ToolInputStart {
        /// Tool call id.
        id: String,
        /// Name of the tool being called.
        #[serde(rename = "toolName")]
        tool_name: String,
    },
    /// Incremental tool call arguments (JSON text).
    ToolInputDelta {
        /// Tool call id.
        id: String,
        /// Partial JSON arguments.
        delta: String,
    },
    /// A complete tool call.
    ToolCall {
        /// Tool call id.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// Name of the tool being called.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// Complete arguments as a JSON string.
        input: String,
    },
    /// A file payload produced by the model.
    File {
        /// MIME type of the file.
        #[serde(rename = "mediaType")]
        media_type: String,
        /// File data (base64 or URL).
        data: String,
    },
    /// A provider-reported error.
    Error {
        /// The error payload.
        error: serde_json::Value,
    },
    /// The stream is complete.
    Finish {
        /// Why the model stopped.
        #[serde(rename = "finishReason")]
        finish_reason: FinishReason,
        /// Token usage for the turn.
        usage: Usage,
    },
}

impl StreamEvent {
    /// Create a text-delta event.
    #[must_use]
    pub fn text_delta(delta: impl Into<String>) -> Self {
        Self::TextDelta {
            delta: delta.into(),
        }
    }

    /// Create a complete tool-call event.
    #[must_use]
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self::ToolCall {
            tool_call_id: id.into(),
            tool_name: name.into(),
            input: input.into(),
        }
    }

    /// Create a finish event.
    #[must_use]
    pub const fn finish(finish_reason: FinishReason, usage: Usage) -> Self {
        Self::Finish {
            finish_reason,
            usage,
        }
    }
}

/// Reason why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum FinishReason {
    /// Natural stop (end of response).
    #[default]
    Stop,
    /// Maximum token limit reached.
    Length,
    /// Content was filtered by safety systems.
    ContentFilter,
    /// Model decided to call tools.
    ToolCalls,
    /// The provider reported an error finish.
    Error,
    /// Any other provider-specific reason.
    Other,
}

impl FinishReason {
    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ContentFilter => "content-filter",
            Self::ToolCalls => "tool-calls",
            Self::Error => "error",
            Self::Other => "other",
        }
    }

    /// Returns `true` if the model was cut off due to length.
    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        matches!(self, Self::Length)
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_uses_kebab_case_tags() {
        let event = StreamEvent::ToolInputStart {
            id: "t1".into(),
            tool_name: "add".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("tool-input-start"));
        assert!(json.contains("toolName"));
    }

    #[test]
    fn finish_roundtrip() {
        let event = StreamEvent::finish(FinishReason::Length, Usage::new(10, 20));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("finishReason"));
        let parsed: StreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn finish_reason_strings() {
        assert_eq!(FinishReason::Stop.as_str(), "stop");
        assert_eq!(FinishReason::ContentFilter.as_str(), "content-filter");
        assert!(FinishReason::Length.is_truncated());
        assert!(!FinishReason::Stop.is_truncated());
    }
}
