//! Message types for agent-model communication.
//!
//! The conversation model is parts-based: user and assistant messages carry
//! an ordered list of [`ContentPart`]s (text, file, reasoning, tool-call),
//! and tool messages carry an ordered list of [`ToolResultPart`]s. The
//! working buffer maintained by the turn engine upholds three invariants:
//!
//! 1. the buffer starts with a user message after the system message;
//! 2. every assistant message holding tool-call parts is immediately
//!    followed by a tool message with matching results, in the same order;
//! 3. no two consecutive user messages are identical.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing instructions.
    System,
    /// User message.
    User,
    /// Assistant (model) message.
    Assistant,
    /// Tool results message.
    Tool,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool invocation emitted by the model but not yet executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    /// Unique identifier for this tool call.
    #[serde(rename = "toolCallId")]
    pub tool_call_id: String,
    /// Name of the tool being called.
    #[serde(rename = "toolName")]
    pub tool_name: String,
    /// Parsed call arguments.
    pub input: Value,
}

impl ToolCallPart {
    /// Create a new tool call part.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            tool_call_id: id.into(),
            tool_name: name.into(),
            input,
        }
    }
}

/// One ordered part of a user or assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// A file payload (base64 data or URL), e.g. an image or document.
    File {
        /// File data (base64 or URL), passed through opaquely.
        data: String,
        /// MIME type of the file.
        #[serde(rename = "mediaType")]
        media_type: String,
    },
    /// Model reasoning content.
    Reasoning {
        /// The reasoning text.
        text: String,
    },
    /// A tool invocation.
    ToolCall(ToolCallPart),
}

impl ContentPart {
    /// Create a text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a file part.
    #[must_use]
    pub fn file(data: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self::File {
            data: data.into(),
            media_type: media_type.into(),
        }
    }

    /// Create a reasoning part.
    #[must_use]
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning { text: text.into() }
    }

    /// Create a tool-call part.
    #[must_use]
    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self::ToolCall(ToolCallPart::new(id, name, input))
    }

    /// Get the text if this is a text part.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Get the tool call if this is a tool-call part.
    #[must_use]
    pub const fn as_tool_call(&self) -> Option<&ToolCallPart> {
        match self {
            Self::ToolCall(call) => Some(call),
            _ => None,
        }
    }

    /// Returns `true` if this part is an image file.
    #[must_use]
    pub fn is_image_file(&self) -> bool {
        matches!(self, Self::File { media_type, .. } if media_type.starts_with("image/"))
    }

    /// Returns `true` if this part is a non-image file.
    #[must_use]
    pub fn is_other_file(&self) -> bool {
        matches!(self, Self::File { media_type, .. } if !media_type.starts_with("image/"))
    }
}

/// One piece of content inside a tool execution result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResultContent {
    /// Text output.
    Text {
        /// The text content.
        text: String,
    },
    /// Media output (image, audio, ...).
    Media {
        /// MIME type of the media.
        #[serde(rename = "mimeType")]
        mime_type: String,
        /// Media data (base64 or URL), passed through opaquely.
        data: String,
    },
}

impl ResultContent {
    /// Create a text content piece.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a media content piece.
    #[must_use]
    pub fn media(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Media {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

/// The result of executing a tool locally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Ordered result content.
    pub content: Vec<ResultContent>,
    /// Whether the tool reported an error.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful single-text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ResultContent::text(text)],
            is_error: false,
        }
    }

    /// Create an error single-text result.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ResultContent::text(text)],
            is_error: true,
        }
    }

    /// Create a result from content pieces.
    #[must_use]
    pub const fn content(content: Vec<ResultContent>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }
}

/// Tool output in the provider wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ToolOutput {
    /// Plain text output.
    Text {
        /// The text value.
        value: String,
    },
    /// Error text output.
    ErrorText {
        /// The error text value.
        value: String,
    },
    /// Structured JSON output.
    Json {
        /// The JSON value.
        value: Value,
    },
    /// Structured JSON error output.
    ErrorJson {
        /// The JSON value.
        value: Value,
    },
    /// Mixed content output (text and media pieces).
    Content {
        /// The ordered content pieces.
        value: Vec<ResultContent>,
    },
}

impl ToolOutput {
    /// Create a text output.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
        }
    }

    /// Create an error-text output.
    #[must_use]
    pub fn error_text(value: impl Into<String>) -> Self {
        Self::ErrorText {
            value: value.into(),
        }
    }

    /// Returns `true` if this output reports an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::ErrorText { .. } | Self::ErrorJson { .. })
    }
}

/// One entry of a tool message: the result for a single tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPart {
    /// Id of the tool call this result answers.
    #[serde(rename = "toolCallId")]
    pub tool_call_id: String,
    /// Name of the tool.
    #[serde(rename = "toolName")]
    pub tool_name: String,
    /// The converted output.
    pub output: ToolOutput,
}

impl ToolResultPart {
    /// Create a new tool result part.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, output: ToolOutput) -> Self {
        Self {
            tool_call_id: id.into(),
            tool_name: name.into(),
            output,
        }
    }
}

/// Role-dependent message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Ordered parts (system/user/assistant).
    Parts(Vec<ContentPart>),
    /// Ordered tool results (tool role).
    ToolResults(Vec<ToolResultPart>),
}

/// A chat message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender.
    pub role: Role,
    /// Content of the message.
    pub content: MessageContent,
    /// Opaque provider-specific options (e.g. cache control), never parsed.
    #[serde(rename = "providerOptions", skip_serializing_if = "Option::is_none")]
    pub provider_options: Option<Value>,
}

impl Message {
    /// Create a message with the given role and parts.
    #[must_use]
    pub const fn with_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: MessageContent::Parts(parts),
            provider_options: None,
        }
    }

    /// Create a new system message.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_parts(Role::System, vec![ContentPart::text(text)])
    }

    /// Create a new single-text user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_parts(Role::User, vec![ContentPart::text(text)])
    }

    /// Create a new user message from parts.
    #[must_use]
    pub const fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::with_parts(Role::User, parts)
    }

    /// Create a new single-text assistant message.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_parts(Role::Assistant, vec![ContentPart::text(text)])
    }

    /// Create a new assistant message from parts.
    #[must_use]
    pub const fn assistant_parts(parts: Vec<ContentPart>) -> Self {
        Self::with_parts(Role::Assistant, parts)
    }

    /// Create a new tool message from result parts.
    #[must_use]
    pub const fn tool(results: Vec<ToolResultPart>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResults(results),
            provider_options: None,
        }
    }

    /// The ordered parts, if this is a system/user/assistant message.
    #[must_use]
    pub fn parts(&self) -> Option<&[ContentPart]> {
        match &self.content {
            MessageContent::Parts(parts) => Some(parts),
            MessageContent::ToolResults(_) => None,
        }
    }

    /// Mutable access to the ordered parts.
    #[must_use]
    pub fn parts_mut(&mut self) -> Option<&mut Vec<ContentPart>> {
        match &mut self.content {
            MessageContent::Parts(parts) => Some(parts),
            MessageContent::ToolResults(_) => None,
        }
    }

    /// The tool result parts, if this is a tool message.
    #[must_use]
    pub fn tool_results(&self) -> Option<&[ToolResultPart]> {
        match &self.content {
            MessageContent::ToolResults(results) => Some(results),
            MessageContent::Parts(_) => None,
        }
    }

    /// Mutable access to the tool result parts.
    #[must_use]
    pub fn tool_results_mut(&mut self) -> Option<&mut Vec<ToolResultPart>> {
        match &mut self.content {
            MessageContent::ToolResults(results) => Some(results),
            MessageContent::Parts(_) => None,
        }
    }

    /// Concatenated text of all text parts.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(ContentPart::as_text)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }

    /// The tool-call parts of an assistant message, in order.
    #[must_use]
    pub fn tool_calls(&self) -> Vec<&ToolCallPart> {
        self.parts()
            .map(|parts| parts.iter().filter_map(ContentPart::as_tool_call).collect())
            .unwrap_or_default()
    }

    /// Returns `true` if this message contains at least one tool-call part.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod construction {
        use super::*;

        #[test]
        fn system_message_has_single_text_part() {
            let msg = Message::system("You are helpful.");
            assert_eq!(msg.role, Role::System);
            assert_eq!(msg.text(), "You are helpful.");
        }

        #[test]
        fn tool_message_carries_results() {
            let msg = Message::tool(vec![ToolResultPart::new(
                "t1",
                "add",
                ToolOutput::text("3"),
            )]);
            assert_eq!(msg.role, Role::Tool);
            assert_eq!(msg.tool_results().map(<[ToolResultPart]>::len), Some(1));
            assert!(msg.parts().is_none());
        }

        #[test]
        fn assistant_with_tool_calls() {
            let msg = Message::assistant_parts(vec![
                ContentPart::text("calling"),
                ContentPart::tool_call("t1", "add", serde_json::json!({"a": 1})),
            ]);
            assert!(msg.has_tool_calls());
            let calls = msg.tool_calls();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].tool_name, "add");
        }
    }

    mod parts {
        use super::*;

        #[test]
        fn image_and_file_classification() {
            let img = ContentPart::file("data", "image/png");
            let pdf = ContentPart::file("data", "application/pdf");
            assert!(img.is_image_file());
            assert!(!img.is_other_file());
            assert!(pdf.is_other_file());
            assert!(!pdf.is_image_file());
        }

        #[test]
        fn text_joins_text_parts_only() {
            let msg = Message::user_parts(vec![
                ContentPart::text("a"),
                ContentPart::file("d", "image/png"),
                ContentPart::text("b"),
            ]);
            assert_eq!(msg.text(), "a\nb");
        }
    }

    mod serde_format {
        use super::*;

        #[test]
        fn tool_call_part_uses_camel_case_keys() {
            let part = ContentPart::tool_call("t1", "add", serde_json::json!({}));
            let json = serde_json::to_string(&part).unwrap();
            assert!(json.contains("toolCallId"));
            assert!(json.contains("toolName"));
            assert!(json.contains("tool-call"));
        }

        #[test]
        fn tool_output_tags_are_kebab_case() {
            let output = ToolOutput::error_text("boom");
            let json = serde_json::to_string(&output).unwrap();
            assert!(json.contains("error-text"));
        }

        #[test]
        fn message_roundtrip() {
            let msg = Message::assistant_parts(vec![
                ContentPart::text("hi"),
                ContentPart::tool_call("t1", "add", serde_json::json!({"a": 1, "b": 2})),
            ]);
            let json = serde_json::to_string(&msg).unwrap();
            let parsed: Message = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, msg);
        }
    }

    mod equality {
        use super::*;

        #[test]
        fn identical_user_messages_compare_equal() {
            assert_eq!(Message::user("same"), Message::user("same"));
            assert_ne!(Message::user("same"), Message::user("different"));
        }
    }
}
