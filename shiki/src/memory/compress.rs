//! Snapshot compression primitives.
//!
//! The turn engine compresses an oversized working buffer by asking the
//! model for a `task_snapshot` and splicing the middle of the buffer down
//! to one synthesized user message. The pure pieces live here: trimming to
//! the last complete tool cycle, large-text truncation with JSON prefix
//! recovery, used-tool gathering, and the splice itself.

use serde_json::Value;

use crate::message::{ContentPart, Message, ResultContent, Role, ToolOutput};

use super::working::truncate_text;

/// Index of the first tool-role message.
#[must_use]
pub fn first_tool_index(messages: &[Message]) -> Option<usize> {
    messages.iter().position(|m| m.role == Role::Tool)
}

/// Trim the buffer to end at the most recent tool-role message, so it
/// closes with a complete user→assistant→tool cycle. Returns the index of
/// that message, or `None` (buffer untouched) when there is none.
pub fn trim_to_last_tool(messages: &mut Vec<Message>) -> Option<usize> {
    let last = messages.iter().rposition(|m| m.role == Role::Tool)?;
    messages.truncate(last + 1);
    Some(last)
}

/// Truncate every oversized text payload beyond the first two messages.
///
/// Text and reasoning parts get head truncation with an ellipsis. JSON tool
/// outputs are truncated in serialized form with an attempt to recover a
/// parseable prefix; when recovery yields an almost-empty value the
/// truncated string is kept and the output downgrades to (error-)text.
pub fn truncate_large_parts(messages: &mut [Message], large_text_length: usize) {
    for message in messages.iter_mut().skip(2) {
        if let Some(parts) = message.parts_mut() {
            for part in parts.iter_mut() {
                match part {
                    ContentPart::Text { text } | ContentPart::Reasoning { text } => {
                        if text.chars().count() > large_text_length {
                            *text = truncate_text(text, large_text_length);
                        }
                    }
                    ContentPart::File { .. } | ContentPart::ToolCall(_) => {}
                }
            }
        } else if let Some(results) = message.tool_results_mut() {
            for result in results.iter_mut() {
                result.output = truncate_output(result.output.clone(), large_text_length);
            }
        }
    }
}

fn truncate_output(output: ToolOutput, limit: usize) -> ToolOutput {
    match output {
        ToolOutput::Text { value } => ToolOutput::Text {
            value: truncate_if_large(value, limit),
        },
        ToolOutput::ErrorText { value } => ToolOutput::ErrorText {
            value: truncate_if_large(value, limit),
        },
        ToolOutput::Json { value } => truncate_json(value, limit, false),
        ToolOutput::ErrorJson { value } => truncate_json(value, limit, true),
        ToolOutput::Content { value } => ToolOutput::Content {
            value: value
                .into_iter()
                .map(|piece| match piece {
                    ResultContent::Text { text } => ResultContent::Text {
                        text: truncate_if_large(text, limit),
                    },
                    media @ ResultContent::Media { .. } => media,
                })
                .collect(),
        },
    }
}

fn truncate_if_large(value: String, limit: usize) -> String {
    if value.chars().count() > limit {
        truncate_text(&value, limit)
    } else {
        value
    }
}

fn truncate_json(value: Value, limit: usize, is_error: bool) -> ToolOutput {
    let serialized = serde_json::to_string(&value).unwrap_or_default();
    if serialized.chars().count() <= limit {
        return if is_error {
            ToolOutput::ErrorJson { value }
        } else {
            ToolOutput::Json { value }
        };
    }
    let head: String = serialized.chars().take(limit).collect();
    if let Some(recovered) = recover_json_prefix(&head) {
        if !is_almost_empty(&recovered) {
            return if is_error {
                ToolOutput::ErrorJson { value: recovered }
            } else {
                ToolOutput::Json { value: recovered }
            };
        }
    }
    let text = format!("{head}...");
    if is_error {
        ToolOutput::ErrorText { value: text }
    } else {
        ToolOutput::Text { value: text }
    }
}

/// Try to turn a truncated JSON string back into a parseable value by
/// closing open strings/brackets, backing off over trailing partial tokens.
#[must_use]
pub fn recover_json_prefix(head: &str) -> Option<Value> {
    let mut candidate: &str = head;
    for _ in 0..256 {
        let trimmed = candidate.trim_end().trim_end_matches(',');
        if trimmed.is_empty() {
            return None;
        }
        if let Some(value) = try_close(trimmed) {
            return Some(value);
        }
        let (idx, _) = candidate.char_indices().next_back()?;
        candidate = &candidate[..idx];
    }
    None
}

/// Close unterminated strings and brackets, then parse.
fn try_close(prefix: &str) -> Option<Value> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in prefix.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
            }
            _ => {}
        }
    }
    let mut candidate = prefix.to_owned();
    if escaped {
        candidate.pop();
    }
    if in_string {
        candidate.push('"');
    }
    while let Some(closer) = stack.pop() {
        candidate = candidate.trim_end().trim_end_matches(',').to_owned();
        candidate.push(closer);
    }
    serde_json::from_str(&candidate).ok()
}

fn is_almost_empty(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

/// Gather the names of tools answered in tool-role messages, in first
/// appearance order.
#[must_use]
pub fn used_tool_names(messages: &[Message]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for message in messages {
        let Some(results) = message.tool_results() else {
            continue;
        };
        for result in results {
            if !names.iter().any(|n| n == &result.tool_name) {
                names.push(result.tool_name.clone());
            }
        }
    }
    names
}

/// Replace `messages[first + 1 .. last]` with the snapshot message, keeping
/// `[0 ..= first]` and `[last ..]` untouched.
pub fn splice_snapshot(messages: &mut Vec<Message>, first: usize, last: usize, snapshot: Message) {
    debug_assert!(first < last && last < messages.len());
    messages.splice(first + 1..last, std::iter::once(snapshot));
}
