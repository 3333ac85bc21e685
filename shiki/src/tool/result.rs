//! Tool result conversion to the provider wire shape.

use crate::message::{
    ContentPart, Message, ResultContent, ToolCallPart, ToolOutput, ToolResult, ToolResultPart,
};

fn looks_like_json(text: &str) -> bool {
    let trimmed = text.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}

/// Convert one execution result into a provider tool-result part.
///
/// - No content becomes error-text `"Error"`.
/// - A single text part keeps its kind: errors get an `"Error: "` prefix,
///   empty success becomes `"Successful"`, JSON-looking text is parsed into
///   a `json` output, anything else stays text.
/// - Multi-part results become a `content` output. When the provider does
///   not accept media in tool results (`multimodal` off), the media pieces
///   are re-emitted as a synthesized user message (appended to
///   `synthesized`) labelled with the calling tool, and the tool result
///   itself carries only the text pieces.
pub fn convert_tool_result(
    call: &ToolCallPart,
    result: &ToolResult,
    multimodal: bool,
    synthesized: &mut Vec<Message>,
) -> ToolResultPart {
    let output = convert_output(call, result, multimodal, synthesized);
    ToolResultPart::new(&call.tool_call_id, &call.tool_name, output)
}

fn convert_output(
    call: &ToolCallPart,
    result: &ToolResult,
    multimodal: bool,
    synthesized: &mut Vec<Message>,
) -> ToolOutput {
    if result.content.is_empty() {
        return ToolOutput::error_text("Error");
    }

    if let [ResultContent::Text { text }] = result.content.as_slice() {
        if result.is_error {
            let value = if text.starts_with("Error") {
                text.clone()
            } else {
                format!("Error: {text}")
            };
            return ToolOutput::ErrorText { value };
        }
        if text.trim().is_empty() {
            return ToolOutput::text("Successful");
        }
        if looks_like_json(text) {
            if let Ok(value) = serde_json::from_str(text) {
                return ToolOutput::Json { value };
            }
        }
        return ToolOutput::text(text.clone());
    }

    let has_media = result
        .content
        .iter()
        .any(|piece| matches!(piece, ResultContent::Media { .. }));

    if multimodal || !has_media {
        return ToolOutput::Content {
            value: result.content.clone(),
        };
    }

    // The provider rejects media in tool results: keep the text in the
    // tool message and carry the media in a follow-up user turn.
    let texts: Vec<&str> = result
        .content
        .iter()
        .filter_map(|piece| match piece {
            ResultContent::Text { text } => Some(text.as_str()),
            ResultContent::Media { .. } => None,
        })
        .collect();
    let text_output = if texts.is_empty() {
        "Successful".to_owned()
    } else {
        texts.join("\n")
    };

    let mut parts: Vec<ContentPart> = result
        .content
        .iter()
        .filter_map(|piece| match piece {
            ResultContent::Media { mime_type, data } => {
                Some(ContentPart::file(data.clone(), mime_type.clone()))
            }
            ResultContent::Text { .. } => None,
        })
        .collect();
    parts.push(ContentPart::text(format!(
        "call `{}` tool result",
        call.tool_name
    )));
    synthesized.push(Message::user_parts(parts));

    if result.is_error {
        ToolOutput::ErrorText { value: text_output }
    } else {
        ToolOutput::Text { value: text_output }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> ToolCallPart {
        ToolCallPart::new("t1", "screenshot", serde_json::json!({}))
    }

    fn convert(result: &ToolResult, multimodal: bool) -> (ToolOutput, Vec<Message>) {
        let mut synthesized = Vec::new();
        let part = convert_tool_result(&call(), result, multimodal, &mut synthesized);
        (part.output, synthesized)
    }

    #[test]
    fn empty_content_is_error() {
        let (output, extra) = convert(&ToolResult::default(), true);
        assert_eq!(output, ToolOutput::error_text("Error"));
        assert!(extra.is_empty());
    }

    #[test]
    fn error_text_gets_prefix_once() {
        let (output, _) = convert(&ToolResult::error("boom"), true);
        assert_eq!(output, ToolOutput::error_text("Error: boom"));

        let (output, _) = convert(&ToolResult::error("Error: already"), true);
        assert_eq!(output, ToolOutput::error_text("Error: already"));
    }

    #[test]
    fn empty_success_becomes_successful() {
        let (output, _) = convert(&ToolResult::text("  "), true);
        assert_eq!(output, ToolOutput::text("Successful"));
    }

    #[test]
    fn json_text_is_parsed() {
        let (output, _) = convert(&ToolResult::text(r#"{"ok": true}"#), true);
        assert_eq!(
            output,
            ToolOutput::Json {
                value: serde_json::json!({"ok": true})
            }
        );
    }

    #[test]
    fn invalid_json_stays_text() {
        let (output, _) = convert(&ToolResult::text("{not json}"), true);
        assert_eq!(output, ToolOutput::text("{not json}"));
    }

    #[test]
    fn multimodal_keeps_media_inline() {
        let result = ToolResult::content(vec![
            ResultContent::text("caption"),
            ResultContent::media("image/png", "base64data"),
        ]);
        let (output, extra) = convert(&result, true);
        assert!(matches!(output, ToolOutput::Content { .. }));
        assert!(extra.is_empty());
    }

    #[test]
    fn media_without_multimodal_synthesizes_user_turn() {
        let result = ToolResult::content(vec![
            ResultContent::text("caption"),
            ResultContent::media("image/png", "base64data"),
        ]);
        let (output, extra) = convert(&result, false);
        assert_eq!(output, ToolOutput::text("caption"));
        assert_eq!(extra.len(), 1);
        let parts = extra[0].parts().unwrap();
        assert!(parts.iter().any(ContentPart::is_image_file));
        assert!(
            parts
                .iter()
                .any(|p| p.as_text() == Some("call `screenshot` tool result"))
        );
    }

    #[test]
    fn text_only_multipart_stays_content() {
        let result = ToolResult::content(vec![
            ResultContent::text("one"),
            ResultContent::text("two"),
        ]);
        let (output, extra) = convert(&result, false);
        assert!(matches!(output, ToolOutput::Content { .. }));
        assert!(extra.is_empty());
    }
}
