//! Working-buffer maintenance: large-content pruning and continuity repair.

use std::collections::HashMap;

use tracing::debug;

use crate::message::{ContentPart, Message, ResultContent, Role, ToolOutput, ToolResultPart};

/// Truncate a string to at most `limit` characters, cutting on a char
/// boundary and appending an ellipsis.
#[must_use]
pub fn truncate_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_owned();
    }
    let mut head: String = text.chars().take(limit).collect();
    head.push_str("...");
    head
}

fn placeholder_for(media_type: &str) -> &'static str {
    if media_type.starts_with("image/") {
        "[image]"
    } else {
        "[file]"
    }
}

/// Prune oversized content from the working buffer before a turn.
///
/// Walks the buffer newest to oldest, keeping at most `max_img_file_num`
/// image parts and `max_img_file_num` non-image file parts; older ones are
/// replaced with `"[image]"`/`"[file]"` text. Inside tool results the same
/// replacement applies to media pieces, and oversized text outputs keep
/// only the most recent full-length occurrence per tool name; older ones
/// are truncated to `large_text_length`.
pub fn prune_large_content(
    messages: &mut [Message],
    max_img_file_num: usize,
    large_text_length: usize,
) {
    let mut image_num = 0usize;
    let mut file_num = 0usize;
    let mut large_text_by_tool: HashMap<String, usize> = HashMap::new();

    for message in messages.iter_mut().rev() {
        match message.role {
            Role::User => {
                if let Some(parts) = message.parts_mut() {
                    for part in parts.iter_mut().rev() {
                        if part.is_image_file() {
                            image_num += 1;
                            if image_num > max_img_file_num {
                                *part = ContentPart::text("[image]");
                            }
                        } else if part.is_other_file() {
                            file_num += 1;
                            if file_num > max_img_file_num {
                                *part = ContentPart::text("[file]");
                            }
                        }
                    }
                }
            }
            Role::Tool => {
                if let Some(results) = message.tool_results_mut() {
                    for result in results.iter_mut().rev() {
                        prune_tool_result(
                            result,
                            max_img_file_num,
                            large_text_length,
                            &mut image_num,
                            &mut file_num,
                            &mut large_text_by_tool,
                        );
                    }
                }
            }
            Role::System | Role::Assistant => {}
        }
    }
}

fn prune_tool_result(
    result: &mut ToolResultPart,
    max_img_file_num: usize,
    large_text_length: usize,
    image_num: &mut usize,
    file_num: &mut usize,
    large_text_by_tool: &mut HashMap<String, usize>,
) {
    match &mut result.output {
        ToolOutput::Content { value } => {
            for piece in value.iter_mut().rev() {
                if let ResultContent::Media { mime_type, .. } = piece {
                    let placeholder = placeholder_for(mime_type);
                    let counter = if placeholder == "[image]" {
                        &mut *image_num
                    } else {
                        &mut *file_num
                    };
                    *counter += 1;
                    if *counter > max_img_file_num {
                        *piece = ResultContent::text(placeholder);
                    }
                }
            }
        }
        ToolOutput::Text { value } | ToolOutput::ErrorText { value } => {
            if value.chars().count() > large_text_length {
                let seen = large_text_by_tool
                    .entry(result.tool_name.clone())
                    .or_insert(0);
                *seen += 1;
                if *seen > 1 {
                    debug!(tool = %result.tool_name, "Truncating repeated large tool output");
                    *value = truncate_text(value, large_text_length);
                }
            }
        }
        ToolOutput::Json { .. } | ToolOutput::ErrorJson { .. } => {}
    }
}

/// Repair the working buffer after a structural edit.
///
/// Drops leading non-user turns (a leading system message is preserved),
/// removes the second of two consecutive identical user messages, and
/// synthesizes a `"No result"` tool message for any assistant message
/// whose tool calls lack one.
pub fn fix_discontinuous(messages: &mut Vec<Message>) {
    // Leading system message stays put; repair starts after it.
    let base = usize::from(matches!(messages.first(), Some(m) if m.role == Role::System));

    // Drop non-user turns until the first user message.
    while messages.len() > base && messages[base].role != Role::User {
        messages.remove(base);
    }

    // Dedupe identical consecutive user messages.
    let mut i = base;
    while i + 1 < messages.len() {
        if messages[i].role == Role::User
            && messages[i + 1].role == Role::User
            && messages[i] == messages[i + 1]
        {
            messages.remove(i + 1);
        } else {
            i += 1;
        }
    }

    // Ensure every assistant-with-tool-calls is answered.
    let mut i = base;
    while i < messages.len() {
        let calls: Vec<(String, String)> = if messages[i].role == Role::Assistant {
            messages[i]
                .tool_calls()
                .iter()
                .map(|c| (c.tool_call_id.clone(), c.tool_name.clone()))
                .collect()
        } else {
            Vec::new()
        };
        if !calls.is_empty() {
            let answered = messages
                .get(i + 1)
                .is_some_and(|next| next.role == Role::Tool);
            if !answered {
                let results = calls
                    .into_iter()
                    .map(|(id, name)| {
                        ToolResultPart::new(id, name, ToolOutput::error_text("No result"))
                    })
                    .collect();
                messages.insert(i + 1, Message::tool(results));
            }
        }
        i += 1;
    }
}

/// Check invariant I2 over a buffer: every assistant message with tool-call
/// parts is immediately followed by a tool message with matching result ids
/// in the same order.
#[must_use]
pub fn tool_continuity_holds(messages: &[Message]) -> bool {
    for (i, message) in messages.iter().enumerate() {
        if message.role != Role::Assistant {
            continue;
        }
        let calls = message.tool_calls();
        if calls.is_empty() {
            continue;
        }
        let Some(next) = messages.get(i + 1) else {
            return false;
        };
        if next.role != Role::Tool {
            return false;
        }
        let Some(results) = next.tool_results() else {
            return false;
        };
        if results.len() != calls.len() {
            return false;
        }
        for (call, result) in calls.iter().zip(results) {
            if call.tool_call_id != result.tool_call_id {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_files(n_images: usize, n_files: usize) -> Message {
        let mut parts = vec![ContentPart::text("look at these")];
        for i in 0..n_images {
            parts.push(ContentPart::file(format!("img{i}"), "image/png"));
        }
        for i in 0..n_files {
            parts.push(ContentPart::file(format!("doc{i}"), "application/pdf"));
        }
        Message::user_parts(parts)
    }

    fn count_files(messages: &[Message], image: bool) -> usize {
        messages
            .iter()
            .filter_map(Message::parts)
            .flatten()
            .filter(|p| {
                if image {
                    p.is_image_file()
                } else {
                    p.is_other_file()
                }
            })
            .count()
    }

    mod pruning {
        use super::*;

        #[test]
        fn image_quota_keeps_newest() {
            let mut messages = vec![
                Message::system("sys"),
                user_with_files(1, 0),
                Message::assistant("ok"),
                user_with_files(1, 0),
                Message::assistant("ok"),
                user_with_files(1, 0),
            ];
            prune_large_content(&mut messages, 1, 5000);
            assert_eq!(count_files(&messages, true), 1);
            // The newest image survives.
            let last = messages.last().unwrap();
            assert!(last.parts().unwrap().iter().any(ContentPart::is_image_file));
            // The oldest was replaced by the placeholder.
            assert!(messages[1].parts().unwrap().iter().any(|p| p.as_text() == Some("[image]")));
        }

        #[test]
        fn separate_quotas_for_images_and_files() {
            let mut messages = vec![user_with_files(2, 2)];
            prune_large_content(&mut messages, 1, 5000);
            assert_eq!(count_files(&messages, true), 1);
            assert_eq!(count_files(&messages, false), 1);
        }

        #[test]
        fn media_in_tool_results_counts_against_quota() {
            let mut messages = vec![
                Message::tool(vec![ToolResultPart::new(
                    "t1",
                    "screenshot",
                    ToolOutput::Content {
                        value: vec![
                            ResultContent::text("captured"),
                            ResultContent::media("image/png", "old-shot"),
                        ],
                    },
                )]),
                user_with_files(1, 0),
            ];
            prune_large_content(&mut messages, 1, 5000);
            // Newest (user) image kept; tool media replaced.
            let results = messages[0].tool_results().unwrap();
            if let ToolOutput::Content { value } = &results[0].output {
                assert_eq!(value[1], ResultContent::text("[image]"));
            } else {
                panic!("expected content output");
            }
        }

        #[test]
        fn first_large_text_per_tool_stays_full() {
            let large = "x".repeat(100);
            let tool_msg = |id: &str| {
                Message::tool(vec![ToolResultPart::new(
                    id,
                    "reader",
                    ToolOutput::text(large.clone()),
                )])
            };
            let mut messages = vec![tool_msg("t1"), tool_msg("t2"), tool_msg("t3")];
            prune_large_content(&mut messages, 1, 50);

            let text_of = |m: &Message| match &m.tool_results().unwrap()[0].output {
                ToolOutput::Text { value } => value.clone(),
                _ => panic!("expected text"),
            };
            // Newest keeps full length; older ones truncated.
            assert_eq!(text_of(&messages[2]).len(), 100);
            assert!(text_of(&messages[1]).len() < 100);
            assert!(text_of(&messages[0]).len() < 100);
        }

        #[test]
        fn distinct_tools_each_keep_one_full_output() {
            let large = "y".repeat(100);
            let mut messages = vec![
                Message::tool(vec![ToolResultPart::new(
                    "t1",
                    "alpha",
                    ToolOutput::text(large.clone()),
                )]),
                Message::tool(vec![ToolResultPart::new(
                    "t2",
                    "beta",
                    ToolOutput::text(large.clone()),
                )]),
            ];
            prune_large_content(&mut messages, 1, 50);
            for message in &messages {
                if let ToolOutput::Text { value } = &message.tool_results().unwrap()[0].output {
                    assert_eq!(value.len(), 100);
                }
            }
        }
    }

    mod repair {
        use super::*;

        #[test]
        fn drops_leading_non_user_turns() {
            let mut messages = vec![
                Message::assistant("orphan"),
                Message::user("hello"),
                Message::assistant("hi"),
            ];
            fix_discontinuous(&mut messages);
            assert_eq!(messages[0].role, Role::User);
        }

        #[test]
        fn preserves_leading_system() {
            let mut messages = vec![
                Message::system("sys"),
                Message::assistant("orphan"),
                Message::user("hello"),
            ];
            fix_discontinuous(&mut messages);
            assert_eq!(messages[0].role, Role::System);
            assert_eq!(messages[1].role, Role::User);
        }

        #[test]
        fn dedupes_identical_consecutive_user_messages() {
            let mut messages = vec![
                Message::user("same"),
                Message::user("same"),
                Message::user("different"),
            ];
            fix_discontinuous(&mut messages);
            assert_eq!(messages.len(), 2);
        }

        #[test]
        fn synthesizes_missing_tool_results() {
            let mut messages = vec![
                Message::user("go"),
                Message::assistant_parts(vec![ContentPart::tool_call(
                    "t1",
                    "add",
                    serde_json::json!({}),
                )]),
            ];
            fix_discontinuous(&mut messages);
            assert_eq!(messages.len(), 3);
            let results = messages[2].tool_results().unwrap();
            assert_eq!(results[0].tool_call_id, "t1");
            assert_eq!(results[0].output, ToolOutput::error_text("No result"));
            assert!(tool_continuity_holds(&messages));
        }

        #[test]
        fn empty_buffer_is_fine() {
            let mut messages = Vec::new();
            fix_discontinuous(&mut messages);
            assert!(messages.is_empty());
        }

        #[test]
        fn repaired_buffer_satisfies_invariants() {
            let mut messages = vec![
                Message::assistant("noise"),
                Message::user("a"),
                Message::user("a"),
                Message::assistant_parts(vec![ContentPart::tool_call(
                    "t9",
                    "lookup",
                    serde_json::json!({"q": 1}),
                )]),
                Message::user("later"),
            ];
            fix_discontinuous(&mut messages);
            assert_eq!(messages[0].role, Role::User);
            for pair in messages.windows(2) {
                assert!(!(pair[0].role == Role::User && pair[1] == pair[0]));
            }
            assert!(tool_continuity_holds(&messages));
        }
    }

    mod truncation {
        use super::*;

        #[test]
        fn short_text_unchanged() {
            assert_eq!(truncate_text("short", 10), "short");
        }

        #[test]
        fn long_text_gets_ellipsis() {
            let out = truncate_text(&"a".repeat(20), 5);
            assert_eq!(out, "aaaaa...");
        }

        #[test]
        fn cuts_on_char_boundary() {
            let out = truncate_text("日本語テキスト", 3);
            assert_eq!(out, "日本語...");
        }
    }
}
