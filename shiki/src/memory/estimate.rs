//! Token estimation.
//!
//! A cheap character-class estimator used only for threshold decisions; it
//! does not try to match any provider's real tokenizer. Costs: CJK/Hangul
//! characters 2 units each, contiguous ASCII letter runs ⌈len/4⌉, digit
//! runs ⌈len/3⌉, whitespace 0, everything else 1.

use crate::message::{ContentPart, Message, MessageContent, ResultContent, ToolOutput};
use crate::tool::FunctionTool;

const fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{1100}'..='\u{11FF}'   // Hangul Jamo
        | '\u{3040}'..='\u{30FF}' // Hiragana, Katakana
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK unified
        | '\u{AC00}'..='\u{D7AF}' // Hangul syllables
        | '\u{F900}'..='\u{FAFF}' // CJK compatibility
    )
}

fn flush_run(run: &mut u64, divisor: u64, total: &mut u64) {
    if *run > 0 {
        *total += run.div_ceil(divisor);
        *run = 0;
    }
}

/// Estimate the token cost of a string.
#[must_use]
pub fn estimate_text(text: &str) -> u64 {
    let mut total: u64 = 0;
    let mut letter_run: u64 = 0;
    let mut digit_run: u64 = 0;

    for c in text.chars() {
        if c.is_ascii_alphabetic() {
            flush_run(&mut digit_run, 3, &mut total);
            letter_run += 1;
        } else if c.is_ascii_digit() {
            flush_run(&mut letter_run, 4, &mut total);
            digit_run += 1;
        } else {
            flush_run(&mut letter_run, 4, &mut total);
            flush_run(&mut digit_run, 3, &mut total);
            if is_cjk(c) {
                total += 2;
            } else if !c.is_whitespace() {
                total += 1;
            }
        }
    }
    flush_run(&mut letter_run, 4, &mut total);
    flush_run(&mut digit_run, 3, &mut total);
    total
}

fn estimate_value(value: &serde_json::Value) -> u64 {
    serde_json::to_string(value).map_or(0, |s| estimate_text(&s))
}

fn estimate_result_content(content: &[ResultContent]) -> u64 {
    content
        .iter()
        .map(|piece| match piece {
            ResultContent::Text { text } => estimate_text(text),
            ResultContent::Media { data, .. } => estimate_text(data),
        })
        .sum()
}

/// Estimate the token cost of one message.
#[must_use]
pub fn estimate_message(message: &Message) -> u64 {
    match &message.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } | ContentPart::Reasoning { text } => estimate_text(text),
                ContentPart::File { data, .. } => estimate_text(data),
                ContentPart::ToolCall(call) => {
                    estimate_text(&call.tool_name) + estimate_value(&call.input)
                }
            })
            .sum(),
        MessageContent::ToolResults(results) => results
            .iter()
            .map(|result| match &result.output {
                ToolOutput::Text { value } | ToolOutput::ErrorText { value } => estimate_text(value),
                ToolOutput::Json { value } | ToolOutput::ErrorJson { value } => {
                    estimate_value(value)
                }
                ToolOutput::Content { value } => estimate_result_content(value),
            })
            .sum(),
    }
}

/// Estimate the token cost of a whole request: the message buffer plus the
/// serialized tool schema lengths.
#[must_use]
pub fn estimate_messages(messages: &[Message], tools: &[FunctionTool]) -> u64 {
    let message_tokens: u64 = messages.iter().map(estimate_message).sum();
    let schema_chars: u64 = tools
        .iter()
        .map(|t| serde_json::to_string(t).map_or(0, |s| s.len() as u64))
        .sum();
    message_tokens + schema_chars
}
