//! Plain-text extraction from upstream message objects.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static THINKING_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<\s*think(?:ing)?\s*>.*?<\s*/\s*think(?:ing)?\s*>")
        .expect("valid thinking regex")
});

/// Extract displayable text from a message object.
///
/// Tries, in order: a string `content`; the `text` of every `type: "text"`
/// element of an array `content`, joined by newlines; a bare string `text`.
/// `None` means the message carried no text at all, which is distinct from
/// an empty string.
pub fn extract_text(message: &Value) -> Option<String> {
    let content = message.get("content");

    if let Some(Value::String(text)) = content {
        return Some(strip_thinking(text));
    }

    if let Some(Value::Array(parts)) = content {
        let texts: Vec<&str> = parts
            .iter()
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect();
        if !texts.is_empty() {
            return Some(strip_thinking(&texts.join("\n")));
        }
    }

    message
        .get("text")
        .and_then(Value::as_str)
        .map(strip_thinking)
}

/// Remove `<think>`/`<thinking>` blocks and left-trim the remainder.
pub fn strip_thinking(text: &str) -> String {
    THINKING_BLOCK.replace_all(text, "").trim_start().to_string()
}
