//! Normalization of the OpenAI-style polymorphic message `content` field.
//!
//! A message's `content` is either a bare string or a list of typed parts.
//! The router, budgeter, and proxy all go through [`ContentPart::from_json`]
//! and [`extract_text`] rather than re-deriving this union themselves (§9).

use serde_json::Value;

/// A single normalized content part.
///
/// Unknown part types (anything other than `text`, `image_url`, `image`) are
/// preserved as [`ContentPart::Unknown`] so the proxy can still forward them
/// verbatim even though the router/budgeter ignore them.
#[derive(Debug, Clone)]
pub enum ContentPart {
    Text(String),
    ImageUrl,
    Unknown,
}

/// Parse a message's raw `content` JSON value into a list of parts.
///
/// A bare string becomes a single `Text` part. A list of parts is mapped
/// part-by-part; anything without a recognized `type` becomes `Unknown`.
pub fn normalize_content(content: &Value) -> Vec<ContentPart> {
    match content {
        Value::String(s) => vec![ContentPart::Text(s.clone())],
        Value::Array(parts) => parts.iter().map(normalize_part).collect(),
        Value::Null => vec![],
        other => vec![ContentPart::Text(other.to_string())],
    }
}

fn normalize_part(part: &Value) -> ContentPart {
    match part.get("type").and_then(Value::as_str) {
        Some("text") => ContentPart::Text(
            part.get("text").and_then(Value::as_str).unwrap_or_default().to_owned(),
        ),
        Some("image_url") | Some("image") => ContentPart::ImageUrl,
        _ => ContentPart::Unknown,
    }
}

/// Concatenate the `text` fields of a message's content parts, separated by
/// newlines, per §4.4's text-extraction rule.
pub fn extract_text(content: &Value) -> String {
    normalize_content(content)
        .into_iter()
        .filter_map(|p| match p {
            ContentPart::Text(t) => Some(t),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Does this message's content contain a structured image part?
pub fn has_image(content: &Value) -> bool {
    normalize_content(content)
        .iter()
        .any(|p| matches!(p, ContentPart::ImageUrl))
}

/// Estimate the token cost of a single message, per §4.5: text fragments use
/// `ceil(ceil(L / 2.5) * 1.3)`, image parts are a flat 400 tokens, and every
/// message carries a 10-token role/structure overhead.
pub fn estimate_message_tokens(content: &Value) -> u32 {
    let mut total: u32 = 10;
    for part in normalize_content(content) {
        total += match part {
            ContentPart::Text(t) => estimate_text_tokens(&t),
            ContentPart::ImageUrl => 400,
            ContentPart::Unknown => 0,
        };
    }
    total
}

/// `ceil(ceil(L / 2.5) * 1.3)` for a text fragment of character length `L`.
pub fn estimate_text_tokens(text: &str) -> u32 {
    let len = text.chars().count() as f64;
    let stage1 = (len / 2.5).ceil();
    (stage1 * 1.3).ceil() as u32
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_content_is_single_text_part() {
        let parts = normalize_content(&json!("hello"));
        assert!(matches!(parts.as_slice(), [ContentPart::Text(t)] if t == "hello"));
    }

    #[test]
    fn list_content_concatenates_text_parts_with_newline() {
        let content = json!([
            {"type": "text", "text": "line one"},
            {"type": "image_url", "image_url": {"url": "data:..."}},
            {"type": "text", "text": "line two"},
        ]);
        assert_eq!(extract_text(&content), "line one\nline two");
    }

    #[test]
    fn has_image_detects_image_url_and_image_types() {
        assert!(has_image(&json!([{"type": "image_url", "image_url": {"url": "x"}}])));
        assert!(has_image(&json!([{"type": "image", "image": "x"}])));
        assert!(!has_image(&json!([{"type": "text", "text": "x"}])));
        assert!(!has_image(&json!("plain string")));
    }

    #[test]
    fn unknown_part_types_are_ignored_for_text_extraction() {
        let content = json!([{"type": "tool_result", "data": "x"}, {"type": "text", "text": "y"}]);
        assert_eq!(extract_text(&content), "y");
    }

    #[test]
    fn token_estimate_matches_formula() {
        // L=10: ceil(10/2.5)=4, ceil(4*1.3)=ceil(5.2)=6, +10 overhead = 16.
        let tokens = estimate_message_tokens(&json!("1234567890"));
        assert_eq!(tokens, 16);
    }
}
