//! Context truncation engine (C5, §4.5).
//!
//! A pure function over the normalized content model so it can be unit
//! tested independently of any backend or HTTP concern.

use serde_json::{json, Value};

use crate::content::estimate_message_tokens;

/// Safety margin reserved for the model's own output (§4.5 step 2).
const OUTPUT_HEADROOM: u32 = 500;

fn is_system(message: &Value) -> bool {
    message.get("role").and_then(Value::as_str) == Some("system")
}

/// Truncate `messages` to fit within `context` tokens, preserving every
/// system-role message and as much of the non-system recency window as fits.
///
/// `context` is the descriptor's configured context window; callers should
/// not invoke this when the descriptor has no `context` value at all (§4.5:
/// "activated only when the selected descriptor has a context value").
pub fn truncate(messages: &[Value], context: u32) -> Vec<Value> {
    // Step 1: partition, preserving order within each partition.
    let (system, non_system): (Vec<&Value>, Vec<&Value>) = messages.iter().partition(|m| is_system(m));

    // Step 2: sum system tokens.
    let system_tokens: u32 = system.iter().map(|m| estimate_message_tokens(m.get("content").unwrap_or(&Value::Null))).sum();

    // Step 3: available budget.
    let available_signed = context as i64 - system_tokens as i64 - OUTPUT_HEADROOM as i64;
    if available_signed <= 0 {
        return system.into_iter().cloned().collect();
    }
    let mut available = available_signed as u32;

    // Step 4: walk non-system messages newest-first, greedily accepting.
    let mut kept_rev: Vec<&Value> = Vec::new();
    let mut dropped = 0usize;
    let mut stop_accepting = false;
    for message in non_system.iter().rev() {
        if stop_accepting {
            dropped += 1;
            continue;
        }
        let cost = estimate_message_tokens(message.get("content").unwrap_or(&Value::Null));
        if cost <= available {
            available -= cost;
            kept_rev.push(message);
        } else {
            stop_accepting = true;
            dropped += 1;
        }
    }
    kept_rev.reverse();

    // Step 5: assemble output.
    let mut output: Vec<Value> = system.into_iter().cloned().collect();
    if dropped > 0 {
        output.push(json!({
            "role": "system",
            "content": format!("[{dropped} older message(s) removed to fit the context budget]"),
        }));
    }
    output.extend(kept_rev.into_iter().cloned());
    output
}

/// Resolve the outgoing `max_tokens`, per §4.5's independent rule:
/// `max(requested, configured)` when `requested > 0`, else `configured`.
pub fn resolve_max_tokens(requested: Option<u32>, configured: u32) -> u32 {
    match requested {
        Some(r) if r > 0 => r.max(configured),
        _ => configured,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn user(text: &str) -> Value {
        json!({"role": "user", "content": text})
    }

    #[test]
    fn truncation_is_idempotent_when_everything_already_fits() {
        let messages = vec![json!({"role": "system", "content": "sys"}), user("hi"), json!({"role": "assistant", "content": "hello"})];
        let out = truncate(&messages, 10_000);
        assert_eq!(out, messages);
    }

    #[test]
    fn system_messages_are_always_preserved_in_order() {
        let messages = vec![
            json!({"role": "system", "content": "first"}),
            user("a".repeat(5000).as_str()),
            json!({"role": "system", "content": "second"}),
        ];
        let out = truncate(&messages, 50);
        let system_out: Vec<&Value> = out.iter().filter(|m| is_system(m)).collect();
        assert_eq!(system_out[0]["content"], "first");
        // second system message is also preserved even though it wasn't leading.
        assert!(system_out.iter().any(|m| m["content"] == "second"));
    }

    #[test]
    fn zero_available_budget_returns_system_messages_only() {
        let messages = vec![json!({"role": "system", "content": "a".repeat(10_000)}), user("hi")];
        let out = truncate(&messages, 10);
        assert_eq!(out.len(), 1);
        assert!(is_system(&out[0]));
    }

    #[test]
    fn recency_window_keeps_newest_messages_and_synthesizes_notice() {
        let mut messages = vec![json!({"role": "system", "content": "sys"})];
        for i in 0..20 {
            messages.push(user(&format!("message number {i} is moderately long to cost tokens")));
        }
        let out = truncate(&messages, 1000);

        // system message first.
        assert_eq!(out[0]["content"], "sys");
        // a synthesized notice follows, since not everything fits.
        let notice = out[1]["content"].as_str().unwrap();
        assert!(notice.contains("removed"));
        // the last kept message is the most recent one.
        assert_eq!(out.last().unwrap()["content"], "message number 19 is moderately long to cost tokens");
    }

    #[test]
    fn max_tokens_is_forced_upward_to_configured_minimum() {
        assert_eq!(resolve_max_tokens(Some(50), 2000), 2000);
        assert_eq!(resolve_max_tokens(Some(5000), 2000), 5000);
        assert_eq!(resolve_max_tokens(None, 2000), 2000);
        assert_eq!(resolve_max_tokens(Some(0), 2000), 2000);
    }
}
