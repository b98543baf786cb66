//! Context-concatenation auto-resume for `real`-mode streams truncated by a
//! safety finish reason.

use gw_protocol::google::generate_content::response::GenerateContentResponse;
use gw_protocol::google::generate_content::types::FinishReason;
use serde_json::{json, Value};

/// One decoded `data:` line's contribution to the running transcript.
pub struct LineInspection {
    pub text: String,
    pub finish_reason: Option<FinishReason>,
}

/// Parses an SSE `data: {...}` line (prefix optional) and pulls out plain
/// text parts plus the finish reason, ignoring `thought` parts the same way
/// the protocol adapter does.
pub fn inspect_line(line: &str) -> Option<LineInspection> {
    let payload = line.strip_prefix("data: ").unwrap_or(line).trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    let response: GenerateContentResponse = serde_json::from_str(payload).ok()?;
    let candidate = response.candidates.into_iter().next()?;

    let mut text = String::new();
    for part in candidate.content.parts {
        if part.thought == Some(true) {
            continue;
        }
        if let Some(part_text) = part.text {
            text.push_str(&part_text);
        }
    }

    Some(LineInspection {
        text,
        finish_reason: candidate.finish_reason,
    })
}

pub fn is_resumable(reason: FinishReason) -> bool {
    reason.is_truncation_for_safety()
}

/// Appends the accumulated transcript as a trailing `model` turn (or
/// extends an existing trailing one), then the caller re-dispatches.
pub fn build_resume_body(original: &Value, accumulated: &str) -> Value {
    let mut body = original.clone();
    let Some(contents) = body.get_mut("contents").and_then(Value::as_array_mut) else {
        return body;
    };

    let trailing_is_model = contents
        .last()
        .and_then(|turn| turn.get("role"))
        .and_then(Value::as_str)
        == Some("model");

    if trailing_is_model {
        if let Some(parts) = contents
            .last_mut()
            .and_then(|turn| turn.get_mut("parts"))
            .and_then(Value::as_array_mut)
        {
            parts.push(json!({ "text": accumulated }));
        }
    } else {
        contents.push(json!({
            "role": "model",
            "parts": [{ "text": accumulated }],
        }));
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspect_line_strips_data_prefix_and_collects_text() {
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":"hello"}]}}]}"#;
        let inspected = inspect_line(line).expect("should parse");
        assert_eq!(inspected.text, "hello");
        assert!(inspected.finish_reason.is_none());
    }

    #[test]
    fn inspect_line_skips_thought_parts() {
        let line = r#"{"candidates":[{"content":{"parts":[{"text":"secret","thought":true},{"text":"visible"}]}}]}"#;
        let inspected = inspect_line(line).expect("should parse");
        assert_eq!(inspected.text, "visible");
    }

    #[test]
    fn inspect_line_reports_finish_reason() {
        let line = r#"{"candidates":[{"content":{"parts":[]},"finishReason":"PROHIBITED_CONTENT"}]}"#;
        let inspected = inspect_line(line).expect("should parse");
        assert_eq!(inspected.finish_reason, Some(FinishReason::ProhibitedContent));
        assert!(is_resumable(inspected.finish_reason.unwrap()));
    }

    #[test]
    fn inspect_line_ignores_done_marker() {
        assert!(inspect_line("data: [DONE]").is_none());
    }

    #[test]
    fn stop_reason_is_not_resumable() {
        assert!(!is_resumable(FinishReason::Stop));
    }

    #[test]
    fn build_resume_body_appends_new_model_turn() {
        let original = json!({ "contents": [{ "role": "user", "parts": [{ "text": "hi" }] }] });
        let resumed = build_resume_body(&original, "partial answer");
        let contents = resumed["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "partial answer");
    }

    #[test]
    fn build_resume_body_extends_trailing_model_turn() {
        let original = json!({
            "contents": [
                { "role": "user", "parts": [{ "text": "hi" }] },
                { "role": "model", "parts": [{ "text": "first" }] },
            ]
        });
        let resumed = build_resume_body(&original, "second");
        let contents = resumed["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        let parts = contents[1]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["text"], "second");
    }
}
