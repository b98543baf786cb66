//! Outbound request sanitization the browser-side agent applies before
//! dispatching a descriptor's `fetch`: path/query rewriting for fake
//! streaming mode, header stripping, and body filtering for image models.

use std::collections::HashMap;

use gw_protocol::control::StreamingMode;
use serde_json::Value;

const STRIPPED_HEADERS: &[&str] = &["host", "connection", "content-length", "origin", "referer", "user-agent"];

pub fn strip_headers(headers: &mut HashMap<String, String>) {
    headers.retain(|name, _| {
        let lower = name.to_ascii_lowercase();
        !STRIPPED_HEADERS.contains(&lower.as_str()) && !lower.starts_with("sec-fetch-")
    });
}

/// `fake` mode has no server-sent stream to rewrite around: the descriptor
/// still names `:streamGenerateContent`, so the agent rewrites it to the
/// plain `:generateContent` variant and drops `alt=sse`.
pub fn rewrite_for_fake_mode(mode: StreamingMode, path: &mut String, query: &mut HashMap<String, String>) {
    if mode != StreamingMode::Fake {
        return;
    }
    if let Some(rewritten) = path.strip_suffix(":streamGenerateContent") {
        *path = format!("{rewritten}:generateContent");
    }
    query.remove("alt");
}

pub fn is_image_model(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.contains("-image-") || lower.contains("imagen")
}

/// Image-generation models reject tool/thinking config fields the adapter
/// otherwise always attaches.
pub fn filter_body_for_image_model(body: &mut Value) {
    let Value::Object(map) = body else { return };
    map.remove("tool_config");
    map.remove("toolChoice");
    map.remove("tools");
    if let Some(Value::Object(generation_config)) = map.get_mut("generationConfig") {
        generation_config.remove("thinkingConfig");
    }
}

pub fn sanitize(
    mode: StreamingMode,
    path: &mut String,
    query: &mut HashMap<String, String>,
    headers: &mut HashMap<String, String>,
    body: &mut Value,
) {
    rewrite_for_fake_mode(mode, path, query);
    strip_headers(headers);
    if is_image_model(path) {
        filter_body_for_image_model(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_forbidden_headers_case_insensitively() {
        let mut headers = HashMap::from([
            ("Host".to_string(), "x".to_string()),
            ("Sec-Fetch-Mode".to_string(), "cors".to_string()),
            ("authorization".to_string(), "Bearer abc".to_string()),
        ]);
        strip_headers(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("authorization"));
    }

    #[test]
    fn rewrites_fake_mode_path_and_drops_alt() {
        let mut path = "/v1beta/models/gemini-pro:streamGenerateContent".to_string();
        let mut query = HashMap::from([("alt".to_string(), "sse".to_string())]);
        rewrite_for_fake_mode(StreamingMode::Fake, &mut path, &mut query);
        assert_eq!(path, "/v1beta/models/gemini-pro:generateContent");
        assert!(!query.contains_key("alt"));
    }

    #[test]
    fn leaves_real_mode_path_untouched() {
        let mut path = "/v1beta/models/gemini-pro:streamGenerateContent".to_string();
        let mut query = HashMap::from([("alt".to_string(), "sse".to_string())]);
        rewrite_for_fake_mode(StreamingMode::Real, &mut path, &mut query);
        assert_eq!(path, "/v1beta/models/gemini-pro:streamGenerateContent");
        assert!(query.contains_key("alt"));
    }

    #[test]
    fn filters_image_model_body() {
        let mut body = json!({
            "tools": [1],
            "toolChoice": "auto",
            "generationConfig": { "thinkingConfig": { "includeThoughts": true }, "temperature": 0.5 },
        });
        filter_body_for_image_model(&mut body);
        assert!(body.get("tools").is_none());
        assert!(body.get("toolChoice").is_none());
        assert!(body["generationConfig"].get("thinkingConfig").is_none());
        assert!(body["generationConfig"].get("temperature").is_some());
    }

    #[test]
    fn recognizes_image_models() {
        assert!(is_image_model("/v1beta/models/gemini-2.5-flash-image-preview:generateContent"));
        assert!(is_image_model("/v1beta/models/imagen-3:predict"));
        assert!(!is_image_model("/v1beta/models/gemini-2.5-pro:generateContent"));
    }
}
