//! Streaming Google generateContent SSE frame → OpenAI chat.completion.chunk.

use gw_protocol::google::generate_content::response::GenerateContentResponse;
use gw_protocol::openai::chat_completions::stream::{ChatCompletionChunk, ChatCompletionChunkChoice};

/// Translate one decoded Google SSE `data:` payload into at most one OpenAI
/// chunk. Returns `None` when the payload carries no visible delta and no
/// finish reason.
pub fn translate_stream_chunk(
    data: &str,
    id: &str,
    created: i64,
    model: &str,
) -> Option<ChatCompletionChunk> {
    let response: GenerateContentResponse = serde_json::from_str(data).ok()?;

    if let Some(feedback) = response.prompt_feedback {
        if feedback.block_reason.is_some() {
            return Some(single_choice_chunk(
                id,
                created,
                model,
                block_banner(),
                None,
                Some("stop".to_string()),
            ));
        }
    }

    let candidate = response.candidates.into_iter().next()?;

    let mut content = String::new();
    let mut reasoning = String::new();
    for part in candidate.content.parts {
        if let Some(blob) = part.inline_data {
            content.push_str(&crate::image::markdown_image(&blob.mime_type, &blob.data));
        } else if part.thought == Some(true) {
            if let Some(text) = part.text {
                reasoning.push_str(&text);
            }
        } else if let Some(text) = part.text {
            content.push_str(&text);
        }
    }

    let finish_reason = candidate.finish_reason.map(|reason| reason.as_wire_str().to_string());

    if content.is_empty() && reasoning.is_empty() && finish_reason.is_none() {
        return None;
    }

    Some(single_choice_chunk(
        id,
        created,
        model,
        (!content.is_empty()).then_some(content),
        (!reasoning.is_empty()).then_some(reasoning),
        finish_reason,
    ))
}

fn block_banner() -> Option<String> {
    Some("[blocked by upstream safety filter]".to_string())
}

fn single_choice_chunk(
    id: &str,
    created: i64,
    model: &str,
    content: Option<String>,
    reasoning_content: Option<String>,
    finish_reason: Option<String>,
) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk",
        created,
        model: model.to_string(),
        choices: vec![ChatCompletionChunkChoice {
            index: 0,
            delta: gw_protocol::openai::chat_completions::stream::ChatCompletionDelta {
                content,
                reasoning_content,
            },
            finish_reason,
        }],
    }
}

/// Serialize a chunk as an SSE `data: ...\n\n` frame.
pub fn chunk_to_sse(chunk: &ChatCompletionChunk) -> String {
    format!(
        "data: {}\n\n",
        serde_json::to_string(chunk).unwrap_or_default()
    )
}

pub const DONE_SSE: &str = "data: [DONE]\n\n";

/// Scan a raw real-stream chunk for `"finishReason":"<X>"` without parsing
/// it as JSON. Real-stream mode writes chunks through verbatim and only
/// scans them to remember the latest reason for logging.
pub fn scan_finish_reason(chunk: &str) -> Option<String> {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let regex = PATTERN.get_or_init(|| regex::Regex::new(r#""finishReason"\s*:\s*"([A-Z_]+)""#).unwrap());
    regex
        .captures(chunk)
        .map(|captures| captures[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_error_banner_on_block_reason() {
        let data =
            r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let chunk = translate_stream_chunk(data, "id", 0, "gemini-1.5-pro").unwrap();
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(chunk.choices[0].delta.content.is_some());
    }

    #[test]
    fn appends_inline_data_as_markdown_image_to_content() {
        let data = r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"QUJD"}}]}}]}"#;
        let chunk = translate_stream_chunk(data, "id", 0, "gemini-1.5-pro").unwrap();
        assert_eq!(
            chunk.choices[0].delta.content.as_deref(),
            Some("![Generated Image](data:image/png;base64,QUJD)")
        );
    }

    #[test]
    fn routes_thought_parts_into_reasoning_content() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"hmm","thought":true}]}}]}"#;
        let chunk = translate_stream_chunk(data, "id", 0, "gemini-1.5-pro").unwrap();
        assert_eq!(chunk.choices[0].delta.reasoning_content.as_deref(), Some("hmm"));
        assert!(chunk.choices[0].delta.content.is_none());
    }

    #[test]
    fn returns_none_when_delta_empty_and_no_finish_reason() {
        let data = r#"{"candidates":[{"content":{"parts":[]}}]}"#;
        assert!(translate_stream_chunk(data, "id", 0, "gemini-1.5-pro").is_none());
    }

    #[test]
    fn emits_chunk_on_finish_reason_alone() {
        let data = r#"{"candidates":[{"content":{"parts":[]},"finishReason":"STOP"}]}"#;
        let chunk = translate_stream_chunk(data, "id", 0, "gemini-1.5-pro").unwrap();
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn scan_finish_reason_finds_embedded_reason() {
        let chunk = r#"data: {"candidates":[{"finishReason":"PROHIBITED_CONTENT"}]}"#;
        assert_eq!(
            scan_finish_reason(chunk).as_deref(),
            Some("PROHIBITED_CONTENT")
        );
    }

    #[test]
    fn scan_finish_reason_none_when_absent() {
        assert!(scan_finish_reason(r#"data: {"candidates":[{}]}"#).is_none());
    }
}
