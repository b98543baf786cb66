//! Non-streaming Google generateContent response → OpenAI chat.completion.

use gw_protocol::google::generate_content::response::GenerateContentResponse;
use gw_protocol::openai::chat_completions::response::{
    ChatCompletion, ChatCompletionChoice, ChatCompletionResponseMessage,
};

use crate::image::inline_images;

/// Assemble a single-choice `chat.completion` from a buffered Google
/// response, running image inlining first so generated images survive as
/// Markdown in `message.content`.
pub fn translate_response(
    mut response: GenerateContentResponse,
    id: String,
    created: i64,
    model: String,
) -> ChatCompletion {
    inline_images(&mut response);

    let candidate = response.candidates.into_iter().next();
    let (content, reasoning_content, finish_reason) = match candidate {
        Some(candidate) => {
            let mut content = String::new();
            let mut reasoning = String::new();
            for part in candidate.content.parts {
                if part.thought == Some(true) {
                    if let Some(text) = part.text {
                        reasoning.push_str(&text);
                    }
                } else if let Some(text) = part.text {
                    content.push_str(&text);
                }
            }
            let finish_reason = candidate.finish_reason.map(|reason| reason.as_wire_str().to_string());
            (
                Some(content),
                (!reasoning.is_empty()).then_some(reasoning),
                finish_reason,
            )
        }
        None => (None, None, None),
    };

    ChatCompletion {
        id,
        object: "chat.completion",
        created,
        model,
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ChatCompletionResponseMessage {
                role: "assistant",
                content,
                reasoning_content,
            },
            finish_reason,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_protocol::google::generate_content::types::{Candidate, Content, FinishReason, Part};

    #[test]
    fn separates_thought_parts_into_reasoning_content() {
        let response = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    parts: vec![
                        Part {
                            text: Some("thinking...".to_string()),
                            thought: Some(true),
                            ..Default::default()
                        },
                        Part {
                            text: Some("hello".to_string()),
                            ..Default::default()
                        },
                    ],
                    role: None,
                },
                finish_reason: Some(FinishReason::Stop),
                index: None,
            }],
            prompt_feedback: None,
            extra: Default::default(),
        };

        let completion = translate_response(
            response,
            "id".to_string(),
            0,
            "gemini-1.5-pro".to_string(),
        );
        let message = &completion.choices[0].message;
        assert_eq!(message.content.as_deref(), Some("hello"));
        assert_eq!(message.reasoning_content.as_deref(), Some("thinking..."));
        assert_eq!(completion.choices[0].finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn no_candidates_yields_empty_message() {
        let response = GenerateContentResponse {
            candidates: vec![],
            prompt_feedback: None,
            extra: Default::default(),
        };

        let completion = translate_response(
            response,
            "id".to_string(),
            0,
            "gemini-1.5-pro".to_string(),
        );
        assert!(completion.choices[0].message.content.is_none());
        assert!(completion.choices[0].finish_reason.is_none());
    }
}
