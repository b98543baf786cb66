//! OpenAI chat-completions request → Google generateContent request.

use gw_protocol::google::generate_content::request::GenerateContentRequestBody;
use gw_protocol::google::generate_content::types::{
    Content, ContentRole, GenerationConfig, Part, SafetySetting, ThinkingConfig,
};
use gw_protocol::openai::chat_completions::request::CreateChatCompletionRequestBody;
use gw_protocol::openai::chat_completions::types::{
    ChatCompletionMessage, ChatCompletionRole, ContentPart, MessageContent,
};

/// Translate an OpenAI request body into the Google request body that goes
/// out on `/v1beta/models/<model>:generateContent` (or `streamGenerateContent`).
///
/// `include_thoughts` mirrors the operator reasoning toggle: when set,
/// `generationConfig.thinkingConfig` requests thought parts back from the
/// model.
pub fn translate_request(
    request: CreateChatCompletionRequestBody,
    include_thoughts: bool,
) -> GenerateContentRequestBody {
    let mut system_texts = Vec::new();
    let mut contents = Vec::new();

    for message in request.messages {
        match message.role {
            ChatCompletionRole::System => {
                if let Some(text) = message.content.as_ref().and_then(flatten_text) {
                    system_texts.push(text);
                }
            }
            ChatCompletionRole::User => {
                contents.push(Content {
                    parts: message_to_parts(message.content),
                    role: Some(ContentRole::User),
                });
            }
            ChatCompletionRole::Assistant => {
                contents.push(Content {
                    parts: message_to_parts(message.content),
                    role: Some(ContentRole::Model),
                });
            }
        }
    }

    let system_instruction = if system_texts.is_empty() {
        None
    } else {
        Some(Content {
            parts: vec![Part {
                text: Some(system_texts.join("\n")),
                ..Default::default()
            }],
            role: None,
        })
    };

    let thinking_config = include_thoughts.then(|| ThinkingConfig {
        include_thoughts: Some(true),
    });

    let generation_config = GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        max_output_tokens: request.max_tokens,
        stop_sequences: request.stop.map(|stop| stop.into_vec()),
        thinking_config,
    };

    GenerateContentRequestBody {
        contents,
        system_instruction,
        generation_config: Some(generation_config),
        safety_settings: Some(SafetySetting::block_none_defaults()),
        extra: request.extra,
    }
}

fn flatten_text(content: &MessageContent) -> Option<String> {
    match content {
        MessageContent::Text(text) => Some(text.clone()),
        MessageContent::Parts(parts) => {
            let joined: Vec<&str> = parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect();
            if joined.is_empty() {
                None
            } else {
                Some(joined.join("\n"))
            }
        }
    }
}

fn message_to_parts(content: Option<MessageContent>) -> Vec<Part> {
    match content {
        None => Vec::new(),
        Some(MessageContent::Text(text)) => vec![Part {
            text: Some(text),
            ..Default::default()
        }],
        Some(MessageContent::Parts(parts)) => {
            parts.into_iter().filter_map(content_part_to_part).collect()
        }
    }
}

fn content_part_to_part(part: ContentPart) -> Option<Part> {
    match part {
        ContentPart::Text { text } => Some(Part {
            text: Some(text),
            ..Default::default()
        }),
        ContentPart::ImageUrl { image_url } => {
            let (mime_type, data) = split_data_url(&image_url.url)?;
            Some(Part {
                inline_data: Some(gw_protocol::google::generate_content::types::Blob {
                    mime_type,
                    data,
                }),
                ..Default::default()
            })
        }
    }
}

/// Parse a `data:<mime>;base64,<data>` URL into its two components.
fn split_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (mime_type, data) = rest.split_once(";base64,")?;
    Some((mime_type.to_string(), data.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_protocol::openai::chat_completions::types::ImageUrl;

    fn message(role: ChatCompletionRole, content: MessageContent) -> ChatCompletionMessage {
        ChatCompletionMessage {
            role,
            content: Some(content),
        }
    }

    #[test]
    fn partitions_system_messages_into_system_instruction() {
        let request = CreateChatCompletionRequestBody {
            model: "gemini-1.5-pro".to_string(),
            messages: vec![
                message(
                    ChatCompletionRole::System,
                    MessageContent::Text("be terse".to_string()),
                ),
                message(
                    ChatCompletionRole::User,
                    MessageContent::Text("hi".to_string()),
                ),
            ],
            stream: None,
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            stop: None,
            extra: Default::default(),
        };

        let body = translate_request(request, false);
        assert_eq!(
            body.system_instruction.unwrap().parts[0].text.as_deref(),
            Some("be terse")
        );
        assert_eq!(body.contents.len(), 1);
        assert_eq!(body.contents[0].role, Some(ContentRole::User));
    }

    #[test]
    fn maps_image_url_parts_to_inline_data() {
        let request = CreateChatCompletionRequestBody {
            model: "gemini-1.5-pro".to_string(),
            messages: vec![message(
                ChatCompletionRole::User,
                MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: "look".to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "data:image/png;base64,QUJD".to_string(),
                        },
                    },
                ]),
            )],
            stream: None,
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            stop: None,
            extra: Default::default(),
        };

        let body = translate_request(request, false);
        let parts = &body.contents[0].parts;
        assert_eq!(parts[0].text.as_deref(), Some("look"));
        let blob = parts[1].inline_data.as_ref().unwrap();
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(blob.data, "QUJD");
    }

    #[test]
    fn always_attaches_block_none_safety_settings() {
        let request = CreateChatCompletionRequestBody {
            model: "gemini-1.5-pro".to_string(),
            messages: vec![],
            stream: None,
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            stop: None,
            extra: Default::default(),
        };

        let body = translate_request(request, true);
        assert_eq!(body.safety_settings.unwrap().len(), 4);
        assert!(
            body.generation_config
                .unwrap()
                .thinking_config
                .unwrap()
                .include_thoughts
                .unwrap()
        );
    }
}
