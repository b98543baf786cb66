//! Image inlining normalization shared by the Google-native buffered
//! passthrough and the OpenAI adapter's streaming/buffered response paths.

use gw_protocol::google::generate_content::response::GenerateContentResponse;

/// Render an inline image part as a Markdown image banner for text
/// consumers instead of raw base64.
pub fn markdown_image(mime_type: &str, data: &str) -> String {
    format!("![Generated Image](data:{mime_type};base64,{data})")
}

/// Replace every `inlineData` part in `candidates[0].content.parts` with a
/// text part carrying the Markdown image banner. Returns `true` if any
/// replacement happened, so the caller only re-serializes when needed.
pub fn inline_images(response: &mut GenerateContentResponse) -> bool {
    let mut changed = false;
    if let Some(candidate) = response.candidates.get_mut(0) {
        for part in candidate.content.parts.iter_mut() {
            if let Some(blob) = part.inline_data.take() {
                part.text = Some(markdown_image(&blob.mime_type, &blob.data));
                changed = true;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_protocol::google::generate_content::types::{Blob, Candidate, Content, Part};

    #[test]
    fn replaces_inline_data_with_markdown_image() {
        let mut response = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    parts: vec![Part {
                        inline_data: Some(Blob {
                            mime_type: "image/png".to_string(),
                            data: "QUJD".to_string(),
                        }),
                        ..Default::default()
                    }],
                    role: None,
                },
                finish_reason: None,
                index: None,
            }],
            prompt_feedback: None,
            extra: Default::default(),
        };

        assert!(inline_images(&mut response));
        let part = &response.candidates[0].content.parts[0];
        assert!(part.inline_data.is_none());
        assert_eq!(
            part.text.as_deref(),
            Some("![Generated Image](data:image/png;base64,QUJD)")
        );
    }

    #[test]
    fn no_change_when_no_inline_data() {
        let mut response = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Content {
                    parts: vec![Part {
                        text: Some("hello".to_string()),
                        ..Default::default()
                    }],
                    role: None,
                },
                finish_reason: None,
                index: None,
            }],
            prompt_feedback: None,
            extra: Default::default(),
        };

        assert!(!inline_images(&mut response));
    }
}
