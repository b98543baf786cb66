//! Routes an inbound HTTP request to one of the coordinator's three
//! shapes.

use std::collections::HashMap;

use bytes::Bytes;
use http::{HeaderMap, Method};

use gw_protocol::openai::chat_completions::request::CreateChatCompletionRequestBody;

use crate::error::ProxyError;

#[derive(Debug)]
pub enum ClassifiedRequest {
    OpenAIChat {
        body: CreateChatCompletionRequestBody,
        client_wants_stream: bool,
    },
    OpenAIModelList,
    GooglePassthrough {
        path: String,
        method: String,
        query: HashMap<String, String>,
        body: serde_json::Value,
        client_wants_stream: bool,
        is_generative: bool,
    },
}

pub fn classify_request(
    method: &Method,
    path: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<ClassifiedRequest, ProxyError> {
    if path == "/v1/chat/completions" {
        if *method != Method::POST {
            return Err(ProxyError::method_not_allowed("expected POST"));
        }
        let parsed: CreateChatCompletionRequestBody = serde_json::from_slice(&body)
            .map_err(|err| ProxyError::bad_request(format!("invalid json: {err}")))?;
        let client_wants_stream = parsed.stream.unwrap_or(false) || wants_event_stream(headers);
        return Ok(ClassifiedRequest::OpenAIChat {
            body: parsed,
            client_wants_stream,
        });
    }

    if path == "/v1/models" {
        if *method != Method::GET {
            return Err(ProxyError::method_not_allowed("expected GET"));
        }
        return Ok(ClassifiedRequest::OpenAIModelList);
    }

    let body_value: serde_json::Value = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| ProxyError::bad_request(format!("invalid json: {err}")))?
    };

    let client_wants_stream =
        wants_event_stream(headers) || path.ends_with(":streamGenerateContent");
    let is_generative = path.contains(":generateContent") || path.contains(":streamGenerateContent");

    Ok(ClassifiedRequest::GooglePassthrough {
        path: path.to_string(),
        method: method.as_str().to_string(),
        query: query.clone(),
        body: body_value,
        client_wants_stream,
        is_generative,
    })
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("text/event-stream"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_openai_chat_completions() {
        let body = Bytes::from(r#"{"model":"gemini-1.5-pro","messages":[],"stream":true}"#);
        let classified = classify_request(
            &Method::POST,
            "/v1/chat/completions",
            &HashMap::new(),
            &HeaderMap::new(),
            body,
        )
        .unwrap();
        match classified {
            ClassifiedRequest::OpenAIChat {
                client_wants_stream,
                ..
            } => assert!(client_wants_stream),
            _ => panic!("expected OpenAIChat"),
        }
    }

    #[test]
    fn classifies_google_passthrough_with_stream_suffix() {
        let body = Bytes::from(r#"{"contents":[]}"#);
        let classified = classify_request(
            &Method::POST,
            "/v1beta/models/gemini-1.5-pro:streamGenerateContent",
            &HashMap::new(),
            &HeaderMap::new(),
            body,
        )
        .unwrap();
        match classified {
            ClassifiedRequest::GooglePassthrough {
                client_wants_stream,
                is_generative,
                ..
            } => {
                assert!(client_wants_stream);
                assert!(is_generative);
            }
            _ => panic!("expected GooglePassthrough"),
        }
    }

    #[test]
    fn classifies_openai_model_list() {
        let classified = classify_request(
            &Method::GET,
            "/v1/models",
            &HashMap::new(),
            &HeaderMap::new(),
            Bytes::new(),
        )
        .unwrap();
        assert!(matches!(classified, ClassifiedRequest::OpenAIModelList));
    }
}
