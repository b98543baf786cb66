//! Dispatches one `RequestDescriptor` against the upstream Google API and
//! frames the result back to the gateway.
//!
//! Cancellation is handled by the caller aborting the tokio task this
//! future runs in, so nothing here needs to poll a cancellation flag —
//! dropping the in-flight `wreq` response drops the underlying connection.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use gw_protocol::control::{RequestDescriptor, StreamingMode};
use gw_protocol::AgentFrame;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use wreq::{Client, Method, Response};

use crate::resume;
use crate::sanitize;

const BASE_URL: &str = "https://generativelanguage.googleapis.com";
const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const FIRST_BYTE_TIMEOUT: Duration = Duration::from_secs(600);
const RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

#[derive(Debug, thiserror::Error)]
enum TransportFailure {
    #[error("network error: {0}")]
    Network(String),
    #[error("idle timeout waiting for first byte")]
    Timeout,
}

pub async fn dispatch(descriptor: RequestDescriptor, client: Client, outbound: UnboundedSender<String>) {
    let request_id = descriptor.request_id.clone();
    let mode = descriptor.streaming_mode;

    let mut path = descriptor.path.clone();
    let mut query = descriptor.query_params.clone();
    let mut headers = descriptor.headers.clone();
    let mut body = descriptor.body.clone();
    sanitize::sanitize(mode, &mut path, &mut query, &mut headers, &mut body);

    let method = descriptor.method.parse::<Method>().unwrap_or(Method::POST);
    let resume_enabled = descriptor.resume_on_prohibit && mode == StreamingMode::Real && descriptor.resume_limit > 0;

    let response = match tokio::time::timeout(
        FIRST_BYTE_TIMEOUT,
        send_with_retries(&client, method.clone(), &path, &query, &headers, &body),
    )
    .await
    {
        Ok(Ok(response)) => response,
        Ok(Err(failure)) => return send_transport_error(&outbound, &request_id, failure),
        Err(_) => return send_transport_error(&outbound, &request_id, TransportFailure::Timeout),
    };

    let status = response.status().as_u16();
    let response_headers = headers_to_map(response.headers());
    send_frame(
        &outbound,
        AgentFrame::ResponseHeaders {
            request_id: request_id.clone(),
            status,
            headers: response_headers,
        },
    );

    if mode == StreamingMode::Fake {
        stream_buffered(response, &request_id, &outbound).await;
        return;
    }

    if resume_enabled {
        stream_with_resume(
            response,
            body,
            &request_id,
            &client,
            method,
            &path,
            &query,
            &headers,
            descriptor.resume_limit,
            &outbound,
        )
        .await;
    } else {
        stream_plain(response, &request_id, &outbound).await;
    }
}

async fn send_with_retries(
    client: &Client,
    method: Method,
    path: &str,
    query: &HashMap<String, String>,
    headers: &HashMap<String, String>,
    body: &Value,
) -> Result<Response, TransportFailure> {
    let mut last_error = None;
    for attempt in 1..=MAX_ATTEMPTS {
        match send_once(client, method.clone(), path, query, headers, body).await {
            Ok(response) => {
                let status = response.status().as_u16();
                if attempt < MAX_ATTEMPTS && RETRYABLE_STATUSES.contains(&status) {
                    debug!(attempt, status, "retryable upstream status, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                warn!(attempt, error = %err, "upstream fetch failed");
                last_error = Some(err);
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            }
        }
    }
    Err(TransportFailure::Network(
        last_error.map(|err| err.to_string()).unwrap_or_else(|| "unknown transport error".to_string()),
    ))
}

async fn send_once(
    client: &Client,
    method: Method,
    path: &str,
    query: &HashMap<String, String>,
    headers: &HashMap<String, String>,
    body: &Value,
) -> Result<Response, wreq::Error> {
    let url = format!("{BASE_URL}{path}");
    let mut builder = client.request(method, &url).query(&query.iter().collect::<Vec<_>>());
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder.json(body).send().await
}

async fn stream_plain(response: Response, request_id: &str, outbound: &UnboundedSender<String>) {
    let mut stream = response.bytes_stream();
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                let data = String::from_utf8_lossy(&chunk).into_owned();
                send_frame(
                    outbound,
                    AgentFrame::Chunk {
                        request_id: request_id.to_string(),
                        data,
                    },
                );
            }
            Err(err) => {
                warn!(error = %err, "stream read failed mid-response");
                break;
            }
        }
    }
    send_frame(outbound, AgentFrame::StreamClose { request_id: request_id.to_string() });
}

async fn stream_buffered(response: Response, request_id: &str, outbound: &UnboundedSender<String>) {
    match response.bytes().await {
        Ok(body) => {
            let data = String::from_utf8_lossy(&body).into_owned();
            send_frame(
                outbound,
                AgentFrame::Chunk {
                    request_id: request_id.to_string(),
                    data,
                },
            );
        }
        Err(err) => {
            warn!(error = %err, "failed to buffer fake-mode response body");
        }
    }
    send_frame(outbound, AgentFrame::StreamClose { request_id: request_id.to_string() });
}

/// Real-mode stream with the context-concatenation auto-resume loop. Lines
/// are reconstructed from raw reads so a truncation line can be inspected
/// (and, if it triggers a resume, withheld) before it reaches the client.
#[allow(clippy::too_many_arguments)]
async fn stream_with_resume(
    mut response: Response,
    mut current_body: Value,
    request_id: &str,
    client: &Client,
    method: Method,
    path: &str,
    query: &HashMap<String, String>,
    headers: &HashMap<String, String>,
    resume_limit: u32,
    outbound: &UnboundedSender<String>,
) {
    let mut resumes_used = 0u32;

    'attempts: loop {
        let mut stream = response.bytes_stream();
        let mut line_buf = String::new();
        let mut accumulated = String::new();

        loop {
            let item = match stream.next().await {
                Some(item) => item,
                None => break,
            };
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(error = %err, "stream read failed mid-response");
                    break;
                }
            };
            line_buf.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = line_buf.find('\n') {
                let line = line_buf[..pos].trim_end_matches('\r').to_string();
                line_buf.drain(..=pos);
                if line.trim().is_empty() {
                    continue;
                }

                match resume::inspect_line(&line) {
                    Some(inspection) => {
                        accumulated.push_str(&inspection.text);
                        if let Some(reason) = inspection.finish_reason {
                            if resume::is_resumable(reason) {
                                if resumes_used < resume_limit {
                                    resumes_used += 1;
                                    current_body = resume::build_resume_body(&current_body, &accumulated);
                                    match send_with_retries(client, method.clone(), path, query, headers, &current_body)
                                        .await
                                    {
                                        Ok(next) => {
                                            response = next;
                                            continue 'attempts;
                                        }
                                        Err(failure) => {
                                            warn!(error = %failure, "resume re-dispatch failed");
                                            send_frame(
                                                outbound,
                                                AgentFrame::StreamClose { request_id: request_id.to_string() },
                                            );
                                            return;
                                        }
                                    }
                                }
                                send_frame(
                                    outbound,
                                    AgentFrame::StreamClose { request_id: request_id.to_string() },
                                );
                                return;
                            }
                        }
                        send_frame(
                            outbound,
                            AgentFrame::Chunk {
                                request_id: request_id.to_string(),
                                data: line,
                            },
                        );
                    }
                    None => send_frame(
                        outbound,
                        AgentFrame::Chunk {
                            request_id: request_id.to_string(),
                            data: line,
                        },
                    ),
                }
            }
        }

        break;
    }

    send_frame(outbound, AgentFrame::StreamClose { request_id: request_id.to_string() });
}

fn send_transport_error(outbound: &UnboundedSender<String>, request_id: &str, failure: TransportFailure) {
    let status = match failure {
        TransportFailure::Timeout => 504,
        TransportFailure::Network(_) => 502,
    };
    send_frame(
        outbound,
        AgentFrame::Error {
            request_id: request_id.to_string(),
            status,
            message: failure.to_string(),
        },
    );
}

fn headers_to_map(headers: &wreq::header::HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.insert(name.as_str().to_string(), value.to_string());
        }
    }
    map
}

fn send_frame(outbound: &UnboundedSender<String>, frame: AgentFrame) {
    match serde_json::to_string(&frame) {
        Ok(payload) => {
            let _ = outbound.send(payload);
        }
        Err(err) => warn!(error = %err, "failed to serialize agent frame"),
    }
}
