//! Entry point from HTTP. Drives the common entry gate, then one of the
//! three response-mode state machines.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gw_common::config::StreamingMode as ConfigStreamingMode;
use gw_link::{DequeueError, MessageQueue, QueueFrame};
use gw_protocol::control::{RequestDescriptor, StreamingMode as WireStreamingMode, USER_ABORT_SENTINEL};
use gw_protocol::ControlFrame;
use gw_protocol::google::generate_content::response::GenerateContentResponse;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::ProxyError;
use crate::rotation::GateRejection;
use crate::state::AppState;

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(300);
const STREAM_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(3);
const FAKE_STREAM_FRAME_TIMEOUT: Duration = Duration::from_secs(300);

pub struct BufferedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

pub struct StreamingResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub receiver: mpsc::Receiver<Bytes>,
    pub request_id: String,
}

pub enum CoordinatorOutcome {
    Buffered(BufferedResponse),
    Streaming(StreamingResponse),
}

/// Holds the single increment of `activeRequestCount` made by
/// `enter_gate` and guarantees its release even on early return. For the
/// streaming response modes this guard is moved into the background task
/// that actually drains the queue, not dropped when the handler that
/// kicked the task off returns.
struct ReleaseGuard {
    rotation: Arc<crate::rotation::RotationController>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let rotation = self.rotation.clone();
        tokio::spawn(async move {
            rotation.release().await;
        });
    }
}

#[derive(Clone)]
pub struct RequestCoordinator {
    state: AppState,
}

impl RequestCoordinator {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Google-native passthrough.
    pub async fn process_request(
        &self,
        method: String,
        path: String,
        query: HashMap<String, String>,
        headers: HashMap<String, String>,
        body: serde_json::Value,
        client_wants_stream: bool,
        is_generative: bool,
    ) -> Result<CoordinatorOutcome, ProxyError> {
        let guard = self.enter_gate(is_generative).await?;

        let request_id = new_request_id();
        let wire_mode = self.wire_streaming_mode(client_wants_stream);
        let resume_on_prohibit = is_generative && matches!(wire_mode, WireStreamingMode::Real);
        let descriptor = RequestDescriptor {
            request_id: request_id.clone(),
            path,
            method,
            headers,
            query_params: query,
            body,
            streaming_mode: wire_mode,
            is_generative,
            client_wants_stream,
            resume_on_prohibit,
            resume_limit: self.state.settings.resume_limit(),
        };

        let queue = self.dispatch(descriptor.clone()).await?;

        if !client_wants_stream {
            self.drive_buffered_google(&request_id, queue, guard).await
        } else if matches!(wire_mode, WireStreamingMode::Real) {
            self.drive_real_stream_google(&request_id, queue, guard).await
        } else {
            self.drive_fake_stream(&request_id, queue, descriptor, GoogleFraming, guard).await
        }
    }

    /// OpenAI chat completions.
    pub async fn process_openai(
        &self,
        body: gw_protocol::openai::chat_completions::request::CreateChatCompletionRequestBody,
        client_wants_stream: bool,
        include_thoughts: bool,
        native_reasoning: bool,
    ) -> Result<CoordinatorOutcome, ProxyError> {
        let guard = self.enter_gate(true).await?;

        let model = body.model.clone();
        let google_body = gw_transform::translate_request(body, include_thoughts);
        let request_id = new_request_id();
        let wire_mode = self.wire_streaming_mode(client_wants_stream);
        let action = if matches!(wire_mode, WireStreamingMode::Real) {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let path = format!("/v1beta/models/{model}:{action}");
        let resume_on_prohibit = matches!(wire_mode, WireStreamingMode::Real);

        let descriptor = RequestDescriptor {
            request_id: request_id.clone(),
            path,
            method: "POST".to_string(),
            headers: HashMap::new(),
            query_params: HashMap::new(),
            body: serde_json::to_value(&google_body).unwrap_or(serde_json::Value::Null),
            streaming_mode: wire_mode,
            is_generative: true,
            client_wants_stream,
            resume_on_prohibit,
            resume_limit: self.state.settings.resume_limit(),
        };

        let queue = self.dispatch(descriptor.clone()).await?;
        let id = request_id.clone();
        let created = gw_common::time::now_epoch_seconds();

        if !client_wants_stream {
            self.drive_buffered_openai(&request_id, queue, id, created, model, native_reasoning, guard)
                .await
        } else if matches!(wire_mode, WireStreamingMode::Real) {
            self.drive_real_stream_openai(&request_id, queue, id, created, model, native_reasoning, guard)
                .await
        } else {
            self.drive_fake_stream(
                &request_id,
                queue,
                descriptor,
                OpenAiFraming { id, created, model, native_reasoning },
                guard,
            )
            .await
        }
    }

    /// OpenAI model list.
    pub async fn process_model_list(&self) -> Result<CoordinatorOutcome, ProxyError> {
        let guard = self.enter_gate(false).await?;

        let request_id = new_request_id();
        let descriptor = RequestDescriptor {
            request_id: request_id.clone(),
            path: "/v1beta/models".to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            query_params: HashMap::new(),
            body: serde_json::Value::Null,
            streaming_mode: WireStreamingMode::Fake,
            is_generative: false,
            client_wants_stream: false,
            resume_on_prohibit: false,
            resume_limit: 0,
        };

        let queue = self.dispatch(descriptor).await?;
        self.drive_model_list(&request_id, queue, guard).await
    }

    fn wire_streaming_mode(&self, client_wants_stream: bool) -> WireStreamingMode {
        if client_wants_stream && matches!(self.state.settings.streaming_mode(), ConfigStreamingMode::Real) {
            WireStreamingMode::Real
        } else {
            WireStreamingMode::Fake
        }
    }

    /// Common entry gate.
    async fn enter_gate(&self, is_generative: bool) -> Result<ReleaseGuard, ProxyError> {
        self.state
            .rotation
            .gate_enter()
            .await
            .map_err(|_| ProxyError::rotating_accounts())?;
        let guard = ReleaseGuard {
            rotation: self.state.rotation.clone(),
        };

        if !self.state.link.has_live_connection() {
            if self.state.rotation.is_system_busy().await {
                return Err(ProxyError::system_busy());
            }
            if self.state.rotation.attempt_silent_recovery().await.is_err() {
                return Err(ProxyError::link_unavailable());
            }
        }

        if let Err(GateRejection::SystemBusy) = self.state.rotation.gate_busy_after_recovery().await
        {
            return Err(ProxyError::system_busy());
        }

        self.state.rotation.record_usage(is_generative).await;
        Ok(guard)
    }

    async fn dispatch(&self, descriptor: RequestDescriptor) -> Result<Arc<MessageQueue>, ProxyError> {
        let queue = self.state.link.open_queue(&descriptor.request_id);
        let request_id = descriptor.request_id.clone();
        if self
            .state
            .link
            .send(&ControlFrame::DispatchRequest(descriptor))
            .is_err()
        {
            self.state.link.close_queue(&request_id);
            return Err(ProxyError::link_unavailable());
        }
        Ok(queue)
    }

    async fn fail(&self, status: u16, message: String) -> CoordinatorOutcome {
        self.on_terminal_failure(status, &message).await;
        CoordinatorOutcome::Buffered(BufferedResponse {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(
                serde_json::json!({ "error": { "message": message } }).to_string(),
            ),
        })
    }

    /// Failure handler. Cancellation-sentinel errors don't count as
    /// failures or drive a switch.
    async fn on_terminal_failure(&self, status: u16, message: &str) {
        if message.contains(USER_ABORT_SENTINEL) {
            return;
        }
        let threshold_reached = self.state.rotation.record_failure().await;
        let immediate = self.state.rotation.immediate_switch_needed(status);
        if immediate || threshold_reached {
            let rotation = self.state.rotation.clone();
            tokio::spawn(async move {
                if let Err(err) = rotation.switch_immediate().await {
                    warn!(error = %err, "failure-triggered switch failed");
                }
            });
        }
    }

    async fn drive_buffered_google(
        &self,
        request_id: &str,
        queue: Arc<MessageQueue>,
        _guard: ReleaseGuard,
    ) -> Result<CoordinatorOutcome, ProxyError> {
        let accumulated = match self.accumulate_body(request_id, &queue).await {
            Accumulated::Body(status, body) => (status, body),
            Accumulated::Error(outcome) => return Ok(outcome),
        };
        let (status, body) = accumulated;

        let body = match serde_json::from_str::<GenerateContentResponse>(&body) {
            Ok(mut parsed) if gw_transform::image::inline_images(&mut parsed) => {
                serde_json::to_string(&parsed).unwrap_or(body)
            }
            _ => body,
        };

        Ok(CoordinatorOutcome::Buffered(BufferedResponse {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(body),
        }))
    }

    async fn drive_buffered_openai(
        &self,
        request_id: &str,
        queue: Arc<MessageQueue>,
        id: String,
        created: i64,
        model: String,
        native_reasoning: bool,
        _guard: ReleaseGuard,
    ) -> Result<CoordinatorOutcome, ProxyError> {
        let (status, body) = match self.accumulate_body(request_id, &queue).await {
            Accumulated::Body(status, body) => (status, body),
            Accumulated::Error(outcome) => return Ok(outcome),
        };

        let response: GenerateContentResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(err) => return Ok(self.fail(502, format!("malformed upstream body: {err}")).await),
        };

        let mut completion = gw_transform::translate_response(response, id, created, model);
        for choice in &mut completion.choices {
            let (content, reasoning) = fold_reasoning(
                choice.message.content.take(),
                choice.message.reasoning_content.take(),
                native_reasoning,
            );
            choice.message.content = content;
            choice.message.reasoning_content = reasoning;
        }
        self.state.rotation.record_success().await;

        Ok(CoordinatorOutcome::Buffered(BufferedResponse {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(serde_json::to_string(&completion).unwrap_or_default()),
        }))
    }

    async fn drive_model_list(
        &self,
        request_id: &str,
        queue: Arc<MessageQueue>,
        _guard: ReleaseGuard,
    ) -> Result<CoordinatorOutcome, ProxyError> {
        let (status, body) = match self.accumulate_body(request_id, &queue).await {
            Accumulated::Body(status, body) => (status, body),
            Accumulated::Error(outcome) => return Ok(outcome),
        };

        let google: gw_protocol::google::list_models::response::ListModelsResponse =
            match serde_json::from_str(&body) {
                Ok(parsed) => parsed,
                Err(err) => {
                    return Ok(self.fail(502, format!("malformed upstream body: {err}")).await);
                }
            };
        let translated = gw_transform::list_models::translate_list_models(google);
        self.state.rotation.record_success().await;

        Ok(CoordinatorOutcome::Buffered(BufferedResponse {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(serde_json::to_string(&translated).unwrap_or_default()),
        }))
    }

    /// Drains `queue` to completion and always closes it before returning,
    /// whether the drain ended in a body, an upstream error, or a timeout.
    async fn accumulate_body(&self, request_id: &str, queue: &Arc<MessageQueue>) -> Accumulated {
        let result = self.accumulate_body_inner(request_id, queue).await;
        self.state.link.close_queue(request_id);
        result
    }

    async fn accumulate_body_inner(&self, request_id: &str, queue: &Arc<MessageQueue>) -> Accumulated {
        let first = queue.dequeue(FIRST_FRAME_TIMEOUT).await;
        let status = match first {
            Ok(QueueFrame::ResponseHeaders { status, .. }) => status,
            Ok(QueueFrame::Error { status, message, .. }) => {
                return Accumulated::Error(self.fail(status, message).await);
            }
            Ok(_) => {
                return Accumulated::Error(self.fail(502, "unexpected first frame".to_string()).await);
            }
            Err(err) => {
                return Accumulated::Error(self.fail(504, dequeue_error_message(request_id, err)).await);
            }
        };

        let mut body = String::new();
        loop {
            match queue.dequeue(FIRST_FRAME_TIMEOUT).await {
                Ok(QueueFrame::Chunk { data }) => body.push_str(&data),
                Ok(QueueFrame::StreamEnd) => break,
                Ok(QueueFrame::Error { status, message, .. }) => {
                    return Accumulated::Error(self.fail(status, message).await);
                }
                Ok(QueueFrame::ResponseHeaders { .. }) => continue,
                Err(err) => {
                    return Accumulated::Error(
                        self.fail(504, dequeue_error_message(request_id, err)).await,
                    );
                }
            }
        }
        Accumulated::Body(status, body)
    }

    async fn drive_real_stream_google(
        &self,
        request_id: &str,
        queue: Arc<MessageQueue>,
        guard: ReleaseGuard,
    ) -> Result<CoordinatorOutcome, ProxyError> {
        let status = match self.await_stream_start(request_id, &queue).await {
            Ok(status) => status,
            Err(outcome) => return Ok(outcome),
        };

        let (tx, rx) = mpsc::channel::<Bytes>(16);
        let coordinator = self.clone();
        let request_id = request_id.to_string();
        let spawned_request_id = request_id.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let request_id = spawned_request_id;
            let mut last_finish_reason = None;
            let mut failed = false;
            loop {
                match queue.dequeue(STREAM_CHUNK_TIMEOUT).await {
                    Ok(QueueFrame::Chunk { data }) => {
                        if let Some(reason) = gw_transform::stream::scan_finish_reason(&data) {
                            last_finish_reason = Some(reason);
                        }
                        if tx.send(Bytes::from(data)).await.is_err() {
                            break;
                        }
                    }
                    Ok(QueueFrame::StreamEnd) => break,
                    Ok(QueueFrame::Error { status, message, .. }) => {
                        failed = true;
                        coordinator.on_terminal_failure(status, &message).await;
                        break;
                    }
                    Ok(QueueFrame::ResponseHeaders { .. }) => continue,
                    Err(DequeueError::Timeout) => {
                        warn!(%request_id, "real-stream chunk timeout, treating as clean end");
                        break;
                    }
                    Err(DequeueError::Closed) => break,
                    Err(DequeueError::LinkLost) => {
                        failed = true;
                        coordinator
                            .on_terminal_failure(502, &dequeue_error_message(&request_id, DequeueError::LinkLost))
                            .await;
                        break;
                    }
                }
            }
            coordinator.state.link.close_queue(&request_id);
            if let Some(reason) = last_finish_reason {
                info!(%request_id, %reason, "real-stream finished");
            }
            if !failed {
                coordinator.state.rotation.record_success().await;
            }
        });

        Ok(CoordinatorOutcome::Streaming(StreamingResponse {
            status,
            headers: sse_headers(),
            receiver: rx,
            request_id,
        }))
    }

    async fn drive_real_stream_openai(
        &self,
        request_id: &str,
        queue: Arc<MessageQueue>,
        id: String,
        created: i64,
        model: String,
        native_reasoning: bool,
        guard: ReleaseGuard,
    ) -> Result<CoordinatorOutcome, ProxyError> {
        let status = match self.await_stream_start(request_id, &queue).await {
            Ok(status) => status,
            Err(outcome) => return Ok(outcome),
        };

        let (tx, rx) = mpsc::channel::<Bytes>(16);
        let coordinator = self.clone();
        let request_id = request_id.to_string();
        let spawned_request_id = request_id.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let request_id = spawned_request_id;
            let mut failed = false;
            loop {
                match queue.dequeue(STREAM_CHUNK_TIMEOUT).await {
                    Ok(QueueFrame::Chunk { data }) => {
                        let data = data.strip_prefix("data: ").unwrap_or(&data).trim();
                        if data.is_empty() || data == "[DONE]" {
                            continue;
                        }
                        if let Some(mut chunk) =
                            gw_transform::translate_stream_chunk(data, &id, created, &model)
                        {
                            for choice in &mut chunk.choices {
                                let (content, reasoning) = fold_reasoning(
                                    choice.delta.content.take(),
                                    choice.delta.reasoning_content.take(),
                                    native_reasoning,
                                );
                                choice.delta.content = content;
                                choice.delta.reasoning_content = reasoning;
                            }
                            let sse = gw_transform::stream::chunk_to_sse(&chunk);
                            if tx.send(Bytes::from(sse)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(QueueFrame::StreamEnd) => break,
                    Ok(QueueFrame::Error { status, message, .. }) => {
                        failed = true;
                        coordinator.on_terminal_failure(status, &message).await;
                        break;
                    }
                    Ok(QueueFrame::ResponseHeaders { .. }) => continue,
                    Err(DequeueError::Timeout) => {
                        warn!(%request_id, "real-stream chunk timeout, treating as clean end");
                        break;
                    }
                    Err(DequeueError::Closed) => break,
                    Err(DequeueError::LinkLost) => {
                        failed = true;
                        coordinator
                            .on_terminal_failure(502, &dequeue_error_message(&request_id, DequeueError::LinkLost))
                            .await;
                        break;
                    }
                }
            }
            coordinator.state.link.close_queue(&request_id);
            let _ = tx
                .send(Bytes::from_static(gw_transform::stream::DONE_SSE.as_bytes()))
                .await;
            if !failed {
                coordinator.state.rotation.record_success().await;
            }
        });

        Ok(CoordinatorOutcome::Streaming(StreamingResponse {
            status,
            headers: sse_headers(),
            receiver: rx,
            request_id,
        }))
    }

    /// Waits for the first frame of a streaming response. On success the
    /// queue stays open for the caller's background driver; on every error
    /// path it's closed here since no driver will take ownership of it.
    async fn await_stream_start(
        &self,
        request_id: &str,
        queue: &Arc<MessageQueue>,
    ) -> Result<u16, CoordinatorOutcome> {
        let result = match queue.dequeue(FIRST_FRAME_TIMEOUT).await {
            Ok(QueueFrame::ResponseHeaders { status, .. }) => return Ok(status),
            Ok(QueueFrame::Error { status, message, .. }) => self.fail(status, message).await,
            Ok(_) => self.fail(502, "unexpected first frame".to_string()).await,
            Err(err) => {
                self.fail(504, dequeue_error_message(request_id, err))
                    .await
            }
        };
        self.state.link.close_queue(request_id);
        Err(result)
    }

    /// Fake-stream mode: the client gets an SSE response immediately; a
    /// background retry loop does the real non-streaming round trip and
    /// emits a single synthesized chunk on success, with a keep-alive
    /// comment every few seconds while an attempt is in flight.
    async fn drive_fake_stream<F: ChunkFraming + Send + Sync + 'static>(
        &self,
        request_id: &str,
        mut queue: Arc<MessageQueue>,
        descriptor: RequestDescriptor,
        framing: F,
        guard: ReleaseGuard,
    ) -> Result<CoordinatorOutcome, ProxyError> {
        let max_retries = self.state.config.max_retries.max(1);
        let retry_delay = Duration::from_millis(self.state.config.retry_delay_ms);
        let (tx, rx) = mpsc::channel::<Bytes>(4);
        let coordinator = self.clone();
        let request_id = request_id.to_string();
        let spawned_request_id = request_id.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let request_id = spawned_request_id;
            let mut last_error: Option<(u16, String)> = None;

            for attempt in 0..max_retries {
                if attempt > 0 {
                    tokio::time::sleep(retry_delay).await;
                    if coordinator
                        .state
                        .link
                        .send(&ControlFrame::DispatchRequest(descriptor.clone()))
                        .is_err()
                    {
                        last_error = Some((503, "agent link unavailable".to_string()));
                        continue;
                    }
                    queue = coordinator.state.link.open_queue(&request_id);
                }

                let mut keep_alive = tokio::time::interval(KEEP_ALIVE_INTERVAL);
                keep_alive.tick().await;

                let headers_frame = loop {
                    tokio::select! {
                        frame = queue.dequeue(FAKE_STREAM_FRAME_TIMEOUT) => break frame,
                        _ = keep_alive.tick() => {
                            if tx.send(Bytes::from_static(b": keep-alive\n\n")).await.is_err() {
                                coordinator.state.link.close_queue(&request_id);
                                return;
                            }
                        }
                    }
                };

                match headers_frame {
                    Ok(QueueFrame::ResponseHeaders { .. }) => {
                        let body_frame = queue.dequeue(FAKE_STREAM_FRAME_TIMEOUT).await;
                        coordinator.state.link.close_queue(&request_id);
                        match body_frame {
                            Ok(QueueFrame::Chunk { data }) => {
                                coordinator.state.rotation.record_success().await;
                                let formatted = framing.format(&data);
                                let _ = tx
                                    .send(Bytes::from(format!("data: {formatted}\n\n")))
                                    .await;
                                let _ = tx
                                    .send(Bytes::from_static(gw_transform::stream::DONE_SSE.as_bytes()))
                                    .await;
                                return;
                            }
                            _ => {
                                last_error =
                                    Some((502, "missing fake-stream body chunk".to_string()));
                            }
                        }
                    }
                    Ok(QueueFrame::Error { status, message, .. }) => {
                        coordinator.state.link.close_queue(&request_id);
                        last_error = Some((status, message));
                    }
                    Ok(_) => {
                        coordinator.state.link.close_queue(&request_id);
                        last_error = Some((502, "unexpected first frame".to_string()));
                    }
                    Err(err) => {
                        coordinator.state.link.close_queue(&request_id);
                        last_error = Some((504, err.to_string()));
                    }
                }
            }

            let (status, message) = last_error.unwrap_or((502, "exhausted retries".to_string()));
            if !message.contains(USER_ABORT_SENTINEL) {
                coordinator.on_terminal_failure(status, &message).await;
            }
            let payload = serde_json::json!({ "error": { "message": message } });
            let _ = tx.send(Bytes::from(format!("data: {payload}\n\n"))).await;
            let _ = tx
                .send(Bytes::from_static(gw_transform::stream::DONE_SSE.as_bytes()))
                .await;
        });

        Ok(CoordinatorOutcome::Streaming(StreamingResponse {
            status: 200,
            headers: sse_headers(),
            receiver: rx,
            request_id,
        }))
    }

    /// Client closed the connection before the response ended. Idempotent.
    pub fn cancel(&self, request_id: &str) {
        let _ = self
            .state
            .link
            .send(&ControlFrame::CancelRequest {
                request_id: request_id.to_string(),
            });
    }
}

enum Accumulated {
    Body(u16, String),
    Error(CoordinatorOutcome),
}

trait ChunkFraming {
    fn format(&self, raw: &str) -> String;
}

struct GoogleFraming;
impl ChunkFraming for GoogleFraming {
    fn format(&self, raw: &str) -> String {
        raw.to_string()
    }
}

struct OpenAiFraming {
    id: String,
    created: i64,
    model: String,
    native_reasoning: bool,
}
impl ChunkFraming for OpenAiFraming {
    fn format(&self, raw: &str) -> String {
        let response: Result<GenerateContentResponse, _> = serde_json::from_str(raw);
        match response {
            Ok(response) => {
                let completion = gw_transform::translate_response(
                    response,
                    self.id.clone(),
                    self.created,
                    self.model.clone(),
                );
                let chunk = gw_protocol::openai::chat_completions::stream::ChatCompletionChunk {
                    id: completion.id,
                    object: "chat.completion.chunk",
                    created: completion.created,
                    model: completion.model,
                    choices: completion
                        .choices
                        .into_iter()
                        .map(|choice| {
                            let (content, reasoning) = fold_reasoning(
                                choice.message.content,
                                choice.message.reasoning_content,
                                self.native_reasoning,
                            );
                            gw_protocol::openai::chat_completions::stream::ChatCompletionChunkChoice {
                                index: choice.index,
                                delta: gw_protocol::openai::chat_completions::stream::ChatCompletionDelta {
                                    content,
                                    reasoning_content: reasoning,
                                },
                                finish_reason: choice.finish_reason,
                            }
                        })
                        .collect(),
                };
                serde_json::to_string(&chunk).unwrap_or_default()
            }
            Err(_) => raw.to_string(),
        }
    }
}

/// Operator toggle: with native reasoning on, Google `thought:true` text
/// stays in `reasoning_content`; with it off, it's folded ahead of
/// `content` behind a `<think>` tag for clients that only read the single
/// field.
fn fold_reasoning(
    content: Option<String>,
    reasoning_content: Option<String>,
    native_reasoning: bool,
) -> (Option<String>, Option<String>) {
    if native_reasoning {
        return (content, reasoning_content);
    }
    match reasoning_content {
        Some(reasoning) => {
            let folded = format!("<think>{reasoning}</think>{}", content.unwrap_or_default());
            (Some(folded), None)
        }
        None => (content, None),
    }
}

fn sse_headers() -> Vec<(String, String)> {
    vec![
        ("content-type".to_string(), "text/event-stream".to_string()),
        ("cache-control".to_string(), "no-cache".to_string()),
        ("connection".to_string(), "keep-alive".to_string()),
    ]
}

fn dequeue_error_message(request_id: &str, err: DequeueError) -> String {
    match err {
        DequeueError::Timeout => format!("request {request_id} timed out waiting for agent"),
        DequeueError::Closed => format!("request {request_id} aborted: {USER_ABORT_SENTINEL}"),
        DequeueError::LinkLost => format!("request {request_id} failed: browser agent link lost"),
    }
}

fn new_request_id() -> String {
    format!(
        "{}-{:08x}",
        gw_common::time::now_epoch_millis(),
        rand::random::<u32>()
    )
}
