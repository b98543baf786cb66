//! Data-plane HTTP surface: classify, hand off to the coordinator,
//! translate its outcome into an axum `Response`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context as PollContext, Poll};

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::Router;
use futures_util::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use gw_core::{classify_request, AppState, ClassifiedRequest, CoordinatorOutcome, ProxyError, RequestCoordinator};

use crate::admin::admin_router;
use crate::ws::ws_upgrade;

#[derive(Clone)]
pub struct ProxyState {
    pub coordinator: RequestCoordinator,
    pub app: AppState,
}

/// Full HTTP surface: data plane + operator endpoints + the control-channel
/// upgrade, with one auth layer covering everything except `/agent/ws`.
pub fn router(state: AppState) -> Router {
    let proxy_state = ProxyState {
        coordinator: RequestCoordinator::new(state.clone()),
        app: state.clone(),
    };

    let data_plane = Router::new()
        .route("/v1/chat/completions", post(openai_chat_completions))
        .route("/v1/models", get(openai_model_list))
        .route("/agent/ws", get(ws_upgrade))
        .fallback(any(google_passthrough))
        .with_state(proxy_state);

    data_plane
        .merge(admin_router(state.clone()))
        .layer(middleware::from_fn_with_state(state, proxy_auth))
}

/// Extract bearer/`x-goog-api-key`/`x-api-key`/`?key=`, default key
/// `123456` when `API_KEYS` is unset. The control channel upgrade bypasses
/// data-plane auth — the agent binary doesn't carry a client API key.
async fn proxy_auth(
    State(state): State<AppState>,
    mut req: axum::http::Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if req.uri().path() == "/agent/ws" {
        return Ok(next.run(req).await);
    }

    let key = extract_key(req.headers(), req.uri().query());
    strip_auth_headers(req.headers_mut());
    strip_key_query(req.uri_mut());

    match key {
        Some(key) if state.config.api_keys.iter().any(|k| k == &key) => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

fn extract_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if let Some(token) = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer ")) {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    if let Some(value) = headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    let pairs = serde_urlencoded::from_str::<Vec<(String, String)>>(query?).ok()?;
    pairs
        .into_iter()
        .find(|(k, _)| k == "key")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn strip_auth_headers(headers: &mut HeaderMap) {
    headers.remove(header::AUTHORIZATION);
    headers.remove("x-api-key");
    headers.remove("x-goog-api-key");
}

fn strip_key_query(uri: &mut axum::http::Uri) {
    let Some(query) = uri.query() else { return };
    let Ok(pairs) = serde_urlencoded::from_str::<Vec<(String, String)>>(query) else {
        return;
    };
    let filtered: Vec<(String, String)> = pairs.into_iter().filter(|(k, _)| k != "key").collect();
    let Ok(new_query) = serde_urlencoded::to_string(&filtered) else {
        return;
    };
    let new_uri_str = if new_query.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{new_query}", uri.path())
    };
    if let Ok(new_uri) = new_uri_str.parse() {
        *uri = new_uri;
    }
}

async fn openai_chat_completions(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let classified = classify_request(&Method::POST, "/v1/chat/completions", &HashMap::new(), &headers, body);
    let ClassifiedRequest::OpenAIChat { body, client_wants_stream } = match classified {
        Ok(classified) => classified,
        Err(err) => return proxy_error_response(err),
    } else {
        return proxy_error_response(ProxyError::bad_request("unexpected classification"));
    };

    let include_thoughts = state.app.settings.include_thoughts();
    let native_reasoning = state.app.settings.native_reasoning();
    match state
        .coordinator
        .process_openai(body, client_wants_stream, include_thoughts, native_reasoning)
        .await
    {
        Ok(outcome) => outcome_to_response(outcome, &state.coordinator),
        Err(err) => proxy_error_response(err),
    }
}

async fn openai_model_list(State(state): State<ProxyState>) -> Response {
    match state.coordinator.process_model_list().await {
        Ok(outcome) => outcome_to_response(outcome, &state.coordinator),
        Err(err) => proxy_error_response(err),
    }
}

async fn google_passthrough(
    State(state): State<ProxyState>,
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    path: axum::extract::OriginalUri,
    body: Bytes,
) -> Response {
    let request_path = path.0.path().to_string();
    let classified = classify_request(&method, &request_path, &query, &headers, body);
    let (path, method, query, body_value, client_wants_stream, is_generative) = match classified {
        Ok(ClassifiedRequest::GooglePassthrough {
            path,
            method,
            query,
            body,
            client_wants_stream,
            is_generative,
        }) => (path, method, query, body, client_wants_stream, is_generative),
        Ok(_) => return proxy_error_response(ProxyError::not_found("no route for this path")),
        Err(err) => return proxy_error_response(err),
    };

    let header_map = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    match state
        .coordinator
        .process_request(method, path, query, header_map, body_value, client_wants_stream, is_generative)
        .await
    {
        Ok(outcome) => outcome_to_response(outcome, &state.coordinator),
        Err(err) => proxy_error_response(err),
    }
}

fn outcome_to_response(outcome: CoordinatorOutcome, coordinator: &RequestCoordinator) -> Response {
    match outcome {
        CoordinatorOutcome::Buffered(buffered) => {
            let mut builder = Response::builder().status(buffered.status);
            if let Some(builder_headers) = builder.headers_mut() {
                apply_headers(builder_headers, &buffered.headers);
            }
            builder
                .body(Body::from(buffered.body))
                .unwrap_or_else(|_| response_build_failed())
        }
        CoordinatorOutcome::Streaming(streaming) => {
            let mut builder = Response::builder().status(streaming.status);
            if let Some(builder_headers) = builder.headers_mut() {
                apply_headers(builder_headers, &streaming.headers);
            }
            let stream = CancelOnDisconnect {
                inner: ReceiverStream::new(streaming.receiver),
                coordinator: coordinator.clone(),
                request_id: streaming.request_id,
                finished: false,
            };
            builder
                .body(Body::from_stream(stream))
                .unwrap_or_else(|_| response_build_failed())
        }
    }
}

/// Wraps the coordinator's chunk receiver so a client disconnecting mid
/// stream (which drops the body before it sees `StreamEnd`) still reaches
/// the agent as a cancellation instead of leaking the in-flight request.
struct CancelOnDisconnect {
    inner: ReceiverStream<Bytes>,
    coordinator: RequestCoordinator,
    request_id: String,
    finished: bool,
}

impl Stream for CancelOnDisconnect {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut PollContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for CancelOnDisconnect {
    fn drop(&mut self) {
        if !self.finished {
            self.coordinator.cancel(&self.request_id);
        }
    }
}

fn apply_headers(builder_headers: &mut HeaderMap, headers: &[(String, String)]) {
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            builder_headers.insert(name, value);
        } else {
            warn!(name, "dropping unencodable response header");
        }
    }
}

fn response_build_failed() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response()
}

fn proxy_error_response(err: ProxyError) -> Response {
    let mut builder = Response::builder().status(err.status);
    if let Some(headers) = builder.headers_mut() {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    builder
        .body(Body::from(err.body))
        .unwrap_or_else(|_| response_build_failed())
}
