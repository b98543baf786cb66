//! Wire format for the single bidirectional control channel between the
//! gateway and the in-browser `BrowserAgent`.
//!
//! Both directions are tagged on `event_type`, kept as a single
//! `#[serde(tag = "event_type")]` enum per direction instead of a
//! hand-rolled peek-then-parse.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMode {
    Real,
    Fake,
}

/// Frames the gateway sends to the agent over the control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ControlFrame {
    DispatchRequest(RequestDescriptor),
    CancelRequest { request_id: String },
    RebindSession {
        request_id: String,
        credential_index: u32,
        credential: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub request_id: String,
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    pub body: serde_json::Value,
    pub streaming_mode: StreamingMode,
    #[serde(default)]
    pub is_generative: bool,
    #[serde(default)]
    pub client_wants_stream: bool,
    #[serde(default)]
    pub resume_on_prohibit: bool,
    #[serde(default)]
    pub resume_limit: u32,
}

/// Frames the agent sends back to the gateway over the control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AgentFrame {
    ResponseHeaders {
        request_id: String,
        status: u16,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Chunk {
        request_id: String,
        data: String,
    },
    StreamClose {
        request_id: String,
    },
    Error {
        request_id: String,
        status: u16,
        message: String,
    },
}

impl AgentFrame {
    pub fn request_id(&self) -> &str {
        match self {
            AgentFrame::ResponseHeaders { request_id, .. }
            | AgentFrame::Chunk { request_id, .. }
            | AgentFrame::StreamClose { request_id }
            | AgentFrame::Error { request_id, .. } => request_id,
        }
    }
}

/// Sentinel substring used to mark a user-initiated abort so failure
/// handling can distinguish it from a genuine upstream error.
pub const USER_ABORT_SENTINEL: &str = "user aborted";

pub fn chunk_bytes(data: &str) -> Bytes {
    Bytes::copy_from_slice(data.as_bytes())
}
