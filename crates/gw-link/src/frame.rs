//! Frames stored in a request's `MessageQueue`. These are the link's
//! local translation of the wire-level `AgentFrame`: a queue receives
//! either `Error` or `ResponseHeaders` first, then zero-or-more `Chunk`,
//! then exactly one `StreamEnd`.

use std::collections::HashMap;

use gw_protocol::AgentFrame;

#[derive(Debug, Clone)]
pub enum QueueFrame {
    ResponseHeaders {
        status: u16,
        headers: HashMap<String, String>,
    },
    Chunk {
        data: String,
    },
    StreamEnd,
    Error {
        status: u16,
        message: String,
    },
}

impl QueueFrame {
    /// `stream_close` on the wire becomes `StreamEnd` once it lands in the
    /// queue.
    pub fn from_agent_frame(frame: AgentFrame) -> Self {
        match frame {
            AgentFrame::ResponseHeaders { status, headers, .. } => {
                QueueFrame::ResponseHeaders { status, headers }
            }
            AgentFrame::Chunk { data, .. } => QueueFrame::Chunk { data },
            AgentFrame::StreamClose { .. } => QueueFrame::StreamEnd,
            AgentFrame::Error { status, message, .. } => QueueFrame::Error { status, message },
        }
    }
}
