//! Bridges the single in-browser `BrowserAgent` connection to many
//! in-flight requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use gw_protocol::{AgentFrame, ControlFrame};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::frame::QueueFrame;
use crate::queue::MessageQueue;

/// Window a disconnected agent has to re-establish the control channel
/// before in-flight queues are torn down.
pub const RECONNECT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("no live agent connection")]
    NoConnection,
}

/// Multi-consumer signal: "link lost after grace" is the only event with
/// more than one consumer — the coordinator and the status page both
/// need it.
#[derive(Debug, Clone, Copy)]
pub enum LinkEvent {
    ConnectionLost,
}

/// What the link sends text frames through. The websocket handler owns the
/// actual socket and forwards whatever arrives on the paired receiver.
pub type OutboundSender = tokio::sync::mpsc::UnboundedSender<String>;

struct Connection {
    sender: OutboundSender,
    generation: u64,
}

struct Inner {
    connection: StdMutex<Option<Connection>>,
    queues: StdMutex<HashMap<String, Arc<MessageQueue>>>,
    grace_cancel: StdMutex<Option<oneshot::Sender<()>>>,
    generation_counter: StdMutex<u64>,
    events: broadcast::Sender<LinkEvent>,
}

#[derive(Clone)]
pub struct BrowserAgentLink {
    inner: Arc<Inner>,
}

impl BrowserAgentLink {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                connection: StdMutex::new(None),
                queues: StdMutex::new(HashMap::new()),
                grace_cancel: StdMutex::new(None),
                generation_counter: StdMutex::new(0),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.events.subscribe()
    }

    /// Register a new connection, cancelling any pending reconnect-grace
    /// timer. Returns the generation id the caller must hand back to
    /// `on_disconnect` so a stale disconnect from a superseded connection
    /// doesn't tear down a newer one.
    pub fn accept(&self, sender: OutboundSender) -> u64 {
        if let Some(cancel) = self.inner.grace_cancel.lock().unwrap().take() {
            let _ = cancel.send(());
        }

        let generation = {
            let mut counter = self.inner.generation_counter.lock().unwrap();
            *counter += 1;
            *counter
        };

        *self.inner.connection.lock().unwrap() = Some(Connection { sender, generation });
        info!(generation, "browser agent connected");
        generation
    }

    /// Send a control frame on the live connection.
    pub fn send(&self, frame: &ControlFrame) -> Result<(), LinkError> {
        let connection = self.inner.connection.lock().unwrap();
        let connection = connection.as_ref().ok_or(LinkError::NoConnection)?;
        let payload = serde_json::to_string(frame).map_err(|_| LinkError::NoConnection)?;
        connection
            .sender
            .send(payload)
            .map_err(|_| LinkError::NoConnection)
    }

    pub fn open_queue(&self, request_id: &str) -> Arc<MessageQueue> {
        let queue = Arc::new(MessageQueue::new());
        self.inner
            .queues
            .lock()
            .unwrap()
            .insert(request_id.to_string(), queue.clone());
        queue
    }

    pub fn close_queue(&self, request_id: &str) {
        if let Some(queue) = self.inner.queues.lock().unwrap().remove(request_id) {
            queue.close();
        }
    }

    pub fn has_live_connection(&self) -> bool {
        self.inner.connection.lock().unwrap().is_some()
    }

    /// Route one inbound agent frame to its owning queue. Unknown ids are
    /// logged and dropped.
    pub fn route_inbound(&self, frame: AgentFrame) {
        let request_id = frame.request_id().to_string();
        let queue = self.inner.queues.lock().unwrap().get(&request_id).cloned();
        match queue {
            Some(queue) => queue.enqueue(QueueFrame::from_agent_frame(frame)),
            None => debug!(request_id, "dropping frame for unknown request id"),
        }
    }

    /// Called by the websocket handler when the connection with the given
    /// generation closes or errors. Arms the reconnect-grace timer unless
    /// a newer connection has already superseded this one.
    pub fn on_disconnect(&self, generation: u64) {
        let superseded = {
            let mut connection = self.inner.connection.lock().unwrap();
            match connection.as_ref() {
                Some(current) if current.generation == generation => {
                    *connection = None;
                    false
                }
                _ => true,
            }
        };
        if superseded {
            return;
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        *self.inner.grace_cancel.lock().unwrap() = Some(cancel_tx);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_GRACE) => {
                    warn!("reconnect grace expired, closing all queues");
                    let queues: Vec<Arc<MessageQueue>> =
                        inner.queues.lock().unwrap().drain().map(|(_, q)| q).collect();
                    for queue in queues {
                        queue.close_link_lost();
                    }
                    let _ = inner.events.send(LinkEvent::ConnectionLost);
                }
                _ = cancel_rx => {
                    debug!("reconnect happened within grace window");
                }
            }
        });
    }
}

impl Default for BrowserAgentLink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_protocol::control::StreamingMode;
    use gw_protocol::control::RequestDescriptor;
    use std::collections::HashMap as StdHashMap;

    fn descriptor(request_id: &str) -> RequestDescriptor {
        RequestDescriptor {
            request_id: request_id.to_string(),
            path: "/v1beta/models/gemini-1.5-pro:generateContent".to_string(),
            method: "POST".to_string(),
            headers: StdHashMap::new(),
            query_params: StdHashMap::new(),
            body: serde_json::json!({}),
            streaming_mode: StreamingMode::Fake,
            is_generative: true,
            client_wants_stream: false,
            resume_on_prohibit: false,
            resume_limit: 0,
        }
    }

    #[test]
    fn send_without_connection_fails() {
        let link = BrowserAgentLink::new();
        let result = link.send(&ControlFrame::DispatchRequest(descriptor("r1")));
        assert!(matches!(result, Err(LinkError::NoConnection)));
    }

    #[test]
    fn accept_establishes_live_connection() {
        let link = BrowserAgentLink::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        link.accept(tx);
        assert!(link.has_live_connection());
    }

    #[test]
    fn route_inbound_drops_unknown_request_id() {
        let link = BrowserAgentLink::new();
        link.route_inbound(AgentFrame::StreamClose {
            request_id: "missing".to_string(),
        });
    }

    #[test]
    fn route_inbound_delivers_to_open_queue() {
        let link = BrowserAgentLink::new();
        let queue = link.open_queue("r1");
        link.route_inbound(AgentFrame::StreamClose {
            request_id: "r1".to_string(),
        });
        assert_eq!(queue_len(&queue), 1);
    }

    fn queue_len(queue: &Arc<MessageQueue>) -> usize {
        // Only used by tests: drain via a zero-timeout dequeue count.
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mut n = 0;
            while queue.dequeue(Duration::from_millis(1)).await.is_ok() {
                n += 1;
            }
            n
        })
    }

    #[tokio::test]
    async fn disconnect_then_accept_within_grace_keeps_queues() {
        let link = BrowserAgentLink::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let generation = link.accept(tx);
        let queue = link.open_queue("r1");

        link.on_disconnect(generation);
        let (tx2, _rx2) = tokio::sync::mpsc::unbounded_channel();
        link.accept(tx2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.enqueue(QueueFrame::StreamEnd);
        let frame = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert!(matches!(frame, QueueFrame::StreamEnd));
    }
}
