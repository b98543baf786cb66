//! Owns the single control-channel connection to the gateway. Reconnects
//! with a fixed back-off; `BrowserAgentLink` on the gateway side arbitrates
//! generations across reconnects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gw_protocol::control::ControlFrame;
use gw_protocol::AgentFrame;
use serde_json::Value;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::fetch;
use crate::session::{self, CredentialSession};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

pub struct AgentClient {
    ws_url: String,
    initial_credential: Value,
}

impl AgentClient {
    pub fn new(ws_url: String, initial_credential: Value) -> Self {
        Self { ws_url, initial_credential }
    }

    /// Runs until the process is stopped; each dropped connection is
    /// retried after `RECONNECT_DELAY`.
    pub async fn run(self) {
        loop {
            if let Err(err) = self.connect_once().await {
                warn!(error = %err, "control channel connection ended");
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn connect_once(&self) -> anyhow::Result<()> {
        let session = session::build(&self.initial_credential)?;
        let current = Arc::new(Mutex::new(session));

        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.ws_url).await?;
        info!(url = %self.ws_url, "control channel connected");
        let (mut sink, mut stream) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let forward = tokio::spawn(async move {
            while let Some(payload) = outbound_rx.recv().await {
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
        });

        let in_flight: Arc<Mutex<HashMap<String, AbortHandle>>> = Arc::new(Mutex::new(HashMap::new()));

        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<ControlFrame>(&text) {
                    Ok(frame) => self.handle_frame(frame, &current, &in_flight, &outbound_tx),
                    Err(err) => warn!(error = %err, "malformed control frame, dropping"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(err) => {
                    warn!(error = %err, "control channel read error");
                    break;
                }
            }
        }

        forward.abort();
        for (_, handle) in in_flight.lock().unwrap().drain() {
            handle.abort();
        }
        Ok(())
    }

    fn handle_frame(
        &self,
        frame: ControlFrame,
        current: &Arc<Mutex<CredentialSession>>,
        in_flight: &Arc<Mutex<HashMap<String, AbortHandle>>>,
        outbound_tx: &tokio::sync::mpsc::UnboundedSender<String>,
    ) {
        match frame {
            ControlFrame::DispatchRequest(descriptor) => {
                let request_id = descriptor.request_id.clone();
                let client = current.lock().unwrap().client.clone();
                let outbound = outbound_tx.clone();
                let handle = tokio::spawn(async move {
                    fetch::dispatch(descriptor, client, outbound).await;
                });
                in_flight.lock().unwrap().insert(request_id, handle.abort_handle());
            }
            ControlFrame::CancelRequest { request_id } => {
                if let Some(handle) = in_flight.lock().unwrap().remove(&request_id) {
                    handle.abort();
                }
            }
            ControlFrame::RebindSession {
                request_id,
                credential_index,
                credential,
            } => match session::build(&credential) {
                Ok(session) => {
                    info!(credential_index, account = ?session.account_name, "rebound session");
                    *current.lock().unwrap() = session;
                    send_ack(outbound_tx, AgentFrame::ResponseHeaders {
                        request_id,
                        status: 200,
                        headers: HashMap::new(),
                    });
                }
                Err(err) => send_ack(outbound_tx, AgentFrame::Error {
                    request_id,
                    status: 500,
                    message: err.to_string(),
                }),
            },
        }
    }
}

fn send_ack(outbound_tx: &tokio::sync::mpsc::UnboundedSender<String>, frame: AgentFrame) {
    if let Ok(payload) = serde_json::to_string(&frame) {
        let _ = outbound_tx.send(payload);
    }
}
