//! Control-channel WebSocket upgrade (`GET /agent/ws`). One physical
//! connection at a time; `BrowserAgentLink` arbitrates reconnection.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::proxy::ProxyState;

pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<ProxyState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_agent_socket(socket, state))
}

async fn handle_agent_socket(socket: WebSocket, state: ProxyState) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let generation = state.app.link.accept(outbound_tx);

    let forward = tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<gw_protocol::AgentFrame>(&text) {
                Ok(frame) => state.app.link.route_inbound(frame),
                Err(err) => warn!(error = %err, "malformed agent frame, dropping"),
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                warn!(error = %err, "agent websocket error");
                break;
            }
        }
    }

    forward.abort();
    debug!(generation, "agent websocket closed");
    state.app.link.on_disconnect(generation);
}
