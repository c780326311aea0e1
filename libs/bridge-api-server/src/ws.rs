use std::future::Future;
use std::pin::Pin;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use bridge_api::connection::{ClientConnection, ClientSink, ClientStream, Inbound};
use bridge_api::error::BridgeError;
use bridge_engine::session::{bridge, validate_route};

use super::AppState;

// ═══════════════════════════════════════════════════════════════
//  WebSocket: /ws/{client_id}/{topic}/
// ═══════════════════════════════════════════════════════════════

/// Route gate: both identifiers are checked before the upgrade, so a bad
/// route never reaches the broker.
pub(crate) async fn handle_ws(
    State(state): State<AppState>,
    Path((client_id, topic)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    let route = validate_route("client_id", &client_id).and_then(|()| validate_route("topic", &topic));
    if let Err(e) = route {
        tracing::debug!(client_id = %client_id, topic = %topic, error = %e, "rejected bridge route");
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }

    ws.on_upgrade(move |socket| ws_connection(socket, client_id, topic, state))
}

async fn ws_connection(socket: WebSocket, client_id: String, topic: String, state: AppState) {
    let (sink, stream) = socket.split();
    let connection = ClientConnection::new(Box::new(WsSink(sink)), Box::new(WsStream(stream)));

    match bridge(&client_id, &topic, connection, &state.ctx).await {
        Ok(end) => tracing::debug!(client_id = %client_id, topic = %topic, reason = %end, "connection finished"),
        Err(e) => tracing::debug!(client_id = %client_id, topic = %topic, error = %e, "session not opened"),
    }
}

// ═══════════════════════════════════════════════════════════════
//  Connection adapter
// ═══════════════════════════════════════════════════════════════

struct WsSink(SplitSink<WebSocket, Message>);

impl ClientSink for WsSink {
    fn send_text(&mut self, text: String) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        Box::pin(async move {
            self.0
                .send(Message::Text(text.into()))
                .await
                .map_err(|e| BridgeError::transport(format!("ws send: {e}")))
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + '_>> {
        Box::pin(async move {
            self.0
                .close()
                .await
                .map_err(|e| BridgeError::transport(format!("ws close: {e}")))
        })
    }
}

struct WsStream(SplitStream<WebSocket>);

impl ClientStream for WsStream {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<Result<Inbound, BridgeError>>> + Send + '_>> {
        Box::pin(async move {
            match self.0.next().await? {
                Ok(Message::Text(text)) => Some(Ok(Inbound::Payload(text.as_str().as_bytes().to_vec()))),
                Ok(Message::Binary(bytes)) => Some(Ok(Inbound::Payload(bytes.to_vec()))),
                Ok(Message::Ping(_) | Message::Pong(_)) => Some(Ok(Inbound::Control)),
                Ok(Message::Close(_)) => None,
                Err(e) => Some(Err(BridgeError::transport(format!("ws recv: {e}")))),
            }
        })
    }
}
