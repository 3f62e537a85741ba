//! Gateway WebSocket endpoint
//!
//! Transport layer of the realtime core: upgrades the connection, runs the
//! authentication handshake inside a bounded timeout, then pumps frames
//! both ways. The transport owns the connection's lifecycle; the router
//! only ever addresses it through the registry.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use std::time::Duration;

use super::event::{ClientEvent, HelloFrame, ServerEvent};
use crate::AppState;
use crate::auth::{Principal, verify_token};
use crate::error::AppError;

/// GET /ws — upgrade to the gateway protocol.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    // Handshake: the first frame must be a valid hello within the timeout,
    // otherwise the socket is rejected instead of lingering half-open.
    let handshake_timeout =
        Duration::from_secs(state.config.gateway.handshake_timeout_seconds);
    let principal =
        match tokio::time::timeout(handshake_timeout, read_hello(&mut stream, &state)).await {
            Ok(Ok(principal)) => principal,
            Ok(Err(error)) => {
                tracing::debug!(%error, "gateway handshake rejected");
                let _ = send_event(&mut sink, &ServerEvent::from_error(&error, None)).await;
                let _ = sink.close().await;
                return;
            }
            Err(_) => {
                tracing::debug!("gateway handshake timed out");
                let _ = sink.close().await;
                return;
            }
        };

    let (connection_id, mut outbox_rx) = match state.router.connect(&principal).await {
        Ok(connected) => connected,
        Err(error) => {
            let _ = send_event(&mut sink, &ServerEvent::from_error(&error, None)).await;
            let _ = sink.close().await;
            return;
        }
    };

    // Write pump: drains the registry outbox into the socket. Ends when the
    // registry drops the sender (disconnect or eviction) or the peer goes
    // away mid-write.
    let writer = tokio::spawn(async move {
        while let Some(event) = outbox_rx.recv().await {
            if send_event(&mut sink, &event).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Read pump: boundary-validate each frame into the tagged union and
    // hand it to the router.
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    state.router.dispatch(&connection_id, &principal, event).await;
                }
                Err(parse_error) => {
                    let error =
                        AppError::Validation(format!("Unrecognized event: {parse_error}"));
                    state
                        .registry
                        .send_to_connection(
                            &connection_id,
                            &ServerEvent::from_error(&error, None),
                        )
                        .await;
                }
            },
            Ok(Message::Close(_)) => break,
            // Pings are answered at the protocol layer; binary frames have
            // no meaning in this protocol.
            Ok(_) => {}
            Err(error) => {
                tracing::debug!(%error, connection_id = %connection_id, "gateway read error");
                break;
            }
        }
    }

    // Transport closed: silently unregister — there is no one left to
    // report to.
    state.router.disconnect(&connection_id).await;
    writer.abort();
}

/// Read frames until the hello arrives, then verify its token.
async fn read_hello(
    stream: &mut (impl futures::Stream<Item = Result<Message, axum::Error>> + Unpin),
    state: &AppState,
) -> Result<Principal, AppError> {
    loop {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(_)) | None => return Err(AppError::Unauthorized),
        };

        match frame {
            Message::Text(text) => {
                let HelloFrame::Hello { token } = serde_json::from_str(&text)
                    .map_err(|_| AppError::Unauthorized)?;
                return verify_token(&token, &state.config.auth.token_secret);
            }
            Message::Close(_) => return Err(AppError::Unauthorized),
            // Ignore control frames ahead of the hello.
            _ => {}
        }
    }
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event)
        .map_err(|e| axum::Error::new(e))?;
    sink.send(Message::Text(text)).await
}
