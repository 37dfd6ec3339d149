//! Room WebSocket handler.
//!
//! `GET /chat/rooms/{room_id}/ws?token=…` upgrades into a room socket. The
//! token travels as a query parameter because browsers cannot set headers on
//! WebSocket connects; a missing or invalid token yields a read-only guest
//! identity rather than a rejection.
//!
//! Each socket registers with the presence registry and owns two tasks: the
//! writer drains the socket's bounded frame queue under the send deadline,
//! and the reader dispatches client frames into the chat engine. A rejected
//! client frame is answered with an `error` frame on this socket only.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use dammaiguda_auth::{Identity, TokenVerifier};
use dammaiguda_chat::{ClientFrame, ServerFrame};
use dammaiguda_core::{ConnId, RoomId};
use dammaiguda_store::Store;

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters on the socket upgrade.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer token; absent or invalid means a guest socket.
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET /chat/rooms/{room_id}/ws`.
///
/// Room access is checked before the upgrade: a private room a guest or
/// non-member asks for rejects the HTTP request outright.
pub async fn room_socket<S, V>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<S, V>>>,
    Path(room_id): Path<RoomId>,
    Query(query): Query<WsQuery>,
) -> Result<Response, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let identity = query
        .token
        .as_deref()
        .and_then(|token| state.verifier.verify(token).ok())
        .unwrap_or_else(Identity::guest);

    state.chat.room_access(&identity, &room_id).await?;
    debug!(%room_id, user_id = %identity.user_id, guest = identity.is_read_only(), "socket upgrade");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, room_id, identity)))
}

async fn handle_socket<S, V>(
    socket: WebSocket,
    state: Arc<AppState<S, V>>,
    room_id: RoomId,
    identity: Identity,
) where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let conn_id = ConnId::generate();
    let mut queue = state.presence.join(
        room_id,
        conn_id,
        identity.user_id.clone(),
        identity.name.clone(),
    );
    let (mut ws_tx, mut ws_rx) = socket.split();
    let send_deadline = state.config.ws_send_deadline();

    // Writer: drains the presence queue. The queue closes when this socket
    // is evicted or leaves, which ends the task.
    let writer = tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "frame serialization failed");
                    continue;
                }
            };
            match tokio::time::timeout(send_deadline, ws_tx.send(Message::Text(json.into()))).await
            {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Text(text) => {
                handle_frame(&state, &identity, &room_id, &conn_id, text.as_str()).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.presence.leave(&room_id, &conn_id);
    let _ = writer.await;
    debug!(%room_id, %conn_id, "socket closed");
}

/// Parse and dispatch one client frame. Failures answer this socket with an
/// `error` frame; the connection stays open.
async fn handle_frame<S, V>(
    state: &Arc<AppState<S, V>>,
    identity: &Identity,
    room_id: &RoomId,
    conn_id: &ConnId,
    text: &str,
) where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            reject(state, room_id, conn_id, "invalid_argument", &e.to_string());
            return;
        }
    };

    let outcome = match frame {
        ClientFrame::Message { content, reply_to } => state
            .chat
            .post_message(
                identity,
                room_id,
                dammaiguda_chat::PostMessage { content, reply_to },
            )
            .await
            .map(|_| ()),
        ClientFrame::Typing { is_typing } => {
            state.chat.typing(identity, room_id, is_typing, conn_id)
        }
        ClientFrame::Reaction { message_id, emoji } => state
            .chat
            .react(identity, room_id, &message_id, &emoji)
            .await
            .map(|_| ()),
    };

    if let Err(e) = outcome {
        let api: ApiError = e.into();
        reject(state, room_id, conn_id, api.code(), &api.to_string());
    }
}

fn reject<S, V>(
    state: &Arc<AppState<S, V>>,
    room_id: &RoomId,
    conn_id: &ConnId,
    kind: &str,
    message: &str,
) where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let frame = ServerFrame::Error {
        kind: kind.to_owned(),
        message: message.to_owned(),
    };
    state.presence.send_to(room_id, conn_id, frame);
}
