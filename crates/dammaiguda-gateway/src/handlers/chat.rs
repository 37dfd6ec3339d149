//! Chat REST handlers.
//!
//! Stored timestamps are `bson::DateTime`; the response views convert them
//! to chrono so the wire carries RFC 3339 strings.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dammaiguda_auth::TokenVerifier;
use dammaiguda_chat::{CreateRoom, PostMessage, RoomSummary};
use dammaiguda_store::{ChatMessage, ChatRoom, RoomState, Store};
use dammaiguda_core::{MessageId, RoomId, UserId};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// A room as returned by the API.
#[derive(Debug, Serialize)]
pub struct RoomView {
    /// Room id.
    pub room_id: RoomId,
    /// Room name.
    pub name: String,
    /// Localized room name, if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_localized: Option<String>,
    /// Whether any user may read and join.
    pub is_public: bool,
    /// `active` or `archived`.
    pub state: RoomState,
    /// Room creator.
    pub created_by: UserId,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last posted message.
    pub last_activity_at: DateTime<Utc>,
    /// Number of messages ever posted.
    pub message_count: u64,
    /// Distinct users currently connected.
    pub online_count: usize,
    /// Messages newer than the viewer's read cursor.
    pub unread_count: u64,
}

impl RoomView {
    fn new(room: ChatRoom, online_count: usize, unread_count: u64) -> Self {
        Self {
            room_id: room.room_id,
            name: room.name,
            name_localized: room.name_localized,
            is_public: room.is_public,
            state: room.state,
            created_by: room.created_by,
            created_at: room.created_at.to_chrono(),
            last_activity_at: room.last_activity_at.to_chrono(),
            message_count: room.message_count,
            online_count,
            unread_count,
        }
    }

    fn from_summary(summary: RoomSummary) -> Self {
        Self::new(summary.room, summary.online_count, summary.unread_count)
    }
}

/// A message as returned by the API.
#[derive(Debug, Serialize)]
pub struct MessageView {
    /// Message id.
    pub message_id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Author.
    pub user_id: UserId,
    /// Author display name at post time.
    pub user_name: String,
    /// Message body.
    pub content: String,
    /// Message this one replies to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    /// Persisted timestamp.
    pub created_at: DateTime<Utc>,
    /// Reactions by emoji.
    pub reactions: BTreeMap<String, Vec<UserId>>,
}

impl From<ChatMessage> for MessageView {
    fn from(message: ChatMessage) -> Self {
        Self {
            message_id: message.message_id,
            room_id: message.room_id,
            user_id: message.user_id,
            user_name: message.user_name,
            content: message.content,
            reply_to: message.reply_to,
            created_at: message.created_at.to_chrono(),
            reactions: message.reactions,
        }
    }
}

/// Query parameters for the message page.
#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    /// Return messages strictly older than this timestamp.
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
    /// Page size, clamped server-side.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Query parameters for the reaction toggle.
#[derive(Debug, Deserialize)]
pub struct ReactQuery {
    /// Emoji to toggle.
    pub emoji: String,
}

/// `GET /chat/rooms`.
pub async fn list_rooms<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(viewer): AuthUser,
) -> Result<Json<Vec<RoomView>>, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let summaries = state.chat.list_rooms(&viewer).await?;
    Ok(Json(summaries.into_iter().map(RoomView::from_summary).collect()))
}

/// `POST /chat/rooms`.
pub async fn create_room<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(creator): AuthUser,
    Json(req): Json<CreateRoom>,
) -> Result<(StatusCode, Json<RoomView>), ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let room = state.chat.create_room(&creator, req).await?;
    Ok((StatusCode::CREATED, Json(RoomView::new(room, 0, 0))))
}

/// `GET /chat/rooms/{room_id}/messages`.
pub async fn get_messages<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(viewer): AuthUser,
    Path(room_id): Path<RoomId>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<MessageView>>, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let messages = state
        .chat
        .get_messages(&viewer, &room_id, query.before, query.limit)
        .await?;
    Ok(Json(messages.into_iter().map(MessageView::from).collect()))
}

/// `POST /chat/rooms/{room_id}/messages`.
pub async fn post_message<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(author): AuthUser,
    Path(room_id): Path<RoomId>,
    Json(req): Json<PostMessage>,
) -> Result<(StatusCode, Json<MessageView>), ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let message = state.chat.post_message(&author, &room_id, req).await?;
    Ok((StatusCode::CREATED, Json(MessageView::from(message))))
}

/// `POST /chat/messages/{message_id}/react?emoji=`.
///
/// The room is derived from the message, so the client does not repeat it.
pub async fn react<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(user): AuthUser,
    Path(message_id): Path<MessageId>,
    Query(query): Query<ReactQuery>,
) -> Result<Json<BTreeMap<String, Vec<UserId>>>, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let message = state
        .store
        .get_message(&message_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("message not found: {message_id}")))?;
    let reactions = state
        .chat
        .react(&user, &message.room_id, &message_id, &query.emoji)
        .await?;
    Ok(Json(reactions))
}
