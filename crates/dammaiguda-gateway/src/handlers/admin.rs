//! Manager and admin notification producers.
//!
//! These endpoints only publish bus events; delivery, preferences, and
//! deduplication are entirely the push dispatcher's concern.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use dammaiguda_auth::{Identity, TokenVerifier};
use dammaiguda_core::{HubEvent, UserId};
use dammaiguda_store::Store;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Longest title and body accepted from a producer.
const MAX_TITLE_CHARS: usize = 120;
const MAX_BODY_CHARS: usize = 1_000;

/// Request body for a targeted news push.
#[derive(Debug, Deserialize)]
pub struct NewsBody {
    /// Push title.
    pub title: String,
    /// Push body.
    pub body: String,
    /// Optional link opened on tap.
    #[serde(default)]
    pub url: Option<String>,
    /// Explicit recipients. When omitted, targets an area.
    #[serde(default)]
    pub user_ids: Option<Vec<UserId>>,
    /// Area whose users are targeted; defaults to the poster's area.
    #[serde(default)]
    pub area_id: Option<String>,
}

/// Request body for a community announcement.
#[derive(Debug, Deserialize)]
pub struct AnnouncementBody {
    /// Announcement title.
    pub title: String,
    /// Announcement body.
    pub body: String,
    /// Area announced to; defaults to the poster's area.
    #[serde(default)]
    pub area_id: Option<String>,
}

fn require_publisher(caller: &Identity) -> Result<(), ApiError> {
    if caller.role.can_publish() {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "publishing requires the manager or admin role".to_owned(),
        ))
    }
}

fn validate_text(title: &str, body: &str) -> Result<(), ApiError> {
    if title.trim().is_empty() || title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::InvalidArgument(format!(
            "title must be 1..={MAX_TITLE_CHARS} characters"
        )));
    }
    if body.trim().is_empty() || body.chars().count() > MAX_BODY_CHARS {
        return Err(ApiError::InvalidArgument(format!(
            "body must be 1..={MAX_BODY_CHARS} characters"
        )));
    }
    Ok(())
}

/// Resolve the recipient set: the explicit list when given, otherwise every
/// user of the named area (or the caller's own area).
async fn resolve_recipients<S: Store>(
    store: &S,
    caller: &Identity,
    user_ids: Option<Vec<UserId>>,
    area_id: Option<String>,
) -> Result<Vec<UserId>, ApiError> {
    if let Some(user_ids) = user_ids {
        if user_ids.is_empty() {
            return Err(ApiError::InvalidArgument("user_ids is empty".to_owned()));
        }
        return Ok(user_ids);
    }
    let area_id = area_id.or_else(|| caller.area_id.clone()).ok_or_else(|| {
        ApiError::InvalidArgument("no area_id given and the caller has none".to_owned())
    })?;
    let users = store.list_users_in_area(&area_id).await?;
    if users.is_empty() {
        return Err(ApiError::InvalidArgument(format!(
            "area {area_id} has no users"
        )));
    }
    Ok(users.into_iter().map(|u| u.user_id).collect())
}

/// `POST /admin/notify/news`.
pub async fn notify_news<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(caller): AuthUser,
    Json(body): Json<NewsBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    require_publisher(&caller)?;
    validate_text(&body.title, &body.body)?;
    let recipients =
        resolve_recipients(state.store.as_ref(), &caller, body.user_ids, body.area_id).await?;

    let push_id = Uuid::new_v4();
    let count = recipients.len();
    info!(%push_id, by = %caller.user_id, recipients = count, "news push published");
    state.bus.publish(HubEvent::NewsPushed {
        push_id,
        title: body.title.trim().to_owned(),
        body: body.body.trim().to_owned(),
        url: body.url.map(|u| u.trim().to_owned()).filter(|u| !u.is_empty()),
        recipients,
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "push_id": push_id, "recipients": count })),
    ))
}

/// `POST /admin/notify/announcement`.
pub async fn notify_announcement<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(caller): AuthUser,
    Json(body): Json<AnnouncementBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    require_publisher(&caller)?;
    validate_text(&body.title, &body.body)?;
    let recipients =
        resolve_recipients(state.store.as_ref(), &caller, None, body.area_id).await?;

    let announcement_id = Uuid::new_v4();
    let count = recipients.len();
    info!(%announcement_id, by = %caller.user_id, recipients = count, "announcement published");
    state.bus.publish(HubEvent::CommunityAnnouncement {
        announcement_id,
        title: body.title.trim().to_owned(),
        body: body.body.trim().to_owned(),
        recipients,
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "announcement_id": announcement_id, "recipients": count })),
    ))
}
