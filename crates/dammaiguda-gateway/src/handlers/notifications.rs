//! Push subscription, preference, and feed handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use dammaiguda_auth::TokenVerifier;
use dammaiguda_core::{LogId, SubscriptionId};
use dammaiguda_store::{
    Channel, NotificationPreferences, PushSubscription, Store, StoreError,
};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Default and maximum feed page sizes.
const DEFAULT_FEED_LIMIT: usize = 50;
const MAX_FEED_LIMIT: usize = 100;

/// The browser `PushSubscription.toJSON()` shape.
#[derive(Debug, Deserialize)]
pub struct SubscribeBody {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Subscription key material.
    pub keys: SubscriptionKeys,
}

/// Key material of a browser push subscription.
#[derive(Debug, Deserialize)]
pub struct SubscriptionKeys {
    /// Client public key, base64url.
    pub p256dh: String,
    /// Client auth secret, base64url.
    pub auth: String,
}

/// Request body for unsubscribing one endpoint.
#[derive(Debug, Deserialize)]
pub struct UnsubscribeBody {
    /// Push service endpoint URL to forget.
    pub endpoint: String,
}

/// Partial preference update; omitted flags keep their stored value.
#[derive(Debug, Deserialize)]
pub struct PreferencesBody {
    /// SOS alert pushes.
    #[serde(default)]
    pub sos_alerts: Option<bool>,
    /// Geofence transition pushes.
    #[serde(default)]
    pub geofence_alerts: Option<bool>,
    /// Targeted news pushes.
    #[serde(default)]
    pub news_updates: Option<bool>,
    /// Community announcements.
    #[serde(default)]
    pub community_updates: Option<bool>,
    /// Health reminders.
    #[serde(default)]
    pub health_reminders: Option<bool>,
    /// Chat mention pushes.
    #[serde(default)]
    pub chat_mentions: Option<bool>,
}

/// Query parameters for the feed page.
#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    /// Page size, clamped server-side.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One in-app feed entry.
#[derive(Debug, Serialize)]
pub struct FeedItem {
    /// Row id.
    pub id: LogId,
    /// Dotted event kind, e.g. `sos.triggered`.
    pub kind: String,
    /// Rendered notification payload.
    pub payload: serde_json::Value,
    /// When the entry was written.
    pub at: DateTime<Utc>,
}

/// `GET /notifications/vapid-public-key`. Public.
pub async fn vapid_public_key<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
) -> Json<serde_json::Value>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    Json(serde_json::json!({ "public_key": state.push_public_key }))
}

/// `POST /notifications/subscribe`. Re-subscribing the same endpoint
/// refreshes the keys.
pub async fn subscribe<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(user): AuthUser,
    Json(body): Json<SubscribeBody>,
) -> Result<StatusCode, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let endpoint = body.endpoint.trim();
    if !endpoint.starts_with("https://") && !endpoint.starts_with("http://") {
        return Err(ApiError::InvalidArgument(
            "endpoint must be an absolute http(s) URL".to_owned(),
        ));
    }
    if body.keys.p256dh.trim().is_empty() || body.keys.auth.trim().is_empty() {
        return Err(ApiError::InvalidArgument(
            "subscription keys must not be empty".to_owned(),
        ));
    }

    let sub = PushSubscription {
        sub_id: SubscriptionId::generate(),
        user_id: user.user_id.clone(),
        endpoint_url: endpoint.to_owned(),
        p256dh_key: body.keys.p256dh.trim().to_owned(),
        auth_key: body.keys.auth.trim().to_owned(),
        created_at: bson::DateTime::now(),
        last_success_at: None,
        failure_count: 0,
    };
    state.store.upsert_push_subscription(&sub).await?;
    info!(user_id = %user.user_id, "push subscription registered");
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /notifications/subscribe`.
pub async fn unsubscribe<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(user): AuthUser,
    Json(body): Json<UnsubscribeBody>,
) -> Result<StatusCode, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    match state
        .store
        .delete_push_subscription(&user.user_id, body.endpoint.trim())
        .await
    {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(StoreError::NotFound) => Err(ApiError::NotFound(
            "no subscription for this endpoint".to_owned(),
        )),
        Err(e) => Err(e.into()),
    }
}

/// `GET /notifications/preferences`.
pub async fn get_preferences<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(user): AuthUser,
) -> Result<Json<NotificationPreferences>, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    Ok(Json(state.store.notification_prefs(&user.user_id).await?))
}

/// `PUT /notifications/preferences`. Partial: omitted flags are unchanged.
pub async fn put_preferences<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(user): AuthUser,
    Json(body): Json<PreferencesBody>,
) -> Result<Json<NotificationPreferences>, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let mut prefs = state.store.notification_prefs(&user.user_id).await?;
    apply(&mut prefs, &body);
    state.store.put_notification_prefs(&prefs).await?;
    Ok(Json(prefs))
}

fn apply(prefs: &mut NotificationPreferences, body: &PreferencesBody) {
    if let Some(v) = body.sos_alerts {
        prefs.sos_alerts = v;
    }
    if let Some(v) = body.geofence_alerts {
        prefs.geofence_alerts = v;
    }
    if let Some(v) = body.news_updates {
        prefs.news_updates = v;
    }
    if let Some(v) = body.community_updates {
        prefs.community_updates = v;
    }
    if let Some(v) = body.health_reminders {
        prefs.health_reminders = v;
    }
    if let Some(v) = body.chat_mentions {
        prefs.chat_mentions = v;
    }
}

/// `GET /notifications/feed?limit=`.
pub async fn feed<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(user): AuthUser,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<FeedItem>>, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let limit = query.limit.unwrap_or(DEFAULT_FEED_LIMIT).clamp(1, MAX_FEED_LIMIT);
    let rows = state.store.list_feed(&user.user_id, limit).await?;
    let items = rows
        .into_iter()
        .filter(|row| row.channel == Channel::Feed)
        .map(|row| FeedItem {
            id: row.log_id,
            kind: row.kind,
            payload: serde_json::to_value(&row.payload).unwrap_or(serde_json::Value::Null),
            at: row.at.to_chrono(),
        })
        .collect();
    Ok(Json(items))
}
