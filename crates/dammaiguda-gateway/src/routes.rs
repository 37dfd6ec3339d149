//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use dammaiguda_auth::TokenVerifier;
use dammaiguda_store::Store;

use crate::handlers::{admin, chat, family, health, notifications, sos, ws};
use crate::state::AppState;

/// Create the hub router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /notifications/vapid-public-key` - VAPID application server key
///
/// ## Chat
/// - `GET /chat/rooms` - List rooms with online/unread counts
/// - `POST /chat/rooms` - Create room
/// - `GET /chat/rooms/{room_id}/messages` - Message history page
/// - `POST /chat/rooms/{room_id}/messages` - Post message
/// - `POST /chat/messages/{message_id}/react` - Toggle a reaction
/// - `GET /chat/rooms/{room_id}/ws` - Room WebSocket (token query param)
///
/// ## Notifications
/// - `POST /notifications/subscribe` - Register push subscription
/// - `DELETE /notifications/subscribe` - Remove push subscription
/// - `GET /notifications/preferences` - Read preference flags
/// - `PUT /notifications/preferences` - Update preference flags
/// - `GET /notifications/feed` - In-app notification feed
///
/// ## SOS
/// - `POST /sos/trigger` - Raise an alert
/// - `GET /sos/history` - Alerts triggered by or sent to the caller
/// - `POST /sos/{alert_id}/acknowledge` - Recipient acknowledges
/// - `POST /sos/{alert_id}/resolve` - Creator or admin resolves
/// - `GET /sos/contacts` - List emergency contacts
/// - `POST /sos/contacts` - Add emergency contact
/// - `DELETE /sos/contacts/{contact_id}` - Remove emergency contact
///
/// ## Family
/// - `POST /family/update-location` - Report a location sample
/// - `POST /family/geofence` - Create fence
/// - `GET /family/geofences/{member_id}` - Fences watching a member
/// - `DELETE /family/geofence/{fence_id}` - Delete fence
/// - `GET /family/members` - Watched members with latest locations
///
/// ## Admin (manager/admin role)
/// - `POST /admin/notify/news` - Targeted news push
/// - `POST /admin/notify/announcement` - Area-wide announcement
pub fn create_router<S, V>(state: AppState<S, V>) -> Router
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = state.config.request_timeout();

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    Router::new()
        // Health (public)
        .route("/health", get(health::health))
        // Chat
        .route(
            "/chat/rooms",
            get(chat::list_rooms::<S, V>).post(chat::create_room::<S, V>),
        )
        .route(
            "/chat/rooms/{room_id}/messages",
            get(chat::get_messages::<S, V>).post(chat::post_message::<S, V>),
        )
        .route(
            "/chat/messages/{message_id}/react",
            post(chat::react::<S, V>),
        )
        .route("/chat/rooms/{room_id}/ws", get(ws::room_socket::<S, V>))
        // Notifications
        .route(
            "/notifications/vapid-public-key",
            get(notifications::vapid_public_key::<S, V>),
        )
        .route(
            "/notifications/subscribe",
            post(notifications::subscribe::<S, V>).delete(notifications::unsubscribe::<S, V>),
        )
        .route(
            "/notifications/preferences",
            get(notifications::get_preferences::<S, V>)
                .put(notifications::put_preferences::<S, V>),
        )
        .route("/notifications/feed", get(notifications::feed::<S, V>))
        // SOS
        .route("/sos/trigger", post(sos::trigger::<S, V>))
        .route("/sos/history", get(sos::history::<S, V>))
        .route(
            "/sos/{alert_id}/acknowledge",
            post(sos::acknowledge::<S, V>),
        )
        .route("/sos/{alert_id}/resolve", post(sos::resolve::<S, V>))
        .route(
            "/sos/contacts",
            get(sos::list_contacts::<S, V>).post(sos::add_contact::<S, V>),
        )
        .route(
            "/sos/contacts/{contact_id}",
            delete(sos::remove_contact::<S, V>),
        )
        // Family
        .route(
            "/family/update-location",
            post(family::update_location::<S, V>),
        )
        .route("/family/geofence", post(family::create_fence::<S, V>))
        .route(
            "/family/geofences/{member_id}",
            get(family::list_fences::<S, V>),
        )
        .route(
            "/family/geofence/{fence_id}",
            delete(family::delete_fence::<S, V>),
        )
        .route("/family/members", get(family::list_members::<S, V>))
        // Admin producers
        .route("/admin/notify/news", post(admin::notify_news::<S, V>))
        .route(
            "/admin/notify/announcement",
            post(admin::notify_announcement::<S, V>),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

/// Build the CORS layer from configured origins. An empty list or a `*`
/// entry allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_any_origin() {
        let _layer = build_cors_layer(&["*".to_string()]);
    }

    #[test]
    fn cors_empty_is_any() {
        let _layer = build_cors_layer(&[]);
    }

    #[test]
    fn cors_specific_origins() {
        let origins = vec![
            "http://localhost:3000".to_string(),
            "https://app.mydammaiguda.in".to_string(),
        ];
        let _layer = build_cors_layer(&origins);
    }
}
