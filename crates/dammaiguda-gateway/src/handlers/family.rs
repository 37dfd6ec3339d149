//! Family location and geofence handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use dammaiguda_auth::TokenVerifier;
use dammaiguda_core::{FenceId, GeoPoint, UserId};
use dammaiguda_geo::{CreateFence, FenceCrossing, LocationSample};
use dammaiguda_store::{Geofence, LiveLocation, Store};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// A fence as returned by the API.
#[derive(Debug, Serialize)]
pub struct FenceView {
    /// Fence id.
    pub fence_id: FenceId,
    /// The member the fence watches.
    pub member_id: UserId,
    /// Fence display name.
    pub name: String,
    /// Fence center.
    pub center: GeoPoint,
    /// Fence radius in meters.
    pub radius_m: f64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<Geofence> for FenceView {
    fn from(fence: Geofence) -> Self {
        Self {
            fence_id: fence.fence_id,
            member_id: fence.subject_member_id,
            name: fence.name,
            center: fence.center,
            radius_m: fence.radius_m,
            created_at: fence.created_at.to_chrono(),
        }
    }
}

/// A location sample as returned by the API.
#[derive(Debug, Serialize)]
pub struct LocationView {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Reported GPS accuracy in meters.
    pub accuracy_m: f64,
    /// Device battery level, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
    /// When the sample was captured.
    pub captured_at: DateTime<Utc>,
}

impl From<LiveLocation> for LocationView {
    fn from(location: LiveLocation) -> Self {
        Self {
            latitude: location.latitude,
            longitude: location.longitude,
            accuracy_m: location.accuracy_m,
            battery_level: location.battery_level,
            captured_at: location.captured_at.to_chrono(),
        }
    }
}

/// One watched family member with their latest location.
#[derive(Debug, Serialize)]
pub struct MemberView {
    /// The watched member.
    pub member_id: UserId,
    /// Relationship label.
    pub relationship: String,
    /// When the member accepted the link.
    pub accepted_at: DateTime<Utc>,
    /// Latest location, if the member has reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationView>,
}

/// `POST /family/update-location`. Returns the boundary crossings the
/// sample produced.
pub async fn update_location<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(member): AuthUser,
    Json(sample): Json<LocationSample>,
) -> Result<Json<Vec<FenceCrossing>>, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let crossings = state.geo.update_location(&member, sample).await?;
    Ok(Json(crossings))
}

/// `POST /family/geofence`.
pub async fn create_fence<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(watcher): AuthUser,
    Json(req): Json<CreateFence>,
) -> Result<(StatusCode, Json<FenceView>), ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let fence = state.geo.create_fence(&watcher, req).await?;
    Ok((StatusCode::CREATED, Json(FenceView::from(fence))))
}

/// `GET /family/geofences/{member_id}`.
pub async fn list_fences<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(watcher): AuthUser,
    Path(member_id): Path<UserId>,
) -> Result<Json<Vec<FenceView>>, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let fences = state.geo.list_fences(&watcher, &member_id).await?;
    Ok(Json(fences.into_iter().map(FenceView::from).collect()))
}

/// `DELETE /family/geofence/{fence_id}`.
pub async fn delete_fence<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(watcher): AuthUser,
    Path(fence_id): Path<FenceId>,
) -> Result<StatusCode, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    state.geo.delete_fence(&watcher, &fence_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /family/members`. The members the caller watches, each with their
/// latest reported location.
pub async fn list_members<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(watcher): AuthUser,
) -> Result<Json<Vec<MemberView>>, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let links = state.store.list_watched_members(&watcher.user_id).await?;
    let mut members = Vec::with_capacity(links.len());
    for link in links {
        let location = state
            .geo
            .member_location(&watcher, &link.member_id)
            .await?
            .map(LocationView::from);
        members.push(MemberView {
            member_id: link.member_id,
            relationship: link.relationship,
            accepted_at: link.accepted_at.to_chrono(),
            location,
        });
    }
    Ok(Json(members))
}
