//! SOS REST handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dammaiguda_auth::TokenVerifier;
use dammaiguda_core::{AlertId, ContactId, GeoPoint, UserId};
use dammaiguda_notify::AddContact;
use dammaiguda_store::{ChannelDelivery, EmergencyContact, SosAlert, SosStatus, Store};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Request body for triggering an alert.
#[derive(Debug, Deserialize)]
pub struct TriggerBody {
    /// Optional message carried on the alert.
    #[serde(default)]
    pub message: Option<String>,
    /// Last known location, if the device has one.
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

/// An alert as returned by the API.
#[derive(Debug, Serialize)]
pub struct AlertView {
    /// Alert id.
    pub alert_id: AlertId,
    /// The user who triggered the alert.
    pub user_id: UserId,
    /// Trigger timestamp.
    pub triggered_at: DateTime<Utc>,
    /// Location at trigger time, if provided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Message from the trigger, possibly empty.
    pub message: String,
    /// `active`, `acknowledged`, or `resolved`.
    pub status: SosStatus,
    /// Recipients with accounts.
    pub recipient_ids: Vec<UserId>,
    /// Per-channel delivery outcomes.
    pub delivery: BTreeMap<String, ChannelDelivery>,
    /// Recipient who acknowledged, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<UserId>,
    /// Acknowledgement timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Resolution timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<SosAlert> for AlertView {
    fn from(alert: SosAlert) -> Self {
        Self {
            alert_id: alert.alert_id,
            user_id: alert.user_id,
            triggered_at: alert.triggered_at.to_chrono(),
            location: alert.location,
            message: alert.message,
            status: alert.status,
            recipient_ids: alert.recipient_ids,
            delivery: alert.delivery,
            acknowledged_by: alert.acknowledged_by,
            acknowledged_at: alert.acknowledged_at.map(bson::DateTime::to_chrono),
            resolved_at: alert.resolved_at.map(bson::DateTime::to_chrono),
        }
    }
}

/// An emergency contact as returned by the API.
#[derive(Debug, Serialize)]
pub struct ContactView {
    /// Contact id.
    pub contact_id: ContactId,
    /// Contact display name.
    pub name: String,
    /// Phone number, E.164.
    pub phone: String,
    /// The contact's own account, when they are also an app user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_user_id: Option<UserId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<EmergencyContact> for ContactView {
    fn from(contact: EmergencyContact) -> Self {
        Self {
            contact_id: contact.contact_id,
            name: contact.name,
            phone: contact.phone,
            contact_user_id: contact.contact_user_id,
            created_at: contact.created_at.to_chrono(),
        }
    }
}

/// `POST /sos/trigger`.
pub async fn trigger<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(caller): AuthUser,
    Json(body): Json<TriggerBody>,
) -> Result<(StatusCode, Json<AlertView>), ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let alert = state
        .sos
        .trigger(&caller, body.message, body.location)
        .await?;
    Ok((StatusCode::CREATED, Json(AlertView::from(alert))))
}

/// `POST /sos/{alert_id}/acknowledge`.
pub async fn acknowledge<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(caller): AuthUser,
    Path(alert_id): Path<AlertId>,
) -> Result<Json<AlertView>, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let alert = state.sos.acknowledge(&caller, &alert_id).await?;
    Ok(Json(AlertView::from(alert)))
}

/// `POST /sos/{alert_id}/resolve`.
pub async fn resolve<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(caller): AuthUser,
    Path(alert_id): Path<AlertId>,
) -> Result<Json<AlertView>, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let alert = state.sos.resolve(&caller, &alert_id).await?;
    Ok(Json(AlertView::from(alert)))
}

/// `GET /sos/history`.
pub async fn history<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<AlertView>>, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let alerts = state.sos.history(&caller).await?;
    Ok(Json(alerts.into_iter().map(AlertView::from).collect()))
}

/// `GET /sos/contacts`.
pub async fn list_contacts<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(caller): AuthUser,
) -> Result<Json<Vec<ContactView>>, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let contacts = state.sos.list_contacts(&caller).await?;
    Ok(Json(contacts.into_iter().map(ContactView::from).collect()))
}

/// `POST /sos/contacts`.
pub async fn add_contact<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(caller): AuthUser,
    Json(body): Json<AddContact>,
) -> Result<(StatusCode, Json<ContactView>), ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    let contact = state.sos.add_contact(&caller, body).await?;
    Ok((StatusCode::CREATED, Json(ContactView::from(contact))))
}

/// `DELETE /sos/contacts/{contact_id}`.
pub async fn remove_contact<S, V>(
    State(state): State<Arc<AppState<S, V>>>,
    AuthUser(caller): AuthUser,
    Path(contact_id): Path<ContactId>,
) -> Result<StatusCode, ApiError>
where
    S: Store + 'static,
    V: TokenVerifier + 'static,
{
    state.sos.remove_contact(&caller, &contact_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
