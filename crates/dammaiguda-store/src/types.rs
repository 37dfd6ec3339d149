//! Domain types persisted by the gateway.
//!
//! Timestamps are `bson::DateTime` so that range scans and sorts in MongoDB
//! compare real datetimes rather than strings. Convert with `to_chrono` at
//! API boundaries.

use bson::DateTime;
use dammaiguda_core::{
    AlertId, ContactId, FenceId, GeoPoint, LogId, MessageId, PushCategory, RoomId, SubscriptionId,
    UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A user record, created by the external auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier for the user.
    pub user_id: UserId,
    /// Phone number, E.164.
    pub phone: String,
    /// Display name.
    pub name: String,
    /// Role within the app.
    pub role: UserRole,
    /// Neighborhood area the user belongs to.
    pub area_id: String,
}

/// Persisted user roles. Guests are never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Regular resident.
    Citizen,
    /// Area manager; may publish targeted notifications.
    Manager,
    /// Administrator.
    Admin,
}

/// A chat room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRoom {
    /// Unique identifier for the room.
    pub room_id: RoomId,
    /// Room name.
    pub name: String,
    /// Localized room name, if provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_localized: Option<String>,
    /// Whether any user may read and join.
    pub is_public: bool,
    /// Lifecycle state; messages cannot be posted while archived.
    pub state: RoomState,
    /// User who created the room; always a member.
    pub created_by: UserId,
    /// Creation timestamp.
    pub created_at: DateTime,
    /// Timestamp of the last posted message (or creation).
    pub last_activity_at: DateTime,
    /// Number of messages ever posted.
    pub message_count: u64,
    /// Member set; stored as an array, deduplicated on write.
    pub members: Vec<UserId>,
}

/// Lifecycle states for a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    /// Open for posting.
    Active,
    /// Read-only; admin archived.
    Archived,
}

/// A chat message. Immutable after creation except for `reactions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique identifier for the message.
    pub message_id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Author.
    pub user_id: UserId,
    /// Author display name at post time.
    pub user_name: String,
    /// Message body, at most 4096 characters.
    pub content: String,
    /// Message this one replies to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    /// Persisted timestamp; monotone within the room.
    pub created_at: DateTime,
    /// Reactions by emoji. Every present key has a non-empty user set.
    #[serde(default)]
    pub reactions: BTreeMap<String, Vec<UserId>>,
    /// Version counter for the reactions compare-and-set.
    #[serde(default)]
    pub reactions_version: u64,
}

/// Per-user, per-room read position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadCursor {
    /// The reading user.
    pub user_id: UserId,
    /// The room.
    pub room_id: RoomId,
    /// Timestamp of the newest message the user has observed.
    pub last_read_message_at: DateTime,
}

/// A Web-Push subscription registered by a browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscription {
    /// Unique identifier for the subscription.
    pub sub_id: SubscriptionId,
    /// Owning user.
    pub user_id: UserId,
    /// Push service endpoint URL.
    pub endpoint_url: String,
    /// Client public key, base64url.
    pub p256dh_key: String,
    /// Client auth secret, base64url.
    pub auth_key: String,
    /// Registration timestamp.
    pub created_at: DateTime,
    /// Last successful delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime>,
    /// Consecutive transport failures since the last success.
    #[serde(default)]
    pub failure_count: u32,
}

fn default_true() -> bool {
    true
}

/// Per-user push preferences. Every flag defaults to enabled; the dispatcher
/// honors them, producers do not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreferences {
    /// Owning user.
    pub user_id: UserId,
    /// SOS alert pushes.
    #[serde(default = "default_true")]
    pub sos_alerts: bool,
    /// Geofence transition pushes.
    #[serde(default = "default_true")]
    pub geofence_alerts: bool,
    /// Targeted news pushes.
    #[serde(default = "default_true")]
    pub news_updates: bool,
    /// Community announcements.
    #[serde(default = "default_true")]
    pub community_updates: bool,
    /// Health reminders.
    #[serde(default = "default_true")]
    pub health_reminders: bool,
    /// Chat mention pushes.
    #[serde(default = "default_true")]
    pub chat_mentions: bool,
}

impl NotificationPreferences {
    /// Default preferences for a user: everything enabled.
    #[must_use]
    pub fn default_for(user_id: UserId) -> Self {
        Self {
            user_id,
            sos_alerts: true,
            geofence_alerts: true,
            news_updates: true,
            community_updates: true,
            health_reminders: true,
            chat_mentions: true,
        }
    }

    /// Whether pushes of the given category are enabled.
    #[must_use]
    pub const fn allows(&self, category: PushCategory) -> bool {
        match category {
            PushCategory::Sos => self.sos_alerts,
            PushCategory::Geofence => self.geofence_alerts,
            PushCategory::News => self.news_updates,
            PushCategory::Community => self.community_updates,
            PushCategory::Health => self.health_reminders,
            PushCategory::Chat => self.chat_mentions,
        }
    }
}

/// An accepted family watch relationship. Rows exist only once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyLink {
    /// The watching user.
    pub watcher_id: UserId,
    /// The watched member.
    pub member_id: UserId,
    /// Relationship label ("parent", "sibling", ...).
    pub relationship: String,
    /// When the member accepted the link.
    pub accepted_at: DateTime,
}

/// A circular geofence a watcher placed around a member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geofence {
    /// Unique identifier for the fence.
    pub fence_id: FenceId,
    /// The watcher who owns the fence and receives its transitions.
    pub owner_watcher_id: UserId,
    /// The member the fence watches.
    pub subject_member_id: UserId,
    /// Fence display name.
    pub name: String,
    /// Fence center.
    pub center: GeoPoint,
    /// Fence radius in meters.
    pub radius_m: f64,
    /// Creation timestamp.
    pub created_at: DateTime,
}

/// The latest location sample for a user. Latest-wins per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveLocation {
    /// The located user.
    pub user_id: UserId,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Reported GPS accuracy in meters.
    pub accuracy_m: f64,
    /// Device battery level 0..=100, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
    /// When the sample was captured.
    pub captured_at: DateTime,
}

impl LiveLocation {
    /// The sample as a coordinate pair.
    #[must_use]
    pub const fn point(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// A user-configured emergency contact for SOS alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyContact {
    /// Unique identifier for the contact.
    pub contact_id: ContactId,
    /// The user who configured the contact.
    pub user_id: UserId,
    /// Contact display name.
    pub name: String,
    /// Phone number receiving SMS, E.164.
    pub phone: String,
    /// The contact's own account, when the contact is also an app user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_user_id: Option<UserId>,
    /// Creation timestamp.
    pub created_at: DateTime,
}

/// An SOS alert. Immutable once resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SosAlert {
    /// Unique identifier; also the fanout de-duplication key.
    pub alert_id: AlertId,
    /// The user who triggered the alert.
    pub user_id: UserId,
    /// Trigger timestamp.
    pub triggered_at: DateTime,
    /// Location at trigger time, if provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Message from the trigger, possibly empty.
    pub message: String,
    /// Monotone lifecycle state.
    pub status: SosStatus,
    /// Family watchers plus configured emergency contacts with accounts.
    pub recipient_ids: Vec<UserId>,
    /// Per-channel delivery outcomes, keyed by channel name.
    #[serde(default)]
    pub delivery: BTreeMap<String, ChannelDelivery>,
    /// Recipient who acknowledged, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<UserId>,
    /// Acknowledgement timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime>,
    /// Resolution timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime>,
}

/// Monotone SOS lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SosStatus {
    /// Alert is live.
    Active,
    /// A recipient has seen the alert.
    Acknowledged,
    /// The creator or an admin closed the alert.
    Resolved,
}

impl SosStatus {
    /// Return the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }
}

/// Outcome of one delivery channel for an alert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelDelivery {
    /// Whether at least one delivery on this channel succeeded.
    pub sent: bool,
    /// Last error observed on this channel, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Notification delivery channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// VAPID Web-Push.
    Push,
    /// SMS to a phone number.
    Sms,
    /// In-app notification feed.
    Feed,
}

impl Channel {
    /// Return the channel as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Sms => "sms",
            Self::Feed => "feed",
        }
    }
}

/// Result of one notification delivery attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryResult {
    /// Delivered.
    Sent,
    /// All attempts failed.
    Failed,
    /// The subscription was evicted on a permanent failure.
    Evicted,
    /// Dropped by the recipient's preferences.
    Suppressed,
}

impl DeliveryResult {
    /// Return the result as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Evicted => "evicted",
            Self::Suppressed => "suppressed",
        }
    }
}

/// Append-only notification audit row; also the at-most-once ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLog {
    /// Unique identifier for the row.
    pub log_id: LogId,
    /// De-duplication key of the producing event, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
    /// The notified user.
    pub user_id: UserId,
    /// Dotted event kind, e.g. `sos.triggered`.
    pub kind: String,
    /// Rendered notification payload.
    pub payload: bson::Document,
    /// Delivery channel.
    pub channel: Channel,
    /// Delivery outcome.
    pub result: DeliveryResult,
    /// When the row was written.
    pub at: DateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefs_default_all_enabled() {
        let prefs = NotificationPreferences::default_for(UserId::new("u-1"));
        for category in [
            PushCategory::Sos,
            PushCategory::Geofence,
            PushCategory::News,
            PushCategory::Community,
            PushCategory::Health,
            PushCategory::Chat,
        ] {
            assert!(prefs.allows(category));
        }
    }

    #[test]
    fn prefs_missing_fields_deserialize_enabled() {
        let prefs: NotificationPreferences =
            serde_json::from_str(r#"{"user_id":"u-1","news_updates":false}"#).unwrap();
        assert!(!prefs.allows(PushCategory::News));
        assert!(prefs.allows(PushCategory::Sos));
        assert!(prefs.allows(PushCategory::Chat));
    }

    #[test]
    fn roles_serialize_snake_case() {
        assert_eq!(serde_json::to_string(&UserRole::Citizen).unwrap(), "\"citizen\"");
        assert_eq!(serde_json::to_string(&SosStatus::Acknowledged).unwrap(), "\"acknowledged\"");
        assert_eq!(serde_json::to_string(&Channel::Push).unwrap(), "\"push\"");
        assert_eq!(serde_json::to_string(&DeliveryResult::Evicted).unwrap(), "\"evicted\"");
    }
}
