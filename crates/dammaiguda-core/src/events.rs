//! Hub events and the in-process event bus.
//!
//! The chat engine, geofence evaluator, and SOS fanout publish typed events
//! here; the WebSocket broadcaster and the push dispatcher subscribe. The bus
//! is single-process pub/sub over a broadcast channel: each subscriber holds
//! a bounded queue and loses the oldest events when it falls behind, which
//! keeps producers non-blocking. Dropped events are logged by the subscriber
//! and never reissued.

use crate::ids::{AlertId, FenceId, MessageId, RoomId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// A WGS84 coordinate pair, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, range [-90, 90].
    pub latitude: f64,
    /// Longitude in degrees, range [-180, 180].
    pub longitude: f64,
}

/// Direction of a geofence boundary crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FenceTransition {
    /// The member moved from outside the fence to inside.
    Enter,
    /// The member moved from inside the fence to outside.
    Exit,
}

impl FenceTransition {
    /// Return the transition as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
        }
    }
}

/// A freshly posted chat message as carried on the bus.
///
/// Serializes directly into the WebSocket `message` frame body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEvent {
    /// Message id.
    pub message_id: MessageId,
    /// Author.
    pub user_id: UserId,
    /// Author display name, denormalized for frame rendering.
    pub user_name: String,
    /// Message body.
    pub content: String,
    /// Message this one replies to, if any.
    pub reply_to: Option<MessageId>,
    /// Persisted timestamp; monotone within the room.
    pub created_at: DateTime<Utc>,
}

/// Events published on the hub bus.
///
/// Payloads carry everything a subscriber needs to render a frame or a push
/// notification without further reads.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    /// A socket joined a room.
    PresenceJoin {
        /// Room joined.
        room_id: RoomId,
        /// Joining user.
        user_id: UserId,
        /// Display name of the joining user.
        user_name: String,
        /// Distinct online users in the room after the join.
        online_count: usize,
    },

    /// A socket left a room (close, error, or send timeout).
    PresenceLeave {
        /// Room left.
        room_id: RoomId,
        /// Leaving user.
        user_id: UserId,
        /// Display name of the leaving user.
        user_name: String,
        /// Distinct online users in the room after the leave.
        online_count: usize,
    },

    /// A message was persisted to a room.
    ChatMessage {
        /// Room the message was posted to.
        room_id: RoomId,
        /// The persisted message.
        message: MessageEvent,
        /// Members mentioned by `@name`, author excluded.
        mentions: Vec<UserId>,
    },

    /// A reaction toggle settled; carries the full reactions map.
    ChatReaction {
        /// Room owning the message.
        room_id: RoomId,
        /// Message reacted to.
        message_id: MessageId,
        /// User who toggled.
        user_id: UserId,
        /// Emoji toggled.
        emoji: String,
        /// Complete reactions state after the toggle.
        reactions: BTreeMap<String, Vec<UserId>>,
    },

    /// Members were mentioned in a message; push-eligible.
    ChatMention {
        /// De-duplication id for this mention fanout.
        mention_id: uuid::Uuid,
        /// Room the message was posted to.
        room_id: RoomId,
        /// Room display name.
        room_name: String,
        /// Message carrying the mention.
        message_id: MessageId,
        /// Display name of the author.
        author_name: String,
        /// Message body, for the push preview.
        content: String,
        /// Mentioned members, author excluded.
        recipients: Vec<UserId>,
    },

    /// An SOS alert was persisted; push-eligible.
    SosTriggered {
        /// The alert; doubles as the de-duplication key.
        alert_id: AlertId,
        /// User who triggered the alert.
        user_id: UserId,
        /// Display name of the triggering user.
        user_name: String,
        /// Optional message from the trigger.
        message: String,
        /// Last known location, if provided.
        location: Option<GeoPoint>,
        /// Family watchers plus configured emergency contacts.
        recipients: Vec<UserId>,
    },

    /// A watched member crossed a geofence boundary; push-eligible.
    GeofenceTransition {
        /// De-duplication id for this transition.
        event_id: uuid::Uuid,
        /// The fence that was crossed.
        fence_id: FenceId,
        /// Fence display name.
        fence_name: String,
        /// The watcher who owns the fence; sole recipient.
        watcher_id: UserId,
        /// The member being watched.
        member_id: UserId,
        /// Display name of the member.
        member_name: String,
        /// Enter or exit.
        transition: FenceTransition,
        /// The location sample that produced the transition.
        location: GeoPoint,
    },

    /// A targeted news push; push-eligible.
    NewsPushed {
        /// De-duplication id for this push.
        push_id: uuid::Uuid,
        /// Push title.
        title: String,
        /// Push body.
        body: String,
        /// Optional link opened on tap.
        url: Option<String>,
        /// Targeted users.
        recipients: Vec<UserId>,
    },

    /// A community-wide announcement; push-eligible.
    CommunityAnnouncement {
        /// De-duplication id for this announcement.
        announcement_id: uuid::Uuid,
        /// Announcement title.
        title: String,
        /// Announcement body.
        body: String,
        /// Targeted users.
        recipients: Vec<UserId>,
    },

    /// A personal health reminder; push-eligible.
    HealthReminder {
        /// De-duplication id for this reminder.
        reminder_id: uuid::Uuid,
        /// The reminded user; sole recipient.
        user_id: UserId,
        /// Reminder title.
        title: String,
        /// Reminder body.
        body: String,
    },
}

/// Closed set of event kinds, stored as the `kind` field of notification log
/// rows and used as the push `tag` mapping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `presence.join`
    PresenceJoin,
    /// `presence.leave`
    PresenceLeave,
    /// `chat.message`
    ChatMessage,
    /// `chat.reaction`
    ChatReaction,
    /// `chat.mention`
    ChatMention,
    /// `sos.triggered`
    SosTriggered,
    /// `geofence.transition`
    GeofenceTransition,
    /// `news.pushed`
    NewsPushed,
    /// `community.announcement`
    CommunityAnnouncement,
    /// `health.reminder`
    HealthReminder,
}

impl EventKind {
    /// Return the dotted kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PresenceJoin => "presence.join",
            Self::PresenceLeave => "presence.leave",
            Self::ChatMessage => "chat.message",
            Self::ChatReaction => "chat.reaction",
            Self::ChatMention => "chat.mention",
            Self::SosTriggered => "sos.triggered",
            Self::GeofenceTransition => "geofence.transition",
            Self::NewsPushed => "news.pushed",
            Self::CommunityAnnouncement => "community.announcement",
            Self::HealthReminder => "health.reminder",
        }
    }

    /// Map the kind to its push category, or `None` if the kind never
    /// produces a push.
    #[must_use]
    pub const fn push_category(&self) -> Option<PushCategory> {
        match self {
            Self::ChatMention => Some(PushCategory::Chat),
            Self::SosTriggered => Some(PushCategory::Sos),
            Self::GeofenceTransition => Some(PushCategory::Geofence),
            Self::NewsPushed => Some(PushCategory::News),
            Self::CommunityAnnouncement => Some(PushCategory::Community),
            Self::HealthReminder => Some(PushCategory::Health),
            Self::PresenceJoin
            | Self::PresenceLeave
            | Self::ChatMessage
            | Self::ChatReaction => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Push notification categories, each gated by one preference flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushCategory {
    /// SOS alerts; gated by `sos_alerts`.
    Sos,
    /// Geofence transitions; gated by `geofence_alerts`.
    Geofence,
    /// Targeted news pushes; gated by `news_updates`.
    News,
    /// Community announcements; gated by `community_updates`.
    Community,
    /// Chat mentions; gated by `chat_mentions`.
    Chat,
    /// Health reminders; gated by `health_reminders`.
    Health,
}

impl PushCategory {
    /// Return the category name used as the push payload `tag`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sos => "sos",
            Self::Geofence => "geofence",
            Self::News => "news",
            Self::Community => "community",
            Self::Chat => "chat",
            Self::Health => "health",
        }
    }
}

impl HubEvent {
    /// Return the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::PresenceJoin { .. } => EventKind::PresenceJoin,
            Self::PresenceLeave { .. } => EventKind::PresenceLeave,
            Self::ChatMessage { .. } => EventKind::ChatMessage,
            Self::ChatReaction { .. } => EventKind::ChatReaction,
            Self::ChatMention { .. } => EventKind::ChatMention,
            Self::SosTriggered { .. } => EventKind::SosTriggered,
            Self::GeofenceTransition { .. } => EventKind::GeofenceTransition,
            Self::NewsPushed { .. } => EventKind::NewsPushed,
            Self::CommunityAnnouncement { .. } => EventKind::CommunityAnnouncement,
            Self::HealthReminder { .. } => EventKind::HealthReminder,
        }
    }

    /// Return the de-duplication key for push-eligible events.
    ///
    /// At-most-once delivery per `(dedup, channel, recipient)` hangs off this
    /// key; events that never produce notifications return `None`.
    #[must_use]
    pub fn dedup_id(&self) -> Option<String> {
        match self {
            Self::SosTriggered { alert_id, .. } => Some(alert_id.to_string()),
            Self::GeofenceTransition { event_id, .. } => Some(event_id.to_string()),
            Self::ChatMention { mention_id, .. } => Some(mention_id.to_string()),
            Self::NewsPushed { push_id, .. } => Some(push_id.to_string()),
            Self::CommunityAnnouncement {
                announcement_id, ..
            } => Some(announcement_id.to_string()),
            Self::HealthReminder { reminder_id, .. } => Some(reminder_id.to_string()),
            Self::PresenceJoin { .. }
            | Self::PresenceLeave { .. }
            | Self::ChatMessage { .. }
            | Self::ChatReaction { .. } => None,
        }
    }

    /// Return the recipient set for push-eligible events; empty otherwise.
    #[must_use]
    pub fn recipients(&self) -> &[UserId] {
        match self {
            Self::ChatMention { recipients, .. }
            | Self::SosTriggered { recipients, .. }
            | Self::NewsPushed { recipients, .. }
            | Self::CommunityAnnouncement { recipients, .. } => recipients,
            Self::GeofenceTransition { watcher_id, .. } => std::slice::from_ref(watcher_id),
            Self::HealthReminder { user_id, .. } => std::slice::from_ref(user_id),
            Self::PresenceJoin { .. }
            | Self::PresenceLeave { .. }
            | Self::ChatMessage { .. }
            | Self::ChatReaction { .. } => &[],
        }
    }
}

/// In-process pub/sub bus connecting producers to the WebSocket broadcaster
/// and the push dispatcher.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HubEvent>,
}

impl EventBus {
    /// Create a bus whose subscribers buffer up to `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    ///
    /// Publishing never blocks and never fails; with no subscribers the
    /// event is discarded.
    pub fn publish(&self, event: HubEvent) {
        trace!(kind = %event.kind(), "publishing hub event");
        let _ = self.sender.send(event);
    }

    /// Register a named subscriber.
    #[must_use]
    pub fn subscriber(&self, name: &'static str) -> BusSubscriber {
        BusSubscriber {
            name,
            rx: self.sender.subscribe(),
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A subscriber handle over a bounded queue.
///
/// When the queue overflows the oldest events are dropped; the drop is
/// logged with a count and reading continues from the oldest surviving
/// event.
pub struct BusSubscriber {
    name: &'static str,
    rx: broadcast::Receiver<HubEvent>,
}

impl BusSubscriber {
    /// Receive the next event, or `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<HubEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(subscriber = self.name, dropped = n, "subscriber lagged, oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
