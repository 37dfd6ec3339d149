//! MongoDB persistence gateway for the community hub.
//!
//! This crate provides typed access to the hub's collections: `users`,
//! `chat_rooms`, `chat_messages`, `unread_cursors`, `push_subscriptions`,
//! `notification_prefs`, `family_links`, `geofences`, `locations`,
//! `emergency_contacts`, `sos_alerts`, and `notification_log`.
//!
//! # Guarantees
//!
//! Only single-document atomicity is assumed. Compound updates (insert a
//! message, then bump the room counters) are two operations; a failure
//! between them leaves counters eventually fixable. Reactions and SOS status
//! changes go through compare-and-set operations so concurrent writers never
//! lose an update silently.
//!
//! # Example
//!
//! ```no_run
//! use dammaiguda_core::UserId;
//! use dammaiguda_store::{MongoStore, Store};
//!
//! # async fn demo() -> Result<(), dammaiguda_store::StoreError> {
//! let store = MongoStore::connect("mongodb://localhost:27017", "dammaiguda").await?;
//! let rooms = store.list_rooms_for(&UserId::new("u-100")).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod mongo;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use types::{
    Channel, ChannelDelivery, ChatMessage, ChatRoom, DeliveryResult, EmergencyContact, FamilyLink,
    Geofence, LiveLocation, NotificationLog, NotificationPreferences, PushSubscription, RoomState,
    SosAlert, SosStatus, UnreadCursor, User, UserRole,
};

use async_trait::async_trait;
use bson::DateTime;
use dammaiguda_core::{AlertId, ContactId, FenceId, MessageId, RoomId, UserId};
use std::collections::BTreeMap;

/// The storage trait defining all persistence operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (MongoDB in production, in-memory for testing).
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // User Operations
    // =========================================================================

    /// Get a user by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>>;

    /// Insert or replace a user record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_user(&self, user: &User) -> Result<()>;

    /// List all users belonging to an area.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_users_in_area(&self, area_id: &str) -> Result<Vec<User>>;

    // =========================================================================
    // Chat Room Operations
    // =========================================================================

    /// Insert a new room.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_room(&self, room: &ChatRoom) -> Result<()>;

    /// Get a room by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_room(&self, room_id: &RoomId) -> Result<Option<ChatRoom>>;

    /// List rooms visible to a user: public rooms plus rooms the user is a
    /// member of, sorted by `last_activity_at` descending.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_rooms_for(&self, user_id: &UserId) -> Result<Vec<ChatRoom>>;

    /// Add a user to a room's member set. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the room doesn't exist.
    async fn add_room_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<()>;

    /// Increment a room's message counter and advance `last_activity_at`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the room doesn't exist.
    async fn record_room_activity(&self, room_id: &RoomId, at: DateTime) -> Result<()>;

    // =========================================================================
    // Chat Message Operations
    // =========================================================================

    /// Insert a new message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_message(&self, message: &ChatMessage) -> Result<()>;

    /// Get a message by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_message(&self, message_id: &MessageId) -> Result<Option<ChatMessage>>;

    /// Return up to `limit` messages of a room older than `before` (or the
    /// newest messages when `before` is `None`), in chronological order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_messages_before(
        &self,
        room_id: &RoomId,
        before: Option<DateTime>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>>;

    /// Count messages in a room strictly newer than `after`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn count_messages_after(&self, room_id: &RoomId, after: DateTime) -> Result<u64>;

    /// Replace a message's reactions map if `reactions_version` still equals
    /// `expected_version`; bumps the version on success.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the version moved,
    /// `StoreError::NotFound` if the message doesn't exist.
    async fn cas_message_reactions(
        &self,
        message_id: &MessageId,
        expected_version: u64,
        reactions: &BTreeMap<String, Vec<UserId>>,
    ) -> Result<()>;

    // =========================================================================
    // Unread Cursor Operations
    // =========================================================================

    /// Get the user's read position in a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn unread_cursor(&self, user_id: &UserId, room_id: &RoomId) -> Result<Option<DateTime>>;

    /// Advance the user's read position. Forward-only: an older timestamp
    /// never rewinds the cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn advance_unread_cursor(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        at: DateTime,
    ) -> Result<()>;

    // =========================================================================
    // Push Subscription Operations
    // =========================================================================

    /// Register a subscription; re-registering the same `(user_id,
    /// endpoint_url)` refreshes the keys and keeps the original row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn upsert_push_subscription(&self, sub: &PushSubscription) -> Result<()>;

    /// List all subscriptions of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_push_subscriptions(&self, user_id: &UserId) -> Result<Vec<PushSubscription>>;

    /// Remove the subscription for `(user_id, endpoint_url)`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no such subscription exists.
    async fn delete_push_subscription(&self, user_id: &UserId, endpoint_url: &str) -> Result<()>;

    /// Record a successful delivery: sets `last_success_at`, zeroes
    /// `failure_count`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record_push_success(
        &self,
        user_id: &UserId,
        endpoint_url: &str,
        at: DateTime,
    ) -> Result<()>;

    /// Record an exhausted delivery attempt: increments `failure_count`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record_push_failure(&self, user_id: &UserId, endpoint_url: &str) -> Result<()>;

    // =========================================================================
    // Notification Preference Operations
    // =========================================================================

    /// Get a user's push preferences; users without a stored row get the
    /// all-enabled default.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn notification_prefs(&self, user_id: &UserId) -> Result<NotificationPreferences>;

    /// Insert or replace a user's push preferences.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_notification_prefs(&self, prefs: &NotificationPreferences) -> Result<()>;

    // =========================================================================
    // Family Link Operations
    // =========================================================================

    /// Insert or replace a family link.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_family_link(&self, link: &FamilyLink) -> Result<()>;

    /// Get the accepted link between a watcher and a member, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn family_link(&self, watcher_id: &UserId, member_id: &UserId)
        -> Result<Option<FamilyLink>>;

    /// List the links watching a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_watchers_of(&self, member_id: &UserId) -> Result<Vec<FamilyLink>>;

    /// List the links a watcher holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_watched_members(&self, watcher_id: &UserId) -> Result<Vec<FamilyLink>>;

    // =========================================================================
    // Geofence Operations
    // =========================================================================

    /// Insert a new geofence.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_geofence(&self, fence: &Geofence) -> Result<()>;

    /// Get a geofence by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_geofence(&self, fence_id: &FenceId) -> Result<Option<Geofence>>;

    /// Delete a geofence.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the fence doesn't exist.
    async fn delete_geofence(&self, fence_id: &FenceId) -> Result<()>;

    /// List all fences around a member, across watchers.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_geofences_for_member(&self, member_id: &UserId) -> Result<Vec<Geofence>>;

    /// List the fences a watcher placed around one member.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_geofences_owned(
        &self,
        watcher_id: &UserId,
        member_id: &UserId,
    ) -> Result<Vec<Geofence>>;

    // =========================================================================
    // Live Location Operations
    // =========================================================================

    /// Get a user's latest location sample.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn live_location(&self, user_id: &UserId) -> Result<Option<LiveLocation>>;

    /// Store a user's latest location sample, replacing the previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_live_location(&self, location: &LiveLocation) -> Result<()>;

    // =========================================================================
    // Emergency Contact Operations
    // =========================================================================

    /// Insert a new emergency contact.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_emergency_contact(&self, contact: &EmergencyContact) -> Result<()>;

    /// List a user's emergency contacts.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_emergency_contacts(&self, user_id: &UserId) -> Result<Vec<EmergencyContact>>;

    /// Delete one of a user's emergency contacts.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user has no such contact.
    async fn delete_emergency_contact(
        &self,
        user_id: &UserId,
        contact_id: &ContactId,
    ) -> Result<()>;

    // =========================================================================
    // SOS Alert Operations
    // =========================================================================

    /// Insert a new alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_sos_alert(&self, alert: &SosAlert) -> Result<()>;

    /// Get an alert by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_sos_alert(&self, alert_id: &AlertId) -> Result<Option<SosAlert>>;

    /// Advance an alert's status if it still equals `from`; records the
    /// acting user and timestamp on the target state.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the status moved,
    /// `StoreError::NotFound` if the alert doesn't exist.
    async fn advance_sos_status(
        &self,
        alert_id: &AlertId,
        from: SosStatus,
        to: SosStatus,
        actor: &UserId,
        at: DateTime,
    ) -> Result<()>;

    /// Write one channel's delivery outcome. Writes only the channel's own
    /// key, so concurrent channels never clobber each other.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the alert doesn't exist.
    async fn set_sos_delivery(
        &self,
        alert_id: &AlertId,
        channel: Channel,
        outcome: &ChannelDelivery,
    ) -> Result<()>;

    /// List alerts a user triggered or receives, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_sos_alerts_for(&self, user_id: &UserId) -> Result<Vec<SosAlert>>;

    // =========================================================================
    // Notification Log Operations
    // =========================================================================

    /// Append a log row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn append_notification_log(&self, entry: &NotificationLog) -> Result<()>;

    /// Whether a `sent` row exists for `(dedup key, channel, recipient)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn notification_sent(
        &self,
        alert_id: &str,
        channel: Channel,
        user_id: &UserId,
    ) -> Result<bool>;

    /// List a user's in-app feed: `feed` channel rows, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_feed(&self, user_id: &UserId, limit: usize) -> Result<Vec<NotificationLog>>;
}
