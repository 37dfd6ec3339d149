//! In-memory store for tests and local development.
//!
//! Mirrors the MongoDB implementation's semantics: the same compare-and-set
//! behavior, forward-only cursors, upsert rules, and sort orders, behind one
//! `RwLock` with short synchronous critical sections.

use crate::error::{Result, StoreError};
use crate::types::{
    Channel, ChannelDelivery, ChatMessage, ChatRoom, DeliveryResult, EmergencyContact, FamilyLink,
    Geofence, LiveLocation, NotificationLog, NotificationPreferences, PushSubscription, SosAlert,
    SosStatus, User,
};
use crate::Store;
use async_trait::async_trait;
use bson::DateTime;
use dammaiguda_core::{AlertId, ContactId, FenceId, MessageId, RoomId, UserId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, User>,
    rooms: HashMap<RoomId, ChatRoom>,
    messages: HashMap<MessageId, ChatMessage>,
    cursors: HashMap<(UserId, RoomId), DateTime>,
    subscriptions: HashMap<(UserId, String), PushSubscription>,
    prefs: HashMap<UserId, NotificationPreferences>,
    family_links: Vec<FamilyLink>,
    geofences: HashMap<FenceId, Geofence>,
    locations: HashMap<UserId, LiveLocation>,
    contacts: HashMap<ContactId, EmergencyContact>,
    sos_alerts: HashMap<AlertId, SosAlert>,
    notification_log: Vec<NotificationLog>,
}

/// In-memory persistence gateway.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All log rows for a user across every channel, in append order.
    /// Lets tests assert on outcomes that [`Store::list_feed`] filters out.
    #[must_use]
    pub fn notification_rows(&self, user_id: &UserId) -> Vec<NotificationLog> {
        self.inner
            .read()
            .notification_log
            .iter()
            .filter(|e| e.user_id == *user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        Ok(self.inner.read().users.get(user_id).cloned())
    }

    async fn put_user(&self, user: &User) -> Result<()> {
        self.inner
            .write()
            .users
            .insert(user.user_id.clone(), user.clone());
        Ok(())
    }

    async fn list_users_in_area(&self, area_id: &str) -> Result<Vec<User>> {
        Ok(self
            .inner
            .read()
            .users
            .values()
            .filter(|u| u.area_id == area_id)
            .cloned()
            .collect())
    }

    async fn insert_room(&self, room: &ChatRoom) -> Result<()> {
        self.inner
            .write()
            .rooms
            .insert(room.room_id, room.clone());
        Ok(())
    }

    async fn get_room(&self, room_id: &RoomId) -> Result<Option<ChatRoom>> {
        Ok(self.inner.read().rooms.get(room_id).cloned())
    }

    async fn list_rooms_for(&self, user_id: &UserId) -> Result<Vec<ChatRoom>> {
        let mut rooms: Vec<ChatRoom> = self
            .inner
            .read()
            .rooms
            .values()
            .filter(|r| r.is_public || r.members.contains(user_id))
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(rooms)
    }

    async fn add_room_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        let mut inner = self.inner.write();
        let room = inner.rooms.get_mut(room_id).ok_or(StoreError::NotFound)?;
        if !room.members.contains(user_id) {
            room.members.push(user_id.clone());
        }
        Ok(())
    }

    async fn record_room_activity(&self, room_id: &RoomId, at: DateTime) -> Result<()> {
        let mut inner = self.inner.write();
        let room = inner.rooms.get_mut(room_id).ok_or(StoreError::NotFound)?;
        room.message_count += 1;
        room.last_activity_at = at;
        Ok(())
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        self.inner
            .write()
            .messages
            .insert(message.message_id, message.clone());
        Ok(())
    }

    async fn get_message(&self, message_id: &MessageId) -> Result<Option<ChatMessage>> {
        Ok(self.inner.read().messages.get(message_id).cloned())
    }

    async fn list_messages_before(
        &self,
        room_id: &RoomId,
        before: Option<DateTime>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let mut messages: Vec<ChatMessage> = self
            .inner
            .read()
            .messages
            .values()
            .filter(|m| m.room_id == *room_id)
            .filter(|m| before.is_none_or(|b| m.created_at < b))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }

    async fn count_messages_after(&self, room_id: &RoomId, after: DateTime) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .messages
            .values()
            .filter(|m| m.room_id == *room_id && m.created_at > after)
            .count() as u64)
    }

    async fn cas_message_reactions(
        &self,
        message_id: &MessageId,
        expected_version: u64,
        reactions: &BTreeMap<String, Vec<UserId>>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let message = inner
            .messages
            .get_mut(message_id)
            .ok_or(StoreError::NotFound)?;
        if message.reactions_version != expected_version {
            return Err(StoreError::Conflict);
        }
        message.reactions = reactions.clone();
        message.reactions_version = expected_version + 1;
        Ok(())
    }

    async fn unread_cursor(&self, user_id: &UserId, room_id: &RoomId) -> Result<Option<DateTime>> {
        Ok(self
            .inner
            .read()
            .cursors
            .get(&(user_id.clone(), *room_id))
            .copied())
    }

    async fn advance_unread_cursor(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        at: DateTime,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let cursor = inner
            .cursors
            .entry((user_id.clone(), *room_id))
            .or_insert(at);
        if at > *cursor {
            *cursor = at;
        }
        Ok(())
    }

    async fn upsert_push_subscription(&self, sub: &PushSubscription) -> Result<()> {
        let mut inner = self.inner.write();
        let key = (sub.user_id.clone(), sub.endpoint_url.clone());
        if let Some(existing) = inner.subscriptions.get_mut(&key) {
            existing.p256dh_key = sub.p256dh_key.clone();
            existing.auth_key = sub.auth_key.clone();
        } else {
            inner.subscriptions.insert(key, sub.clone());
        }
        Ok(())
    }

    async fn list_push_subscriptions(&self, user_id: &UserId) -> Result<Vec<PushSubscription>> {
        Ok(self
            .inner
            .read()
            .subscriptions
            .values()
            .filter(|s| s.user_id == *user_id)
            .cloned()
            .collect())
    }

    async fn delete_push_subscription(&self, user_id: &UserId, endpoint_url: &str) -> Result<()> {
        let key = (user_id.clone(), endpoint_url.to_owned());
        if self.inner.write().subscriptions.remove(&key).is_none() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn record_push_success(
        &self,
        user_id: &UserId,
        endpoint_url: &str,
        at: DateTime,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let key = (user_id.clone(), endpoint_url.to_owned());
        if let Some(sub) = inner.subscriptions.get_mut(&key) {
            sub.last_success_at = Some(at);
            sub.failure_count = 0;
        }
        Ok(())
    }

    async fn record_push_failure(&self, user_id: &UserId, endpoint_url: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let key = (user_id.clone(), endpoint_url.to_owned());
        if let Some(sub) = inner.subscriptions.get_mut(&key) {
            sub.failure_count += 1;
        }
        Ok(())
    }

    async fn notification_prefs(&self, user_id: &UserId) -> Result<NotificationPreferences> {
        Ok(self
            .inner
            .read()
            .prefs
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| NotificationPreferences::default_for(user_id.clone())))
    }

    async fn put_notification_prefs(&self, prefs: &NotificationPreferences) -> Result<()> {
        self.inner
            .write()
            .prefs
            .insert(prefs.user_id.clone(), prefs.clone());
        Ok(())
    }

    async fn put_family_link(&self, link: &FamilyLink) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .family_links
            .retain(|l| !(l.watcher_id == link.watcher_id && l.member_id == link.member_id));
        inner.family_links.push(link.clone());
        Ok(())
    }

    async fn family_link(
        &self,
        watcher_id: &UserId,
        member_id: &UserId,
    ) -> Result<Option<FamilyLink>> {
        Ok(self
            .inner
            .read()
            .family_links
            .iter()
            .find(|l| l.watcher_id == *watcher_id && l.member_id == *member_id)
            .cloned())
    }

    async fn list_watchers_of(&self, member_id: &UserId) -> Result<Vec<FamilyLink>> {
        Ok(self
            .inner
            .read()
            .family_links
            .iter()
            .filter(|l| l.member_id == *member_id)
            .cloned()
            .collect())
    }

    async fn list_watched_members(&self, watcher_id: &UserId) -> Result<Vec<FamilyLink>> {
        Ok(self
            .inner
            .read()
            .family_links
            .iter()
            .filter(|l| l.watcher_id == *watcher_id)
            .cloned()
            .collect())
    }

    async fn insert_geofence(&self, fence: &Geofence) -> Result<()> {
        self.inner
            .write()
            .geofences
            .insert(fence.fence_id, fence.clone());
        Ok(())
    }

    async fn get_geofence(&self, fence_id: &FenceId) -> Result<Option<Geofence>> {
        Ok(self.inner.read().geofences.get(fence_id).cloned())
    }

    async fn delete_geofence(&self, fence_id: &FenceId) -> Result<()> {
        if self.inner.write().geofences.remove(fence_id).is_none() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_geofences_for_member(&self, member_id: &UserId) -> Result<Vec<Geofence>> {
        Ok(self
            .inner
            .read()
            .geofences
            .values()
            .filter(|f| f.subject_member_id == *member_id)
            .cloned()
            .collect())
    }

    async fn list_geofences_owned(
        &self,
        watcher_id: &UserId,
        member_id: &UserId,
    ) -> Result<Vec<Geofence>> {
        Ok(self
            .inner
            .read()
            .geofences
            .values()
            .filter(|f| f.owner_watcher_id == *watcher_id && f.subject_member_id == *member_id)
            .cloned()
            .collect())
    }

    async fn live_location(&self, user_id: &UserId) -> Result<Option<LiveLocation>> {
        Ok(self.inner.read().locations.get(user_id).cloned())
    }

    async fn put_live_location(&self, location: &LiveLocation) -> Result<()> {
        self.inner
            .write()
            .locations
            .insert(location.user_id.clone(), location.clone());
        Ok(())
    }

    async fn insert_emergency_contact(&self, contact: &EmergencyContact) -> Result<()> {
        self.inner
            .write()
            .contacts
            .insert(contact.contact_id, contact.clone());
        Ok(())
    }

    async fn list_emergency_contacts(&self, user_id: &UserId) -> Result<Vec<EmergencyContact>> {
        let mut contacts: Vec<EmergencyContact> = self
            .inner
            .read()
            .contacts
            .values()
            .filter(|c| c.user_id == *user_id)
            .cloned()
            .collect();
        contacts.sort_by_key(|c| c.created_at);
        Ok(contacts)
    }

    async fn delete_emergency_contact(
        &self,
        user_id: &UserId,
        contact_id: &ContactId,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.contacts.get(contact_id) {
            Some(contact) if contact.user_id == *user_id => {
                inner.contacts.remove(contact_id);
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn insert_sos_alert(&self, alert: &SosAlert) -> Result<()> {
        self.inner
            .write()
            .sos_alerts
            .insert(alert.alert_id, alert.clone());
        Ok(())
    }

    async fn get_sos_alert(&self, alert_id: &AlertId) -> Result<Option<SosAlert>> {
        Ok(self.inner.read().sos_alerts.get(alert_id).cloned())
    }

    async fn advance_sos_status(
        &self,
        alert_id: &AlertId,
        from: SosStatus,
        to: SosStatus,
        actor: &UserId,
        at: DateTime,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let alert = inner
            .sos_alerts
            .get_mut(alert_id)
            .ok_or(StoreError::NotFound)?;
        if alert.status != from {
            return Err(StoreError::Conflict);
        }
        alert.status = to;
        match to {
            SosStatus::Acknowledged => {
                alert.acknowledged_by = Some(actor.clone());
                alert.acknowledged_at = Some(at);
            }
            SosStatus::Resolved => alert.resolved_at = Some(at),
            SosStatus::Active => {}
        }
        Ok(())
    }

    async fn set_sos_delivery(
        &self,
        alert_id: &AlertId,
        channel: Channel,
        outcome: &ChannelDelivery,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let alert = inner
            .sos_alerts
            .get_mut(alert_id)
            .ok_or(StoreError::NotFound)?;
        alert
            .delivery
            .insert(channel.as_str().to_owned(), outcome.clone());
        Ok(())
    }

    async fn list_sos_alerts_for(&self, user_id: &UserId) -> Result<Vec<SosAlert>> {
        let mut alerts: Vec<SosAlert> = self
            .inner
            .read()
            .sos_alerts
            .values()
            .filter(|a| a.user_id == *user_id || a.recipient_ids.contains(user_id))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        Ok(alerts)
    }

    async fn append_notification_log(&self, entry: &NotificationLog) -> Result<()> {
        self.inner.write().notification_log.push(entry.clone());
        Ok(())
    }

    async fn notification_sent(
        &self,
        alert_id: &str,
        channel: Channel,
        user_id: &UserId,
    ) -> Result<bool> {
        Ok(self.inner.read().notification_log.iter().any(|e| {
            e.alert_id.as_deref() == Some(alert_id)
                && e.channel == channel
                && e.user_id == *user_id
                && e.result == DeliveryResult::Sent
        }))
    }

    async fn list_feed(&self, user_id: &UserId, limit: usize) -> Result<Vec<NotificationLog>> {
        let mut feed: Vec<NotificationLog> = self
            .inner
            .read()
            .notification_log
            .iter()
            .filter(|e| {
                e.user_id == *user_id
                    && e.channel == Channel::Feed
                    && e.result == DeliveryResult::Sent
            })
            .cloned()
            .collect();
        feed.sort_by(|a, b| b.at.cmp(&a.at));
        feed.truncate(limit);
        Ok(feed)
    }
}
