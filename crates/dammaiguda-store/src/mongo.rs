//! MongoDB-backed store.
//!
//! One typed `Collection<T>` handle per collection; indexes are created at
//! connect time. Compare-and-set updates are expressed as filtered
//! `update_one` calls whose filter carries the expected value, with
//! `matched_count` deciding between success, conflict, and not-found.

use crate::error::{Result, StoreError};
use crate::types::{
    Channel, ChannelDelivery, ChatMessage, ChatRoom, EmergencyContact, FamilyLink, Geofence,
    LiveLocation, NotificationLog, NotificationPreferences, PushSubscription, SosAlert, SosStatus,
    UnreadCursor, User,
};
use crate::Store;
use async_trait::async_trait;
use bson::{doc, DateTime, Document};
use dammaiguda_core::{AlertId, ContactId, FenceId, MessageId, RoomId, UserId};
use futures_util::TryStreamExt;
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use std::collections::BTreeMap;
use tracing::info;

fn to_i64<V: TryInto<i64>>(value: V) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

fn index(keys: Document, unique: bool) -> IndexModel {
    let options = IndexOptions::builder().unique(unique).build();
    IndexModel::builder().keys(keys).options(options).build()
}

/// MongoDB persistence gateway.
#[derive(Clone)]
pub struct MongoStore {
    users: Collection<User>,
    rooms: Collection<ChatRoom>,
    messages: Collection<ChatMessage>,
    cursors: Collection<UnreadCursor>,
    subscriptions: Collection<PushSubscription>,
    prefs: Collection<NotificationPreferences>,
    family_links: Collection<FamilyLink>,
    geofences: Collection<Geofence>,
    locations: Collection<LiveLocation>,
    contacts: Collection<EmergencyContact>,
    sos_alerts: Collection<SosAlert>,
    notification_log: Collection<NotificationLog>,
}

impl MongoStore {
    /// Connect to MongoDB, verify the connection, and create indexes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the server is unreachable or index
    /// creation fails.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        // Bound server selection so startup fails fast on an unreachable server.
        let timeout_uri = if uri.contains('?') {
            format!("{uri}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000")
        } else {
            format!("{uri}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000")
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| StoreError::Database(format!("failed to connect to MongoDB: {e}")))?;

        let db = client.database(db_name);
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Database(format!("MongoDB ping failed: {e}")))?;

        let store = Self {
            users: db.collection("users"),
            rooms: db.collection("chat_rooms"),
            messages: db.collection("chat_messages"),
            cursors: db.collection("unread_cursors"),
            subscriptions: db.collection("push_subscriptions"),
            prefs: db.collection("notification_prefs"),
            family_links: db.collection("family_links"),
            geofences: db.collection("geofences"),
            locations: db.collection("locations"),
            contacts: db.collection("emergency_contacts"),
            sos_alerts: db.collection("sos_alerts"),
            notification_log: db.collection("notification_log"),
        };
        store.ensure_indexes().await?;

        info!(db = %db_name, "connected to MongoDB");
        Ok(store)
    }

    async fn ensure_indexes(&self) -> Result<()> {
        self.users
            .create_indexes(vec![
                index(doc! { "user_id": 1 }, true),
                index(doc! { "area_id": 1 }, false),
            ])
            .await?;
        self.rooms
            .create_index(index(doc! { "room_id": 1 }, true))
            .await?;
        self.messages
            .create_indexes(vec![
                index(doc! { "message_id": 1 }, true),
                index(doc! { "room_id": 1, "created_at": 1 }, false),
            ])
            .await?;
        self.cursors
            .create_index(index(doc! { "user_id": 1, "room_id": 1 }, true))
            .await?;
        self.subscriptions
            .create_index(index(doc! { "user_id": 1, "endpoint_url": 1 }, true))
            .await?;
        self.prefs
            .create_index(index(doc! { "user_id": 1 }, true))
            .await?;
        self.family_links
            .create_indexes(vec![
                index(doc! { "watcher_id": 1, "member_id": 1 }, true),
                index(doc! { "member_id": 1 }, false),
            ])
            .await?;
        self.geofences
            .create_indexes(vec![
                index(doc! { "fence_id": 1 }, true),
                index(doc! { "subject_member_id": 1 }, false),
            ])
            .await?;
        self.locations
            .create_index(index(doc! { "user_id": 1 }, true))
            .await?;
        self.contacts
            .create_indexes(vec![
                index(doc! { "contact_id": 1 }, true),
                index(doc! { "user_id": 1 }, false),
            ])
            .await?;
        self.sos_alerts
            .create_indexes(vec![
                index(doc! { "alert_id": 1 }, true),
                index(doc! { "user_id": 1, "triggered_at": -1 }, false),
                index(doc! { "recipient_ids": 1 }, false),
            ])
            .await?;
        self.notification_log
            .create_indexes(vec![
                index(doc! { "alert_id": 1, "channel": 1, "user_id": 1 }, false),
                index(doc! { "user_id": 1, "channel": 1, "at": -1 }, false),
            ])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        Ok(self.users.find_one(doc! { "user_id": user_id.as_str() }).await?)
    }

    async fn put_user(&self, user: &User) -> Result<()> {
        self.users
            .replace_one(doc! { "user_id": user.user_id.as_str() }, user)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn list_users_in_area(&self, area_id: &str) -> Result<Vec<User>> {
        let cursor = self.users.find(doc! { "area_id": area_id }).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_room(&self, room: &ChatRoom) -> Result<()> {
        self.rooms.insert_one(room).await?;
        Ok(())
    }

    async fn get_room(&self, room_id: &RoomId) -> Result<Option<ChatRoom>> {
        Ok(self
            .rooms
            .find_one(doc! { "room_id": room_id.to_string() })
            .await?)
    }

    async fn list_rooms_for(&self, user_id: &UserId) -> Result<Vec<ChatRoom>> {
        let filter = doc! {
            "$or": [
                { "is_public": true },
                { "members": user_id.as_str() },
            ]
        };
        let cursor = self
            .rooms
            .find(filter)
            .sort(doc! { "last_activity_at": -1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn add_room_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        let result = self
            .rooms
            .update_one(
                doc! { "room_id": room_id.to_string() },
                doc! { "$addToSet": { "members": user_id.as_str() } },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn record_room_activity(&self, room_id: &RoomId, at: DateTime) -> Result<()> {
        let result = self
            .rooms
            .update_one(
                doc! { "room_id": room_id.to_string() },
                doc! {
                    "$inc": { "message_count": 1_i64 },
                    "$set": { "last_activity_at": at },
                },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<()> {
        self.messages.insert_one(message).await?;
        Ok(())
    }

    async fn get_message(&self, message_id: &MessageId) -> Result<Option<ChatMessage>> {
        Ok(self
            .messages
            .find_one(doc! { "message_id": message_id.to_string() })
            .await?)
    }

    async fn list_messages_before(
        &self,
        room_id: &RoomId,
        before: Option<DateTime>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let mut filter = doc! { "room_id": room_id.to_string() };
        if let Some(before) = before {
            filter.insert("created_at", doc! { "$lt": before });
        }
        let cursor = self
            .messages
            .find(filter)
            .sort(doc! { "created_at": -1 })
            .limit(to_i64(limit))
            .await?;
        let mut messages: Vec<ChatMessage> = cursor.try_collect().await?;
        messages.reverse();
        Ok(messages)
    }

    async fn count_messages_after(&self, room_id: &RoomId, after: DateTime) -> Result<u64> {
        let count = self
            .messages
            .count_documents(doc! {
                "room_id": room_id.to_string(),
                "created_at": { "$gt": after },
            })
            .await?;
        Ok(count)
    }

    async fn cas_message_reactions(
        &self,
        message_id: &MessageId,
        expected_version: u64,
        reactions: &BTreeMap<String, Vec<UserId>>,
    ) -> Result<()> {
        let result = self
            .messages
            .update_one(
                doc! {
                    "message_id": message_id.to_string(),
                    "reactions_version": to_i64(expected_version),
                },
                doc! {
                    "$set": {
                        "reactions": bson::to_bson(reactions)?,
                        "reactions_version": to_i64(expected_version + 1),
                    }
                },
            )
            .await?;
        if result.matched_count == 0 {
            return if self.get_message(message_id).await?.is_some() {
                Err(StoreError::Conflict)
            } else {
                Err(StoreError::NotFound)
            };
        }
        Ok(())
    }

    async fn unread_cursor(&self, user_id: &UserId, room_id: &RoomId) -> Result<Option<DateTime>> {
        let cursor = self
            .cursors
            .find_one(doc! {
                "user_id": user_id.as_str(),
                "room_id": room_id.to_string(),
            })
            .await?;
        Ok(cursor.map(|c| c.last_read_message_at))
    }

    async fn advance_unread_cursor(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        at: DateTime,
    ) -> Result<()> {
        self.cursors
            .update_one(
                doc! {
                    "user_id": user_id.as_str(),
                    "room_id": room_id.to_string(),
                },
                doc! { "$max": { "last_read_message_at": at } },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn upsert_push_subscription(&self, sub: &PushSubscription) -> Result<()> {
        self.subscriptions
            .update_one(
                doc! {
                    "user_id": sub.user_id.as_str(),
                    "endpoint_url": &sub.endpoint_url,
                },
                doc! {
                    "$set": {
                        "p256dh_key": &sub.p256dh_key,
                        "auth_key": &sub.auth_key,
                    },
                    "$setOnInsert": {
                        "sub_id": sub.sub_id.to_string(),
                        "created_at": sub.created_at,
                        "failure_count": 0_i32,
                    },
                },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn list_push_subscriptions(&self, user_id: &UserId) -> Result<Vec<PushSubscription>> {
        let cursor = self
            .subscriptions
            .find(doc! { "user_id": user_id.as_str() })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn delete_push_subscription(&self, user_id: &UserId, endpoint_url: &str) -> Result<()> {
        let result = self
            .subscriptions
            .delete_one(doc! {
                "user_id": user_id.as_str(),
                "endpoint_url": endpoint_url,
            })
            .await?;
        if result.deleted_count == 0 {
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
        self.subscriptions
            .update_one(
                doc! {
                    "user_id": user_id.as_str(),
                    "endpoint_url": endpoint_url,
                },
                doc! { "$set": { "last_success_at": at, "failure_count": 0_i32 } },
            )
            .await?;
        Ok(())
    }

    async fn record_push_failure(&self, user_id: &UserId, endpoint_url: &str) -> Result<()> {
        self.subscriptions
            .update_one(
                doc! {
                    "user_id": user_id.as_str(),
                    "endpoint_url": endpoint_url,
                },
                doc! { "$inc": { "failure_count": 1_i32 } },
            )
            .await?;
        Ok(())
    }

    async fn notification_prefs(&self, user_id: &UserId) -> Result<NotificationPreferences> {
        let prefs = self
            .prefs
            .find_one(doc! { "user_id": user_id.as_str() })
            .await?;
        Ok(prefs.unwrap_or_else(|| NotificationPreferences::default_for(user_id.clone())))
    }

    async fn put_notification_prefs(&self, prefs: &NotificationPreferences) -> Result<()> {
        self.prefs
            .replace_one(doc! { "user_id": prefs.user_id.as_str() }, prefs)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn put_family_link(&self, link: &FamilyLink) -> Result<()> {
        self.family_links
            .replace_one(
                doc! {
                    "watcher_id": link.watcher_id.as_str(),
                    "member_id": link.member_id.as_str(),
                },
                link,
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn family_link(
        &self,
        watcher_id: &UserId,
        member_id: &UserId,
    ) -> Result<Option<FamilyLink>> {
        Ok(self
            .family_links
            .find_one(doc! {
                "watcher_id": watcher_id.as_str(),
                "member_id": member_id.as_str(),
            })
            .await?)
    }

    async fn list_watchers_of(&self, member_id: &UserId) -> Result<Vec<FamilyLink>> {
        let cursor = self
            .family_links
            .find(doc! { "member_id": member_id.as_str() })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn list_watched_members(&self, watcher_id: &UserId) -> Result<Vec<FamilyLink>> {
        let cursor = self
            .family_links
            .find(doc! { "watcher_id": watcher_id.as_str() })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_geofence(&self, fence: &Geofence) -> Result<()> {
        self.geofences.insert_one(fence).await?;
        Ok(())
    }

    async fn get_geofence(&self, fence_id: &FenceId) -> Result<Option<Geofence>> {
        Ok(self
            .geofences
            .find_one(doc! { "fence_id": fence_id.to_string() })
            .await?)
    }

    async fn delete_geofence(&self, fence_id: &FenceId) -> Result<()> {
        let result = self
            .geofences
            .delete_one(doc! { "fence_id": fence_id.to_string() })
            .await?;
        if result.deleted_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_geofences_for_member(&self, member_id: &UserId) -> Result<Vec<Geofence>> {
        let cursor = self
            .geofences
            .find(doc! { "subject_member_id": member_id.as_str() })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn list_geofences_owned(
        &self,
        watcher_id: &UserId,
        member_id: &UserId,
    ) -> Result<Vec<Geofence>> {
        let cursor = self
            .geofences
            .find(doc! {
                "owner_watcher_id": watcher_id.as_str(),
                "subject_member_id": member_id.as_str(),
            })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn live_location(&self, user_id: &UserId) -> Result<Option<LiveLocation>> {
        Ok(self
            .locations
            .find_one(doc! { "user_id": user_id.as_str() })
            .await?)
    }

    async fn put_live_location(&self, location: &LiveLocation) -> Result<()> {
        self.locations
            .replace_one(doc! { "user_id": location.user_id.as_str() }, location)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn insert_emergency_contact(&self, contact: &EmergencyContact) -> Result<()> {
        self.contacts.insert_one(contact).await?;
        Ok(())
    }

    async fn list_emergency_contacts(&self, user_id: &UserId) -> Result<Vec<EmergencyContact>> {
        let cursor = self
            .contacts
            .find(doc! { "user_id": user_id.as_str() })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn delete_emergency_contact(
        &self,
        user_id: &UserId,
        contact_id: &ContactId,
    ) -> Result<()> {
        let result = self
            .contacts
            .delete_one(doc! {
                "contact_id": contact_id.to_string(),
                "user_id": user_id.as_str(),
            })
            .await?;
        if result.deleted_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_sos_alert(&self, alert: &SosAlert) -> Result<()> {
        self.sos_alerts.insert_one(alert).await?;
        Ok(())
    }

    async fn get_sos_alert(&self, alert_id: &AlertId) -> Result<Option<SosAlert>> {
        Ok(self
            .sos_alerts
            .find_one(doc! { "alert_id": alert_id.to_string() })
            .await?)
    }

    async fn advance_sos_status(
        &self,
        alert_id: &AlertId,
        from: SosStatus,
        to: SosStatus,
        actor: &UserId,
        at: DateTime,
    ) -> Result<()> {
        let mut set = doc! { "status": to.as_str() };
        match to {
            SosStatus::Acknowledged => {
                set.insert("acknowledged_by", actor.as_str());
                set.insert("acknowledged_at", at);
            }
            SosStatus::Resolved => {
                set.insert("resolved_at", at);
            }
            SosStatus::Active => {}
        }
        let result = self
            .sos_alerts
            .update_one(
                doc! {
                    "alert_id": alert_id.to_string(),
                    "status": from.as_str(),
                },
                doc! { "$set": set },
            )
            .await?;
        if result.matched_count == 0 {
            return if self.get_sos_alert(alert_id).await?.is_some() {
                Err(StoreError::Conflict)
            } else {
                Err(StoreError::NotFound)
            };
        }
        Ok(())
    }

    async fn set_sos_delivery(
        &self,
        alert_id: &AlertId,
        channel: Channel,
        outcome: &ChannelDelivery,
    ) -> Result<()> {
        let key = format!("delivery.{}", channel.as_str());
        let result = self
            .sos_alerts
            .update_one(
                doc! { "alert_id": alert_id.to_string() },
                doc! { "$set": { key: bson::to_bson(outcome)? } },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_sos_alerts_for(&self, user_id: &UserId) -> Result<Vec<SosAlert>> {
        let filter = doc! {
            "$or": [
                { "user_id": user_id.as_str() },
                { "recipient_ids": user_id.as_str() },
            ]
        };
        let cursor = self
            .sos_alerts
            .find(filter)
            .sort(doc! { "triggered_at": -1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn append_notification_log(&self, entry: &NotificationLog) -> Result<()> {
        self.notification_log.insert_one(entry).await?;
        Ok(())
    }

    async fn notification_sent(
        &self,
        alert_id: &str,
        channel: Channel,
        user_id: &UserId,
    ) -> Result<bool> {
        let count = self
            .notification_log
            .count_documents(doc! {
                "alert_id": alert_id,
                "channel": channel.as_str(),
                "user_id": user_id.as_str(),
                "result": "sent",
            })
            .await?;
        Ok(count > 0)
    }

    async fn list_feed(&self, user_id: &UserId, limit: usize) -> Result<Vec<NotificationLog>> {
        let cursor = self
            .notification_log
            .find(doc! {
                "user_id": user_id.as_str(),
                "channel": "feed",
                "result": "sent",
            })
            .sort(doc! { "at": -1 })
            .limit(to_i64(limit))
            .await?;
        Ok(cursor.try_collect().await?)
    }
}
