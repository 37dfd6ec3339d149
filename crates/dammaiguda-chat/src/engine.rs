//! Room and message operations.
//!
//! The engine is the single write path for chat state. Every persisted
//! change goes through the store, then onto the event bus; subscribers
//! (the socket broadcaster, the push dispatcher) render it from the event
//! alone without reading back.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dammaiguda_auth::Identity;
use dammaiguda_core::{ConnId, EventBus, HubEvent, MessageEvent, MessageId, RoomId, UserId};
use dammaiguda_store::{ChatMessage, ChatRoom, RoomState, Store, StoreError};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ChatError, Result};
use crate::frames::ServerFrame;
use crate::presence::PresenceRegistry;

/// Maximum message body length, in characters.
const MAX_MESSAGE_CHARS: usize = 4096;
/// Maximum room name length, in characters.
const MAX_ROOM_NAME_CHARS: usize = 80;
/// Maximum emoji key length, in characters. ZWJ sequences fit well within
/// this.
const MAX_EMOJI_CHARS: usize = 16;
/// Page size used when the client does not send one.
const DEFAULT_PAGE_SIZE: usize = 50;
/// Hard page size cap.
const MAX_PAGE_SIZE: usize = 200;
/// How many times a reaction toggle re-reads and retries after losing its
/// compare-and-set.
const REACTION_CAS_ATTEMPTS: usize = 3;

/// Request body for creating a room.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoom {
    /// Room name.
    pub name: String,
    /// Localized room name, if provided.
    #[serde(default)]
    pub name_localized: Option<String>,
    /// Whether any user may read and join. Defaults to public.
    #[serde(default = "default_public")]
    pub is_public: bool,
}

fn default_public() -> bool {
    true
}

/// Request body for posting a message.
#[derive(Debug, Clone, Deserialize)]
pub struct PostMessage {
    /// Message body.
    pub content: String,
    /// Message this one replies to, if any.
    #[serde(default)]
    pub reply_to: Option<MessageId>,
}

/// A room as returned by `list_rooms`: the stored room decorated with the
/// viewer's live counts.
#[derive(Debug, Clone)]
pub struct RoomSummary {
    /// The stored room.
    pub room: ChatRoom,
    /// Distinct users currently connected to the room.
    pub online_count: usize,
    /// Messages newer than the viewer's read cursor.
    pub unread_count: u64,
}

/// Per-room monotone timestamp source.
///
/// Stored timestamps have millisecond precision; two posts landing in the
/// same millisecond would tie on `created_at` and break cursor pagination,
/// so each room's next timestamp is forced at least one millisecond past
/// the previous one.
#[derive(Default)]
struct RoomClock {
    last_millis: Mutex<HashMap<RoomId, i64>>,
}

impl RoomClock {
    fn next(&self, room_id: RoomId) -> bson::DateTime {
        let mut last = self.last_millis.lock();
        let now = bson::DateTime::now().timestamp_millis();
        let entry = last.entry(room_id).or_insert(i64::MIN);
        let millis = now.max(entry.saturating_add(1));
        *entry = millis;
        bson::DateTime::from_millis(millis)
    }
}

/// Chat business logic over a [`Store`].
pub struct ChatEngine<S> {
    store: Arc<S>,
    presence: Arc<PresenceRegistry>,
    bus: EventBus,
    clock: RoomClock,
}

impl<S: Store> ChatEngine<S> {
    /// Create a new engine.
    #[must_use]
    pub fn new(store: Arc<S>, presence: Arc<PresenceRegistry>, bus: EventBus) -> Self {
        Self {
            store,
            presence,
            bus,
            clock: RoomClock::default(),
        }
    }

    /// List rooms visible to the viewer, newest activity first, decorated
    /// with online and unread counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_rooms(&self, viewer: &Identity) -> Result<Vec<RoomSummary>> {
        let rooms = self.store.list_rooms_for(&viewer.user_id).await?;
        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            let online_count = self.presence.online_in(&room.room_id);
            let unread_count = if viewer.is_read_only() {
                0
            } else {
                match self.store.unread_cursor(&viewer.user_id, &room.room_id).await? {
                    Some(cursor) => self.store.count_messages_after(&room.room_id, cursor).await?,
                    None => room.message_count,
                }
            };
            summaries.push(RoomSummary {
                room,
                online_count,
                unread_count,
            });
        }
        Ok(summaries)
    }

    /// Create a room. The creator becomes its first member.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::ReadOnly` for guests and
    /// `ChatError::InvalidArgument` for a blank or oversized name.
    pub async fn create_room(&self, creator: &Identity, req: CreateRoom) -> Result<ChatRoom> {
        if creator.is_read_only() {
            return Err(ChatError::ReadOnly);
        }
        let name = req.name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidArgument("room name is empty".to_owned()));
        }
        if name.chars().count() > MAX_ROOM_NAME_CHARS {
            return Err(ChatError::InvalidArgument(format!(
                "room name exceeds {MAX_ROOM_NAME_CHARS} characters"
            )));
        }

        let now = bson::DateTime::now();
        let room = ChatRoom {
            room_id: RoomId::generate(),
            name: name.to_owned(),
            name_localized: req
                .name_localized
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty()),
            is_public: req.is_public,
            state: RoomState::Active,
            created_by: creator.user_id.clone(),
            created_at: now,
            last_activity_at: now,
            message_count: 0,
            members: vec![creator.user_id.clone()],
        };
        self.store.insert_room(&room).await?;
        info!(room_id = %room.room_id, created_by = %room.created_by, public = room.is_public, "room created");
        Ok(room)
    }

    /// Load a room the viewer may read: any public room, or a private room
    /// the viewer is a member of.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::RoomNotFound` or `ChatError::NotAMember`.
    pub async fn room_access(&self, viewer: &Identity, room_id: &RoomId) -> Result<ChatRoom> {
        let room = self
            .store
            .get_room(room_id)
            .await?
            .ok_or(ChatError::RoomNotFound(*room_id))?;
        if !room.is_public && !room.members.contains(&viewer.user_id) {
            return Err(ChatError::NotAMember {
                user_id: viewer.user_id.clone(),
                room_id: *room_id,
            });
        }
        Ok(room)
    }

    /// Fetch a page of messages, oldest first, and advance the viewer's
    /// read cursor to the newest returned message.
    ///
    /// With no `before`, returns the newest messages. `limit` is clamped to
    /// 1..=200 and defaults to 50. The cursor never moves backwards, so
    /// paging into history leaves it where it was.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::RoomNotFound` or `ChatError::NotAMember`.
    pub async fn get_messages(
        &self,
        viewer: &Identity,
        room_id: &RoomId,
        before: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<ChatMessage>> {
        self.room_access(viewer, room_id).await?;
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let before = before.map(bson::DateTime::from_chrono);
        let messages = self.store.list_messages_before(room_id, before, limit).await?;

        if !viewer.is_read_only() {
            if let Some(newest) = messages.last() {
                self.store
                    .advance_unread_cursor(&viewer.user_id, room_id, newest.created_at)
                    .await?;
            }
        }
        Ok(messages)
    }

    /// Post a message to a room.
    ///
    /// Posting to a public room the author has not joined adds them as a
    /// member first. On success the message is persisted, the room counters
    /// advance, and a `chat.message` event is published; if any members were
    /// mentioned by `@name`, a `chat.mention` event follows.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::ReadOnly` for guests, `ChatError::RoomArchived`
    /// for archived rooms, `ChatError::NotAMember` for private rooms, and
    /// `ChatError::InvalidArgument` / `ChatError::MessageTooLong` for bad
    /// bodies.
    pub async fn post_message(
        &self,
        author: &Identity,
        room_id: &RoomId,
        req: PostMessage,
    ) -> Result<ChatMessage> {
        if author.is_read_only() {
            return Err(ChatError::ReadOnly);
        }
        let content = req.content.trim();
        if content.is_empty() {
            return Err(ChatError::InvalidArgument(
                "message content is empty".to_owned(),
            ));
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ChatError::MessageTooLong {
                limit: MAX_MESSAGE_CHARS,
            });
        }

        let room = self
            .store
            .get_room(room_id)
            .await?
            .ok_or(ChatError::RoomNotFound(*room_id))?;
        if room.state == RoomState::Archived {
            return Err(ChatError::RoomArchived(*room_id));
        }
        if !room.members.contains(&author.user_id) {
            if room.is_public {
                self.store.add_room_member(room_id, &author.user_id).await?;
            } else {
                return Err(ChatError::NotAMember {
                    user_id: author.user_id.clone(),
                    room_id: *room_id,
                });
            }
        }

        if let Some(reply_to) = req.reply_to {
            let parent = self.store.get_message(&reply_to).await?;
            if parent.is_none_or(|p| p.room_id != *room_id) {
                return Err(ChatError::InvalidArgument(
                    "reply_to must name a message in this room".to_owned(),
                ));
            }
        }

        let created_at = self.clock.next(*room_id);
        let message = ChatMessage {
            message_id: MessageId::generate(),
            room_id: *room_id,
            user_id: author.user_id.clone(),
            user_name: author.name.clone(),
            content: content.to_owned(),
            reply_to: req.reply_to,
            created_at,
            reactions: BTreeMap::new(),
            reactions_version: 0,
        };
        self.store.insert_message(&message).await?;
        self.store.record_room_activity(room_id, created_at).await?;

        let mentions = self.resolve_mentions(&room, author, content).await?;

        self.bus.publish(HubEvent::ChatMessage {
            room_id: *room_id,
            message: MessageEvent {
                message_id: message.message_id,
                user_id: message.user_id.clone(),
                user_name: message.user_name.clone(),
                content: message.content.clone(),
                reply_to: message.reply_to,
                created_at: created_at.to_chrono(),
            },
            mentions: mentions.clone(),
        });
        if !mentions.is_empty() {
            self.bus.publish(HubEvent::ChatMention {
                mention_id: uuid::Uuid::new_v4(),
                room_id: *room_id,
                room_name: room.name.clone(),
                message_id: message.message_id,
                author_name: author.name.clone(),
                content: message.content.clone(),
                recipients: mentions,
            });
        }
        Ok(message)
    }

    /// Toggle an emoji reaction on a message and return the settled
    /// reactions map.
    ///
    /// The toggle is read-modify-write under a version check; a lost race
    /// re-reads and retries a few times before giving up with
    /// `ChatError::ReactionContention`.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::ReadOnly` for guests, access errors as in
    /// [`ChatEngine::room_access`], and `ChatError::MessageNotFound` if the
    /// message is not in this room.
    pub async fn react(
        &self,
        user: &Identity,
        room_id: &RoomId,
        message_id: &MessageId,
        emoji: &str,
    ) -> Result<BTreeMap<String, Vec<UserId>>> {
        if user.is_read_only() {
            return Err(ChatError::ReadOnly);
        }
        let emoji = emoji.trim();
        if emoji.is_empty() || emoji.chars().count() > MAX_EMOJI_CHARS {
            return Err(ChatError::InvalidArgument(format!(
                "emoji must be 1 to {MAX_EMOJI_CHARS} characters"
            )));
        }
        self.room_access(user, room_id).await?;

        for attempt in 0..REACTION_CAS_ATTEMPTS {
            let message = self
                .store
                .get_message(message_id)
                .await?
                .ok_or(ChatError::MessageNotFound(*message_id))?;
            if message.room_id != *room_id {
                return Err(ChatError::MessageNotFound(*message_id));
            }

            let mut reactions = message.reactions.clone();
            let users = reactions.entry(emoji.to_owned()).or_default();
            if let Some(pos) = users.iter().position(|u| *u == user.user_id) {
                users.remove(pos);
            } else {
                users.push(user.user_id.clone());
            }
            if reactions.get(emoji).is_some_and(Vec::is_empty) {
                reactions.remove(emoji);
            }

            match self
                .store
                .cas_message_reactions(message_id, message.reactions_version, &reactions)
                .await
            {
                Ok(()) => {
                    self.bus.publish(HubEvent::ChatReaction {
                        room_id: *room_id,
                        message_id: *message_id,
                        user_id: user.user_id.clone(),
                        emoji: emoji.to_owned(),
                        reactions: reactions.clone(),
                    });
                    return Ok(reactions);
                }
                Err(StoreError::Conflict) => {
                    debug!(%message_id, attempt, "reaction toggle lost the version race, retrying");
                }
                Err(other) => return Err(other.into()),
            }
        }
        Err(ChatError::ReactionContention(*message_id))
    }

    /// Broadcast a typing indicator to the room's other sockets.
    ///
    /// Typing is never persisted and never reaches the event bus; with no
    /// live sockets in the room it vanishes.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::ReadOnly` for guests.
    pub fn typing(
        &self,
        user: &Identity,
        room_id: &RoomId,
        is_typing: bool,
        conn_id: &ConnId,
    ) -> Result<()> {
        if user.is_read_only() {
            return Err(ChatError::ReadOnly);
        }
        let frame = ServerFrame::Typing {
            room_id: *room_id,
            user_id: user.user_id.clone(),
            user_name: user.name.clone(),
            is_typing,
        };
        self.presence.broadcast(room_id, &frame, Some(conn_id));
        Ok(())
    }

    /// Resolve `@name` mentions against the room's member display names,
    /// case-insensitively, excluding the author.
    async fn resolve_mentions(
        &self,
        room: &ChatRoom,
        author: &Identity,
        content: &str,
    ) -> Result<Vec<UserId>> {
        if !content.contains('@') {
            return Ok(Vec::new());
        }
        let haystack = content.to_lowercase();
        let mut mentioned = Vec::new();
        for member_id in &room.members {
            if *member_id == author.user_id {
                continue;
            }
            let Some(user) = self.store.get_user(member_id).await? else {
                continue;
            };
            if name_mentioned(&haystack, &user.name) {
                mentioned.push(member_id.clone());
            }
        }
        Ok(mentioned)
    }
}

/// Whether `@name` occurs in the (already lowercased) content at token
/// boundaries, so "@priya" does not fire for "@priyanka" and an email
/// address does not fire for the part after its `@`.
fn name_mentioned(haystack: &str, name: &str) -> bool {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return false;
    }
    let needle = format!("@{name}");
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(&needle) {
        let start = from + pos;
        let end = start + needle.len();
        let starts_token = haystack[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let ends_token = haystack[end..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());
        if starts_token && ends_token {
            return true;
        }
        from = end;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use dammaiguda_auth::Role;
    use dammaiguda_store::{MemoryStore, User, UserRole};

    struct Harness {
        engine: ChatEngine<MemoryStore>,
        store: Arc<MemoryStore>,
        presence: Arc<PresenceRegistry>,
        bus: EventBus,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::new(64);
        let presence = Arc::new(PresenceRegistry::new(bus.clone()));
        let engine = ChatEngine::new(Arc::clone(&store), Arc::clone(&presence), bus.clone());
        Harness {
            engine,
            store,
            presence,
            bus,
        }
    }

    fn citizen(id: &str, name: &str) -> Identity {
        Identity {
            user_id: UserId::new(id),
            name: name.to_owned(),
            role: Role::Citizen,
            area_id: Some("area-1".to_owned()),
        }
    }

    async fn seed_user(store: &MemoryStore, id: &str, name: &str) {
        store
            .put_user(&User {
                user_id: UserId::new(id),
                phone: format!("+91990000{id}"),
                name: name.to_owned(),
                role: UserRole::Citizen,
                area_id: "area-1".to_owned(),
            })
            .await
            .unwrap();
    }

    fn public_room(name: &str) -> CreateRoom {
        CreateRoom {
            name: name.to_owned(),
            name_localized: None,
            is_public: true,
        }
    }

    #[tokio::test]
    async fn create_room_validates_the_name() {
        let h = harness();
        let asha = citizen("u-1", "Asha");

        let err = h.engine.create_room(&asha, public_room("   ")).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidArgument(_)));

        let err = h
            .engine
            .create_room(&asha, public_room(&"n".repeat(81)))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidArgument(_)));

        let room = h
            .engine
            .create_room(&asha, public_room("  Water Supply  "))
            .await
            .unwrap();
        assert_eq!(room.name, "Water Supply");
        assert_eq!(room.members, vec![UserId::new("u-1")]);
    }

    #[tokio::test]
    async fn guests_cannot_mutate() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        let guest = Identity::guest();
        let room = h.engine.create_room(&asha, public_room("General")).await.unwrap();

        assert!(matches!(
            h.engine.create_room(&guest, public_room("Mine")).await,
            Err(ChatError::ReadOnly)
        ));
        assert!(matches!(
            h.engine
                .post_message(
                    &guest,
                    &room.room_id,
                    PostMessage {
                        content: "hi".to_owned(),
                        reply_to: None,
                    },
                )
                .await,
            Err(ChatError::ReadOnly)
        ));
        assert!(matches!(
            h.engine
                .react(&guest, &room.room_id, &MessageId::generate(), "👍")
                .await,
            Err(ChatError::ReadOnly)
        ));
        assert!(matches!(
            h.engine.typing(&guest, &room.room_id, true, &ConnId::generate()),
            Err(ChatError::ReadOnly)
        ));

        // But reading a public room works.
        let messages = h
            .engine
            .get_messages(&guest, &room.room_id, None, None)
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn posting_validates_content() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        let room = h.engine.create_room(&asha, public_room("General")).await.unwrap();

        let err = h
            .engine
            .post_message(
                &asha,
                &room.room_id,
                PostMessage {
                    content: "   ".to_owned(),
                    reply_to: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidArgument(_)));

        let err = h
            .engine
            .post_message(
                &asha,
                &room.room_id,
                PostMessage {
                    content: "x".repeat(4097),
                    reply_to: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::MessageTooLong { limit: 4096 }));

        let message = h
            .engine
            .post_message(
                &asha,
                &room.room_id,
                PostMessage {
                    content: "x".repeat(4096),
                    reply_to: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(message.content.chars().count(), 4096);
    }

    #[tokio::test]
    async fn archived_rooms_reject_posts() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        let now = bson::DateTime::now();
        let room = ChatRoom {
            room_id: RoomId::generate(),
            name: "Old Festival".to_owned(),
            name_localized: None,
            is_public: true,
            state: RoomState::Archived,
            created_by: UserId::new("u-1"),
            created_at: now,
            last_activity_at: now,
            message_count: 0,
            members: vec![UserId::new("u-1")],
        };
        h.store.insert_room(&room).await.unwrap();

        let err = h
            .engine
            .post_message(
                &asha,
                &room.room_id,
                PostMessage {
                    content: "anyone here?".to_owned(),
                    reply_to: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::RoomArchived(_)));
    }

    #[tokio::test]
    async fn private_rooms_require_membership() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        let priya = citizen("u-2", "Priya");
        let room = h
            .engine
            .create_room(
                &asha,
                CreateRoom {
                    name: "Street 4 Committee".to_owned(),
                    name_localized: None,
                    is_public: false,
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            h.engine.room_access(&priya, &room.room_id).await,
            Err(ChatError::NotAMember { .. })
        ));
        assert!(matches!(
            h.engine.get_messages(&priya, &room.room_id, None, None).await,
            Err(ChatError::NotAMember { .. })
        ));
        assert!(matches!(
            h.engine
                .post_message(
                    &priya,
                    &room.room_id,
                    PostMessage {
                        content: "hello".to_owned(),
                        reply_to: None,
                    },
                )
                .await,
            Err(ChatError::NotAMember { .. })
        ));

        h.store.add_room_member(&room.room_id, &priya.user_id).await.unwrap();
        h.engine
            .post_message(
                &priya,
                &room.room_id,
                PostMessage {
                    content: "hello".to_owned(),
                    reply_to: None,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn posting_to_a_public_room_auto_joins() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        let ravi = citizen("u-3", "Ravi");
        let room = h.engine.create_room(&asha, public_room("General")).await.unwrap();

        h.engine
            .post_message(
                &ravi,
                &room.room_id,
                PostMessage {
                    content: "good morning".to_owned(),
                    reply_to: None,
                },
            )
            .await
            .unwrap();

        let room = h.store.get_room(&room.room_id).await.unwrap().unwrap();
        assert!(room.members.contains(&ravi.user_id));
        assert_eq!(room.message_count, 1);
    }

    #[tokio::test]
    async fn timestamps_are_strictly_increasing_per_room() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        let room = h.engine.create_room(&asha, public_room("General")).await.unwrap();

        let mut previous = None;
        for n in 0..5 {
            let message = h
                .engine
                .post_message(
                    &asha,
                    &room.room_id,
                    PostMessage {
                        content: format!("message {n}"),
                        reply_to: None,
                    },
                )
                .await
                .unwrap();
            if let Some(previous) = previous {
                assert!(message.created_at > previous);
            }
            previous = Some(message.created_at);
        }
    }

    #[tokio::test]
    async fn reply_to_must_be_in_the_same_room() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        let room_a = h.engine.create_room(&asha, public_room("A")).await.unwrap();
        let room_b = h.engine.create_room(&asha, public_room("B")).await.unwrap();
        let parent = h
            .engine
            .post_message(
                &asha,
                &room_a.room_id,
                PostMessage {
                    content: "original".to_owned(),
                    reply_to: None,
                },
            )
            .await
            .unwrap();

        let err = h
            .engine
            .post_message(
                &asha,
                &room_b.room_id,
                PostMessage {
                    content: "cross-room reply".to_owned(),
                    reply_to: Some(parent.message_id),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidArgument(_)));

        let reply = h
            .engine
            .post_message(
                &asha,
                &room_a.room_id,
                PostMessage {
                    content: "agreed".to_owned(),
                    reply_to: Some(parent.message_id),
                },
            )
            .await
            .unwrap();
        assert_eq!(reply.reply_to, Some(parent.message_id));
    }

    #[tokio::test]
    async fn mentions_resolve_against_member_names() {
        let h = harness();
        seed_user(&h.store, "u-1", "Asha").await;
        seed_user(&h.store, "u-2", "Priya").await;
        seed_user(&h.store, "u-3", "Ravindra").await;
        let asha = citizen("u-1", "Asha");
        let room = h.engine.create_room(&asha, public_room("General")).await.unwrap();
        h.store.add_room_member(&room.room_id, &UserId::new("u-2")).await.unwrap();
        h.store.add_room_member(&room.room_id, &UserId::new("u-3")).await.unwrap();

        let mut sub = h.bus.subscriber("test");
        h.engine
            .post_message(
                &asha,
                &room.room_id,
                PostMessage {
                    content: "@Priya the tap is fixed, tell @ravindra!".to_owned(),
                    reply_to: None,
                },
            )
            .await
            .unwrap();

        match sub.next().await {
            Some(HubEvent::ChatMessage { mentions, .. }) => {
                assert_eq!(mentions, vec![UserId::new("u-2"), UserId::new("u-3")]);
            }
            other => panic!("wrong event: {other:?}"),
        }
        match sub.next().await {
            Some(HubEvent::ChatMention {
                recipients,
                author_name,
                ..
            }) => {
                assert_eq!(recipients, vec![UserId::new("u-2"), UserId::new("u-3")]);
                assert_eq!(author_name, "Asha");
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn mention_prefixes_and_self_mentions_do_not_fire() {
        let h = harness();
        seed_user(&h.store, "u-1", "Asha").await;
        seed_user(&h.store, "u-2", "Priya").await;
        let asha = citizen("u-1", "Asha");
        let room = h.engine.create_room(&asha, public_room("General")).await.unwrap();
        h.store.add_room_member(&room.room_id, &UserId::new("u-2")).await.unwrap();

        let mut sub = h.bus.subscriber("test");

        // "@Priyanka" must not mention Priya; "@asha" is the author.
        h.engine
            .post_message(
                &asha,
                &room.room_id,
                PostMessage {
                    content: "@Priyanka and @asha are coming".to_owned(),
                    reply_to: None,
                },
            )
            .await
            .unwrap();
        match sub.next().await {
            Some(HubEvent::ChatMessage { mentions, .. }) => assert!(mentions.is_empty()),
            other => panic!("wrong event: {other:?}"),
        }

        // The next bus event is the next message, not a mention fanout.
        h.engine
            .post_message(
                &asha,
                &room.room_id,
                PostMessage {
                    content: "second".to_owned(),
                    reply_to: None,
                },
            )
            .await
            .unwrap();
        match sub.next().await {
            Some(HubEvent::ChatMessage { message, .. }) => assert_eq!(message.content, "second"),
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reactions_toggle_on_and_off() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        let priya = citizen("u-2", "Priya");
        let room = h.engine.create_room(&asha, public_room("General")).await.unwrap();
        let message = h
            .engine
            .post_message(
                &asha,
                &room.room_id,
                PostMessage {
                    content: "tap fixed".to_owned(),
                    reply_to: None,
                },
            )
            .await
            .unwrap();

        let reactions = h
            .engine
            .react(&priya, &room.room_id, &message.message_id, "👍")
            .await
            .unwrap();
        assert_eq!(reactions.get("👍"), Some(&vec![UserId::new("u-2")]));

        let reactions = h
            .engine
            .react(&priya, &room.room_id, &message.message_id, "👍")
            .await
            .unwrap();
        assert!(reactions.is_empty());

        let stored = h.store.get_message(&message.message_id).await.unwrap().unwrap();
        assert!(stored.reactions.is_empty());
        assert_eq!(stored.reactions_version, 2);
    }

    #[tokio::test]
    async fn concurrent_reactions_both_survive() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        let priya = citizen("u-2", "Priya");
        let ravi = citizen("u-3", "Ravi");
        let room = h.engine.create_room(&asha, public_room("General")).await.unwrap();
        let message = h
            .engine
            .post_message(
                &asha,
                &room.room_id,
                PostMessage {
                    content: "tap fixed".to_owned(),
                    reply_to: None,
                },
            )
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            h.engine.react(&priya, &room.room_id, &message.message_id, "👍"),
            h.engine.react(&ravi, &room.room_id, &message.message_id, "👍"),
        );
        a.unwrap();
        b.unwrap();

        let stored = h.store.get_message(&message.message_id).await.unwrap().unwrap();
        let thumbs = stored.reactions.get("👍").unwrap();
        assert!(thumbs.contains(&UserId::new("u-2")));
        assert!(thumbs.contains(&UserId::new("u-3")));
    }

    #[tokio::test]
    async fn reacting_through_the_wrong_room_is_not_found() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        let room_a = h.engine.create_room(&asha, public_room("A")).await.unwrap();
        let room_b = h.engine.create_room(&asha, public_room("B")).await.unwrap();
        let message = h
            .engine
            .post_message(
                &asha,
                &room_a.room_id,
                PostMessage {
                    content: "hello".to_owned(),
                    reply_to: None,
                },
            )
            .await
            .unwrap();

        let err = h
            .engine
            .react(&asha, &room_b.room_id, &message.message_id, "👍")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::MessageNotFound(_)));
    }

    #[tokio::test]
    async fn pagination_walks_backwards() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        let room = h.engine.create_room(&asha, public_room("General")).await.unwrap();
        for n in 0..3 {
            h.engine
                .post_message(
                    &asha,
                    &room.room_id,
                    PostMessage {
                        content: format!("message {n}"),
                        reply_to: None,
                    },
                )
                .await
                .unwrap();
        }

        let newest = h
            .engine
            .get_messages(&asha, &room.room_id, None, Some(2))
            .await
            .unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].content, "message 1");
        assert_eq!(newest[1].content, "message 2");

        let older = h
            .engine
            .get_messages(
                &asha,
                &room.room_id,
                Some(newest[0].created_at.to_chrono()),
                Some(2),
            )
            .await
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].content, "message 0");

        // limit 0 clamps up to a single message.
        let clamped = h
            .engine
            .get_messages(&asha, &room.room_id, None, Some(0))
            .await
            .unwrap();
        assert_eq!(clamped.len(), 1);
        assert_eq!(clamped[0].content, "message 2");
    }

    #[tokio::test]
    async fn unread_counts_follow_the_cursor() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        let priya = citizen("u-2", "Priya");
        let room = h.engine.create_room(&asha, public_room("General")).await.unwrap();
        h.store.add_room_member(&room.room_id, &priya.user_id).await.unwrap();

        for n in 0..3 {
            h.engine
                .post_message(
                    &asha,
                    &room.room_id,
                    PostMessage {
                        content: format!("message {n}"),
                        reply_to: None,
                    },
                )
                .await
                .unwrap();
        }

        let rooms = h.engine.list_rooms(&priya).await.unwrap();
        assert_eq!(rooms[0].unread_count, 3);

        h.engine.get_messages(&priya, &room.room_id, None, None).await.unwrap();
        let rooms = h.engine.list_rooms(&priya).await.unwrap();
        assert_eq!(rooms[0].unread_count, 0);

        h.engine
            .post_message(
                &asha,
                &room.room_id,
                PostMessage {
                    content: "one more".to_owned(),
                    reply_to: None,
                },
            )
            .await
            .unwrap();
        let rooms = h.engine.list_rooms(&priya).await.unwrap();
        assert_eq!(rooms[0].unread_count, 1);
    }

    #[tokio::test]
    async fn list_rooms_reports_online_counts() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        let room = h.engine.create_room(&asha, public_room("General")).await.unwrap();

        let _rx1 = h.presence.join(
            room.room_id,
            ConnId::generate(),
            UserId::new("u-2"),
            "Priya".to_owned(),
        );
        let _rx2 = h.presence.join(
            room.room_id,
            ConnId::generate(),
            UserId::new("u-3"),
            "Ravi".to_owned(),
        );

        let rooms = h.engine.list_rooms(&asha).await.unwrap();
        assert_eq!(rooms[0].online_count, 2);
    }

    #[tokio::test]
    async fn typing_reaches_only_the_other_sockets() {
        let h = harness();
        let asha = citizen("u-1", "Asha");
        let room = h.engine.create_room(&asha, public_room("General")).await.unwrap();

        let conn_a = ConnId::generate();
        let conn_b = ConnId::generate();
        let mut rx_a = h
            .presence
            .join(room.room_id, conn_a, asha.user_id.clone(), "Asha".to_owned());
        let mut rx_b = h.presence.join(
            room.room_id,
            conn_b,
            UserId::new("u-2"),
            "Priya".to_owned(),
        );

        h.engine.typing(&asha, &room.room_id, true, &conn_a).unwrap();

        match rx_b.recv().await {
            Some(ServerFrame::Typing {
                user_name,
                is_typing,
                ..
            }) => {
                assert_eq!(user_name, "Asha");
                assert!(is_typing);
            }
            other => panic!("wrong frame: {other:?}"),
        }
        assert!(rx_a.try_recv().is_err());

        // Going idle broadcasts the cleared flag the same way.
        h.engine.typing(&asha, &room.room_id, false, &conn_a).unwrap();
        match rx_b.recv().await {
            Some(ServerFrame::Typing { is_typing, .. }) => assert!(!is_typing),
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn room_clock_is_strictly_monotone() {
        let clock = RoomClock::default();
        let room = RoomId::generate();
        let mut previous = clock.next(room);
        for _ in 0..500 {
            let next = clock.next(room);
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn mention_matching_is_boundary_aware() {
        assert!(name_mentioned("@priya hello", "Priya"));
        assert!(name_mentioned("done, thanks @priya!", "Priya"));
        assert!(name_mentioned("@ప్రియ రండి", "ప్రియ"));
        assert!(!name_mentioned("@priyanka hello", "Priya"));
        assert!(!name_mentioned("mail me priya@example.com", "example"));
        assert!(!name_mentioned("no mention here", "Priya"));
    }
}
