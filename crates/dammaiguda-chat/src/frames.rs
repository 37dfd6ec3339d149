//! WebSocket frame vocabulary for room sockets.
//!
//! Every frame is a JSON object with a `type` discriminator. Clients send
//! [`ClientFrame`]s; the hub answers and broadcasts [`ServerFrame`]s. A
//! malformed or disallowed client frame is answered with an `error` frame on
//! the offending socket only; the connection stays open.

use dammaiguda_core::{HubEvent, MessageEvent, MessageId, RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Frames a client may send over a room socket.
#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Post a message to the room.
    Message {
        /// Message body.
        content: String,
        /// Message this one replies to, if any.
        #[serde(default)]
        reply_to: Option<MessageId>,
    },

    /// The sender started or stopped typing. Ephemeral; never persisted.
    Typing {
        /// `true` while composing, `false` once the input goes idle.
        is_typing: bool,
    },

    /// Toggle an emoji reaction on a message.
    Reaction {
        /// Message to react to.
        message_id: MessageId,
        /// Emoji to toggle.
        emoji: String,
    },
}

/// Direction of a presence change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceChange {
    /// A user came online in the room.
    Join,
    /// A user went offline in the room.
    Leave,
}

/// Frames the hub sends over a room socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A message was posted to the room.
    Message {
        /// The room.
        room_id: RoomId,
        /// The persisted message.
        message: MessageEvent,
    },

    /// Another member started or stopped typing.
    Typing {
        /// The room.
        room_id: RoomId,
        /// The typing user.
        user_id: UserId,
        /// Display name of the typing user.
        user_name: String,
        /// Whether that user is currently typing.
        is_typing: bool,
    },

    /// A reaction toggle settled.
    Reaction {
        /// The room.
        room_id: RoomId,
        /// The message reacted to.
        message_id: MessageId,
        /// The user who toggled.
        user_id: UserId,
        /// The emoji toggled.
        emoji: String,
        /// Complete reactions state after the toggle.
        reactions: BTreeMap<String, Vec<UserId>>,
    },

    /// A user came online or went offline in the room.
    Presence {
        /// The room.
        room_id: RoomId,
        /// Join or leave.
        event: PresenceChange,
        /// The user whose presence changed.
        user_id: UserId,
        /// Display name of that user.
        user_name: String,
        /// Distinct online users in the room after the change.
        online_count: usize,
    },

    /// An informational notice for this socket only.
    System {
        /// Human-readable notice.
        message: String,
    },

    /// A client frame was rejected.
    Error {
        /// Stable error kind, mirroring the REST error codes.
        kind: String,
        /// Human-readable description.
        message: String,
    },
}

impl ServerFrame {
    /// Render a bus event into the frame broadcast to its room, along with
    /// the room to broadcast to.
    ///
    /// Events that are not room-scoped (SOS, geofence, news) render no frame
    /// here; they reach users through the push and feed channels instead.
    #[must_use]
    pub fn from_event(event: &HubEvent) -> Option<(RoomId, Self)> {
        match event {
            HubEvent::PresenceJoin {
                room_id,
                user_id,
                user_name,
                online_count,
            } => Some((
                *room_id,
                Self::Presence {
                    room_id: *room_id,
                    event: PresenceChange::Join,
                    user_id: user_id.clone(),
                    user_name: user_name.clone(),
                    online_count: *online_count,
                },
            )),
            HubEvent::PresenceLeave {
                room_id,
                user_id,
                user_name,
                online_count,
            } => Some((
                *room_id,
                Self::Presence {
                    room_id: *room_id,
                    event: PresenceChange::Leave,
                    user_id: user_id.clone(),
                    user_name: user_name.clone(),
                    online_count: *online_count,
                },
            )),
            HubEvent::ChatMessage { room_id, message, .. } => Some((
                *room_id,
                Self::Message {
                    room_id: *room_id,
                    message: message.clone(),
                },
            )),
            HubEvent::ChatReaction {
                room_id,
                message_id,
                user_id,
                emoji,
                reactions,
            } => Some((
                *room_id,
                Self::Reaction {
                    room_id: *room_id,
                    message_id: *message_id,
                    user_id: user_id.clone(),
                    emoji: emoji.clone(),
                    reactions: reactions.clone(),
                },
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn client_frames_parse_by_type_tag() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"message","content":"the tap is fixed"}"#)
                .expect("parse");
        assert_eq!(
            frame,
            ClientFrame::Message {
                content: "the tap is fixed".to_owned(),
                reply_to: None,
            }
        );

        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"typing","is_typing":true}"#).expect("parse");
        assert_eq!(frame, ClientFrame::Typing { is_typing: true });
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"typing","is_typing":false}"#).expect("parse");
        assert_eq!(frame, ClientFrame::Typing { is_typing: false });

        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"shutdown"}"#).is_err());
    }

    #[test]
    fn error_frame_wire_shape() {
        let frame = ServerFrame::Error {
            kind: "forbidden".to_owned(),
            message: "guest sessions are read-only".to_owned(),
        };
        let json = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "forbidden");
    }

    #[test]
    fn bus_events_render_room_frames() {
        let room_id = RoomId::generate();
        let event = HubEvent::ChatMessage {
            room_id,
            message: MessageEvent {
                message_id: MessageId::generate(),
                user_id: UserId::new("u-1"),
                user_name: "Asha".to_owned(),
                content: "hello".to_owned(),
                reply_to: None,
                created_at: Utc::now(),
            },
            mentions: vec![],
        };

        let (target, frame) = ServerFrame::from_event(&event).expect("room frame");
        assert_eq!(target, room_id);
        let json = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(json["type"], "message");
        assert_eq!(json["message"]["content"], "hello");

        let event = HubEvent::SosTriggered {
            alert_id: dammaiguda_core::AlertId::generate(),
            user_id: UserId::new("u-1"),
            user_name: "Asha".to_owned(),
            message: String::new(),
            location: None,
            recipients: vec![],
        };
        assert!(ServerFrame::from_event(&event).is_none());
    }
}
