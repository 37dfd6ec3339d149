//! Live socket registry for chat rooms.
//!
//! Each WebSocket connection registers here with a bounded outbound queue.
//! Frames for the room are pushed onto every member queue without blocking;
//! a connection whose queue is full is treated as dead and evicted, which is
//! also how unresponsive sockets leave rooms. Because each socket drains its
//! own queue from a single writer task, frames arrive on a socket in the
//! order they were published.

use std::collections::{HashMap, HashSet};

use dammaiguda_core::{ConnId, EventBus, HubEvent, RoomId, UserId};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::frames::ServerFrame;

/// Outbound frame queue depth per socket. A socket that falls this many
/// frames behind is evicted.
pub const OUTBOUND_BUFFER: usize = 64;

struct Connection {
    user_id: UserId,
    user_name: String,
    tx: mpsc::Sender<ServerFrame>,
}

/// Tracks which users are live in which rooms.
///
/// `join` and `leave` publish `presence.join` / `presence.leave` events on
/// the bus when a user's first socket arrives or last socket goes, so a user
/// with two tabs open counts once.
pub struct PresenceRegistry {
    bus: EventBus,
    rooms: RwLock<HashMap<RoomId, HashMap<ConnId, Connection>>>,
}

impl PresenceRegistry {
    /// Create an empty registry publishing presence changes on `bus`.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Register a socket in a room and return the receiving end of its
    /// outbound queue.
    ///
    /// The caller drains the receiver from the socket's writer task; dropping
    /// it marks the socket dead and the next broadcast evicts it.
    pub fn join(
        &self,
        room_id: RoomId,
        conn_id: ConnId,
        user_id: UserId,
        user_name: String,
    ) -> mpsc::Receiver<ServerFrame> {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (online_count, came_online) = {
            let mut rooms = self.rooms.write();
            let conns = rooms.entry(room_id).or_default();
            let already_online = conns.values().any(|c| c.user_id == user_id);
            conns.insert(
                conn_id,
                Connection {
                    user_id: user_id.clone(),
                    user_name: user_name.clone(),
                    tx,
                },
            );
            (distinct_users(conns), !already_online)
        };
        debug!(%room_id, %conn_id, %user_id, online_count, "socket joined room");
        if came_online {
            self.bus.publish(HubEvent::PresenceJoin {
                room_id,
                user_id,
                user_name,
                online_count,
            });
        }
        rx
    }

    /// Remove a socket from a room. Idempotent; returns whether the socket
    /// was still registered.
    pub fn leave(&self, room_id: &RoomId, conn_id: &ConnId) -> bool {
        let (conn, went_offline, online_count) = {
            let mut rooms = self.rooms.write();
            let Some(conns) = rooms.get_mut(room_id) else {
                return false;
            };
            let Some(conn) = conns.remove(conn_id) else {
                return false;
            };
            let went_offline = !conns.values().any(|c| c.user_id == conn.user_id);
            let online_count = distinct_users(conns);
            let room_empty = conns.is_empty();
            if room_empty {
                rooms.remove(room_id);
            }
            (conn, went_offline, online_count)
        };
        debug!(%room_id, %conn_id, user_id = %conn.user_id, online_count, "socket left room");
        if went_offline {
            self.bus.publish(HubEvent::PresenceLeave {
                room_id: *room_id,
                user_id: conn.user_id,
                user_name: conn.user_name,
                online_count,
            });
        }
        true
    }

    /// Push a frame onto every socket queue in a room, except `exclude`.
    ///
    /// Sockets whose queue is full (or whose receiver is gone) are evicted,
    /// publishing the matching leave event.
    pub fn broadcast(&self, room_id: &RoomId, frame: &ServerFrame, exclude: Option<&ConnId>) {
        let mut stale = Vec::new();
        {
            let rooms = self.rooms.read();
            let Some(conns) = rooms.get(room_id) else {
                return;
            };
            for (conn_id, conn) in conns {
                if exclude == Some(conn_id) {
                    continue;
                }
                if conn.tx.try_send(frame.clone()).is_err() {
                    stale.push(*conn_id);
                }
            }
        }
        for conn_id in stale {
            warn!(%room_id, %conn_id, "outbound queue full, evicting socket");
            self.leave(room_id, &conn_id);
        }
    }

    /// Push a frame onto one socket's queue. Returns whether it was queued;
    /// a socket that cannot take the frame is evicted.
    pub fn send_to(&self, room_id: &RoomId, conn_id: &ConnId, frame: ServerFrame) -> bool {
        let queued = {
            let rooms = self.rooms.read();
            match rooms.get(room_id).and_then(|conns| conns.get(conn_id)) {
                Some(conn) => conn.tx.try_send(frame).is_ok(),
                None => return false,
            }
        };
        if !queued {
            warn!(%room_id, %conn_id, "outbound queue full, evicting socket");
            self.leave(room_id, conn_id);
        }
        queued
    }

    /// Distinct online users in a room.
    #[must_use]
    pub fn online_in(&self, room_id: &RoomId) -> usize {
        self.rooms.read().get(room_id).map_or(0, distinct_users)
    }

    /// Distinct online users across all rooms.
    #[must_use]
    pub fn online_globally(&self) -> usize {
        let rooms = self.rooms.read();
        rooms
            .values()
            .flat_map(HashMap::values)
            .map(|conn| &conn.user_id)
            .collect::<HashSet<_>>()
            .len()
    }
}

fn distinct_users(conns: &HashMap<ConnId, Connection>) -> usize {
    conns
        .values()
        .map(|conn| &conn.user_id)
        .collect::<HashSet<_>>()
        .len()
}
